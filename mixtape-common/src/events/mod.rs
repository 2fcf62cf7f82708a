//! Event types for the mixtape event system
//!
//! Provides engine-facing value types, player events and the EventBus.

mod message_types;
mod state_types;

pub use message_types::{Message, MessageBody, MessageKind, PipelineError, QosInfo};
pub use state_types::{State, StateChangeReturn};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Player event types
///
/// Emitted by a player as it observes its bus, for any number of listeners
/// (command-line front ends, plugins, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Pipeline root confirmed a state change
    StateChanged {
        old_state: State,
        new_state: State,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// End of stream reached
    Eos {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Engine reported an error; the player tears itself down
    Error {
        error: PipelineError,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Any message dispatched by the bus watch, before the player handles it
    Message {
        message: Message,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Player released its pipeline
    TornDown {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    pub fn state_changed(old_state: State, new_state: State) -> Self {
        PlayerEvent::StateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn eos() -> Self {
        PlayerEvent::Eos {
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(error: PipelineError) -> Self {
        PlayerEvent::Error {
            error,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn message(message: Message) -> Self {
        PlayerEvent::Message {
            message,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn torn_down() -> Self {
        PlayerEvent::TornDown {
            timestamp: chrono::Utc::now(),
        }
    }

    /// Short event name, used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::Eos { .. } => "Eos",
            PlayerEvent::Error { .. } => "Error",
            PlayerEvent::Message { .. } => "Message",
            PlayerEvent::TornDown { .. } => "TornDown",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Event distribution bus for player events
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the bus watch)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use mixtape_common::events::{EventBus, PlayerEvent, State};
///
/// let event_bus = EventBus::new(16);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PlayerEvent::state_changed(State::Null, State::Ready));
/// assert!(matches!(rx.try_recv(), Ok(PlayerEvent::StateChanged { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(4);
        assert!(bus.emit(PlayerEvent::eos()).is_err());
        // Lossy variant never fails
        bus.emit_lossy(PlayerEvent::eos());
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(PlayerEvent::state_changed(State::Null, State::Ready));
        bus.emit_lossy(PlayerEvent::eos());

        assert_eq!(rx.try_recv().unwrap().name(), "StateChanged");
        assert_eq!(rx.try_recv().unwrap().name(), "Eos");
    }

    #[test]
    fn test_player_event_serializes_with_type_tag() {
        let event = PlayerEvent::state_changed(State::Paused, State::Playing);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["new_state"], "PLAYING");
    }

    #[test]
    fn test_message_event_keeps_message_payload() {
        let event = PlayerEvent::message(Message::eos("pipeline0"));
        assert_eq!(event.name(), "Message");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Message");
        assert_eq!(json["message"]["src"], "pipeline0");
        assert_eq!(json["message"]["body"]["type"], "Eos");
    }
}
