//! Lifecycle flags of a player
//!
//! Four one-shot, level-triggered flags. A flag goes false to true once and
//! stays set for the life of the player, so late waiters resolve at once.

use futures::future::select_all;
use std::fmt;
use tokio::sync::watch;

use crate::state::WaitableState;

/// One of the player's lifecycle flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFlag {
    Setup,
    Eos,
    Error,
    Teardown,
}

impl EventFlag {
    pub const ALL: [EventFlag; 4] = [
        EventFlag::Setup,
        EventFlag::Eos,
        EventFlag::Error,
        EventFlag::Teardown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventFlag::Setup => "setup",
            EventFlag::Eos => "eos",
            EventFlag::Error => "error",
            EventFlag::Teardown => "teardown",
        }
    }
}

impl fmt::Display for EventFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bundle of the four lifecycle flags
pub struct EventFlags {
    setup: watch::Sender<bool>,
    eos: watch::Sender<bool>,
    error: watch::Sender<bool>,
    teardown: watch::Sender<bool>,
}

impl EventFlags {
    pub fn new() -> Self {
        Self {
            setup: watch::Sender::new(false),
            eos: watch::Sender::new(false),
            error: watch::Sender::new(false),
            teardown: watch::Sender::new(false),
        }
    }

    fn sender(&self, flag: EventFlag) -> &watch::Sender<bool> {
        match flag {
            EventFlag::Setup => &self.setup,
            EventFlag::Eos => &self.eos,
            EventFlag::Error => &self.error,
            EventFlag::Teardown => &self.teardown,
        }
    }

    /// Set a flag; setting it again is a no-op
    pub fn set(&self, flag: EventFlag) {
        self.sender(flag).send_if_modified(|value| !std::mem::replace(value, true));
    }

    pub fn is_set(&self, flag: EventFlag) -> bool {
        *self.sender(flag).borrow()
    }

    /// Resolve once `flag` is set (immediately if it already is)
    pub async fn wait(&self, flag: EventFlag) {
        let mut rx = self.sender(flag).subscribe();
        // The sender lives in self, so the channel cannot close while borrowed
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Resolve with whichever of `flags` is set first
    ///
    /// Flags that lose the race keep their own state.
    pub async fn wait_any(&self, flags: &[EventFlag]) -> Option<EventFlag> {
        if flags.is_empty() {
            return None;
        }
        if let Some(flag) = flags.iter().copied().find(|f| self.is_set(*f)) {
            return Some(flag);
        }
        let waits = flags
            .iter()
            .map(|flag| Box::pin(async move {
                self.wait(*flag).await;
                *flag
            }));
        let (winner, _, _) = select_all(waits).await;
        Some(winner)
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for flag in EventFlag::ALL {
            map.entry(&flag.name(), &self.is_set(flag));
        }
        map.finish()
    }
}

/// Flags plus confirmed state, owned by one player
#[derive(Debug, Default)]
pub struct PlayerEvents {
    pub flags: EventFlags,
    pub state: WaitableState,
}

impl PlayerEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, flag: EventFlag) {
        self.flags.set(flag);
    }

    pub fn is_set(&self, flag: EventFlag) -> bool {
        self.flags.is_set(flag)
    }

    pub async fn wait(&self, flag: EventFlag) {
        self.flags.wait(flag).await
    }
}
