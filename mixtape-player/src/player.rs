//! Awaitable pipeline controller
//!
//! [`Player`] owns one engine pipeline and turns its fire-and-forget state
//! requests into futures. Engine outcomes are translated as follows:
//!
//! | engine        | result                                              |
//! |---------------|-----------------------------------------------------|
//! | `SUCCESS`     | `Ok(Success)` immediately                           |
//! | `NO_PREROLL`  | `Ok(Success)` immediately                           |
//! | `ASYNC`       | suspend until ASYNC_DONE and the bus confirms it    |
//! | `FAILURE`     | tear down, `Err(SetStateFailure)`                   |
//!
//! An ERROR message on the bus fails every suspended operation with
//! `PipelineFailure` and tears the player down.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::bus::{BusWatch, HandlerTable, Scheduler};
use crate::engine::{ElementInfo, ElementKind, Pipeline, PipelineFactory};
use crate::error::{Error, Result};
use crate::events::{EventFlag, PlayerEvents};
use mixtape_common::events::{EventBus, PlayerEvent};
use mixtape_common::{Message, MessageKind, PipelineError, State, StateChangeReturn};

const EVENT_CAPACITY: usize = 64;

/// Synchronous result of issuing a state request to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Transition completed
    Success,
    /// Transition continues in the engine; a bus message confirms it
    Pending(State),
    /// Engine rejected the transition
    Failed(String),
}

impl TransitionOutcome {
    pub fn from_return(ret: StateChangeReturn, target: State) -> Self {
        match ret {
            StateChangeReturn::Success | StateChangeReturn::NoPreroll => TransitionOutcome::Success,
            StateChangeReturn::Async => TransitionOutcome::Pending(target),
            StateChangeReturn::Failure => {
                TransitionOutcome::Failed(format!("engine returned FAILURE for {}", target))
            }
        }
    }
}

/// Waiter for the next ASYNC_DONE
///
/// Markers owned by a state request carry its target. They consume their
/// ASYNC_DONE even when nobody awaits them any more, and are removed when a
/// later request supersedes them.
struct AsyncMarker {
    id: u64,
    transition: Option<State>,
    tx: oneshot::Sender<Result<()>>,
}

type MarkerReceiver = oneshot::Receiver<Result<()>>;

type MessageHandler = Box<dyn Fn(&PlayerInner, &Message) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct PlayerInner {
    name: String,
    pipeline: Mutex<Option<Arc<dyn Pipeline>>>,
    events: PlayerEvents,
    watch: Mutex<Option<BusWatch>>,
    failure: Mutex<Option<PipelineError>>,
    async_markers: Mutex<VecDeque<AsyncMarker>>,
    next_marker: AtomicU64,
    event_bus: EventBus,
}

impl PlayerInner {
    fn failure_error(&self) -> Error {
        match lock(&self.failure).clone() {
            Some(err) => Error::PipelineFailure(err),
            None => Error::TornDown,
        }
    }

    /// Surface the recorded pipeline failure in place of a bare teardown
    fn surface(&self, err: Error) -> Error {
        match err {
            Error::TornDown => self.failure_error(),
            err => err,
        }
    }

    fn push_async_marker(&self, transition: Option<State>) -> (u64, MarkerReceiver) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_marker.fetch_add(1, Ordering::Relaxed);
        lock(&self.async_markers).push_back(AsyncMarker { id, transition, tx });
        (id, rx)
    }

    fn remove_marker(&self, id: u64) {
        lock(&self.async_markers).retain(|marker| marker.id != id);
    }

    /// Fail the markers of in-flight transitions replaced by a request for `by`
    ///
    /// A transition whose target the engine has already `reached` keeps its
    /// marker: its ASYNC_DONE is still on the bus.
    fn supersede_transitions(&self, reached: Option<State>, by: State) {
        let superseded: VecDeque<AsyncMarker> = {
            let mut markers = lock(&self.async_markers);
            let (superseded, kept) = markers.drain(..).partition(|marker| {
                matches!(marker.transition, Some(target) if Some(target) != reached)
            });
            *markers = kept;
            superseded
        };
        for marker in superseded {
            if let Some(target) = marker.transition {
                debug!("{}: transition to {} superseded by {}", self.name, target, by);
                let _ = marker.tx.send(Err(Error::Superseded { target, by }));
            }
        }
    }

    fn fail_async_markers(&self, err: &Error) {
        let markers: Vec<_> = lock(&self.async_markers).drain(..).collect();
        for marker in markers {
            let _ = marker.tx.send(Err(err.clone()));
        }
    }

    /// Confirm NULL directly; the engine flushed every message still queued
    fn confirm_null(&self, state: State) {
        self.events.state.pick(state);
        self.supersede_transitions(None, State::Null);
        self.events.state.fail_except(state, |target| Error::Superseded {
            target,
            by: State::Null,
        });
    }

    fn handle_state_changed(&self, message: &Message) {
        if message.src != self.name {
            return;
        }
        let Some((old, new, pending)) = message.parse_state_changed() else {
            return;
        };
        if pending == State::VoidPending {
            info!("{}: {} -> {}", self.name, old, new);
        } else {
            debug!("{}: {} -> {} (pending {})", self.name, old, new, pending);
        }
        self.events.state.pick(new);
        self.event_bus.emit_lossy(PlayerEvent::state_changed(old, new));
    }

    fn handle_error(&self, message: &Message) {
        let Some(err) = message.parse_error() else {
            return;
        };
        error!("{}", err);
        if let Some(details) = &err.debug {
            error!("{}", details);
        }

        lock(&self.failure).get_or_insert_with(|| err.clone());
        self.events.set(EventFlag::Error);
        self.event_bus.emit_lossy(PlayerEvent::error(err.clone()));

        let failure = Error::PipelineFailure(err);
        self.events.state.fail_all(failure.clone());
        self.fail_async_markers(&failure);
        self.teardown();
    }

    fn handle_eos(&self, message: &Message) {
        info!("{}: end of stream (from {})", self.name, message.src);
        self.events.set(EventFlag::Eos);
        self.event_bus.emit_lossy(PlayerEvent::eos());
    }

    fn handle_async_done(&self, scheduler: &Scheduler) {
        let marker = {
            let mut markers = lock(&self.async_markers);
            loop {
                match markers.pop_front() {
                    // Abandoned async_done() waits
                    Some(marker) if marker.transition.is_none() && marker.tx.is_closed() => {}
                    next => break next,
                }
            }
        };
        match marker {
            Some(marker) => scheduler.call_soon_threadsafe(move || {
                let _ = marker.tx.send(Ok(()));
            }),
            None => error!("{}: ASYNC_DONE with no pending transition", self.name),
        }
    }

    fn handle_qos(&self, message: &Message) {
        if let Some(qos) = message.parse_qos() {
            warn!(
                "QOS from {}: live={} running_time={} stream_time={} timestamp={} duration={}",
                message.src,
                qos.live,
                qos.running_time,
                qos.stream_time,
                qos.timestamp,
                qos.duration
            );
        }
    }

    fn handle_other(&self, message: &Message) {
        debug!("{}: unhandled {} message from {}", self.name, message.kind(), message.src);
    }

    /// Handler table for the bus watch; every message is also broadcast
    fn handlers(self: &Arc<Self>, scheduler: Scheduler) -> HandlerTable {
        let route = |handle: MessageHandler| {
            let weak: Weak<PlayerInner> = Arc::downgrade(self);
            move |message: &Message| {
                if let Some(inner) = weak.upgrade() {
                    inner.event_bus.emit_lossy(PlayerEvent::message(message.clone()));
                    handle(&*inner, message);
                }
            }
        };

        HandlerTable::new()
            .on(MessageKind::StateChanged, route(Box::new(PlayerInner::handle_state_changed)))
            .on(MessageKind::Error, route(Box::new(PlayerInner::handle_error)))
            .on(MessageKind::Eos, route(Box::new(PlayerInner::handle_eos)))
            .on(
                MessageKind::AsyncDone,
                route(Box::new(move |inner: &PlayerInner, _: &Message| {
                    inner.handle_async_done(&scheduler)
                })),
            )
            .on(MessageKind::Qos, route(Box::new(PlayerInner::handle_qos)))
            .with_default(route(Box::new(PlayerInner::handle_other)))
    }

    /// Synchronous, idempotent release of the pipeline
    fn teardown(&self) {
        if self.events.is_set(EventFlag::Teardown) {
            return;
        }

        // The watch goes before the pipeline reaches NULL
        let watch = lock(&self.watch).take();
        if let Some(watch) = watch {
            watch.unregister();
        }

        let pipeline = lock(&self.pipeline).take();
        if let Some(pipeline) = pipeline {
            if pipeline.current_state() != State::Null
                && pipeline.set_state(State::Null) == StateChangeReturn::Failure
            {
                warn!("{}: engine refused NULL during teardown", self.name);
            }
            self.events.state.pick(pipeline.current_state());
        }

        self.events.state.fail_all(Error::TornDown);
        self.fail_async_markers(&Error::TornDown);
        self.events.set(EventFlag::Teardown);
        self.event_bus.emit_lossy(PlayerEvent::torn_down());
        info!("{}: torn down", self.name);
    }
}

impl Drop for PlayerInner {
    fn drop(&mut self) {
        if self.events.is_set(EventFlag::Setup) && !self.events.is_set(EventFlag::Teardown) {
            error!("{}: player dropped without teardown()", self.name);
        }
    }
}

/// Awaitable controller for one engine pipeline
///
/// Cheap to clone; clones share the same pipeline.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new(pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                name: pipeline.name().to_string(),
                pipeline: Mutex::new(Some(pipeline)),
                events: PlayerEvents::new(),
                watch: Mutex::new(None),
                failure: Mutex::new(None),
                async_markers: Mutex::new(VecDeque::new()),
                next_marker: AtomicU64::new(0),
                event_bus: EventBus::new(EVENT_CAPACITY),
            }),
        }
    }

    /// Build a player from a pipeline description
    pub fn from_description(factory: &dyn PipelineFactory, description: &str) -> Result<Self> {
        Ok(Self::new(factory.parse_launch(description)?))
    }

    /// Attach the bus watch; must run inside a tokio runtime
    pub fn setup(&self) -> Result<()> {
        if self.inner.events.is_set(EventFlag::Teardown) {
            return Err(Error::TornDown);
        }
        if self.inner.events.is_set(EventFlag::Setup) {
            return Err(Error::AlreadyConfigured);
        }
        let pipeline = lock(&self.inner.pipeline).clone().ok_or(Error::TornDown)?;

        let scheduler = Scheduler::current()?;
        let handlers = self.inner.handlers(scheduler.clone());
        let watch = BusWatch::register(pipeline.bus(), handlers, &scheduler)?;
        *lock(&self.inner.watch) = Some(watch);

        self.inner.events.set(EventFlag::Setup);
        info!("{}: set up with {} element(s)", self.inner.name, pipeline.elements().len());
        Ok(())
    }

    /// Release the pipeline; safe to call repeatedly
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    fn usable_pipeline(&self) -> Result<Arc<dyn Pipeline>> {
        if lock(&self.inner.failure).is_some() {
            return Err(self.inner.failure_error());
        }
        if !self.inner.events.is_set(EventFlag::Setup) {
            return Err(Error::NotConfigured(format!(
                "{} has not been set up",
                self.inner.name
            )));
        }
        if self.inner.events.is_set(EventFlag::Teardown) {
            return Err(Error::TornDown);
        }
        lock(&self.inner.pipeline).clone().ok_or(Error::TornDown)
    }

    fn fail_transition(&self, target: State, reason: String) -> Error {
        error!("{}: failed to set state {}: {}", self.inner.name, target, reason);
        self.inner.events.set(EventFlag::Error);
        self.inner.teardown();
        Error::SetStateFailure { target, reason }
    }

    /// Issue `target` to the engine
    ///
    /// The receiver resolves on this transition's own ASYNC_DONE when the
    /// outcome is `Pending`.
    fn issue(&self, target: State) -> Result<(TransitionOutcome, MarkerReceiver)> {
        let pipeline = self.usable_pipeline()?;
        let current = pipeline.current_state();
        if current == target {
            return Err(Error::AlreadyInState(target));
        }

        self.inner.supersede_transitions(Some(current), target);
        // Queued before the request so a fast ASYNC_DONE still finds it
        let (marker, done) = self.inner.push_async_marker(Some(target));

        debug!("{}: requesting {}", self.inner.name, target);
        let outcome = TransitionOutcome::from_return(pipeline.set_state(target), target);
        if outcome != TransitionOutcome::Pending(target) {
            self.inner.remove_marker(marker);
        }

        match outcome {
            TransitionOutcome::Failed(reason) => Err(self.fail_transition(target, reason)),
            TransitionOutcome::Success if target == State::Null => {
                self.inner.confirm_null(pipeline.current_state());
                Ok((TransitionOutcome::Success, done))
            }
            outcome => Ok((outcome, done)),
        }
    }

    /// Issue a state request without waiting for it to complete
    ///
    /// Returns `Pending(target)` when the engine finishes asynchronously.
    pub fn begin_transition(&self, target: State) -> Result<TransitionOutcome> {
        self.issue(target).map(|(outcome, _)| outcome)
    }

    /// Request `target` and wait until the engine confirms it
    ///
    /// An asynchronous transition completes on its own ASYNC_DONE followed
    /// by a confirmation of `target` on the bus. A later request that
    /// replaces it fails it with `Superseded`.
    pub async fn request_state(&self, target: State) -> Result<TransitionOutcome> {
        let (outcome, done) = self.issue(target)?;
        if outcome != TransitionOutcome::Pending(target) {
            return Ok(outcome);
        }

        debug!("{}: waiting for {}", self.inner.name, target);
        let completed = done.await.unwrap_or_else(|_| {
            Err(Error::Closed(format!("async-done marker for {} dropped", target)))
        });
        completed.map_err(|err| self.inner.surface(err))?;

        self.confirmed(target)
            .await
            .map_err(|err| self.inner.surface(err))?;
        Ok(TransitionOutcome::Success)
    }

    /// Wait until the bus has confirmed `target`
    ///
    /// Only called after ASYNC_DONE, so every message posted before the
    /// transition finished has already been handled.
    async fn confirmed(&self, target: State) -> Result<()> {
        let confirmation = self.inner.events.state.wait_for(target);
        if self.inner.events.state.current() == target {
            return Ok(());
        }
        confirmation.await
    }

    pub async fn ready(&self) -> Result<TransitionOutcome> {
        self.request_state(State::Ready).await
    }

    pub async fn play(&self) -> Result<TransitionOutcome> {
        self.request_state(State::Playing).await
    }

    pub async fn pause(&self) -> Result<TransitionOutcome> {
        self.request_state(State::Paused).await
    }

    pub async fn stop(&self) -> Result<TransitionOutcome> {
        self.request_state(State::Null).await
    }

    /// Wait for the next ASYNC_DONE (markers resolve oldest first)
    pub fn async_done(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let (_, rx) = self.inner.push_async_marker(None);
        async move {
            rx.await
                .map_err(|_| Error::Closed("async-done marker dropped".to_string()))?
        }
    }

    /// Send end-of-stream and wait for the EOS message
    ///
    /// Returns whether the engine accepted the event.
    pub async fn send_eos(&self) -> Result<bool> {
        let pipeline = self.usable_pipeline()?;
        let accepted = pipeline.send_eos();
        drop(pipeline);
        if !accepted {
            warn!("{}: EOS event not accepted", self.inner.name);
            return Ok(false);
        }
        debug!("{}: EOS sent", self.inner.name);
        self.wait_for_eos().await?;
        Ok(true)
    }

    /// Play, then wait for EOS or an error; does not tear down
    pub async fn play_until_eos(&self) -> Result<()> {
        match self.play().await {
            Ok(_) | Err(Error::AlreadyInState(State::Playing)) => {}
            Err(err) => return Err(err),
        }
        self.wait_for_eos().await
    }

    /// Wait for EOS; fails if an error or teardown comes first
    pub async fn wait_for_eos(&self) -> Result<()> {
        let flags = [EventFlag::Eos, EventFlag::Error, EventFlag::Teardown];
        match self.inner.events.flags.wait_any(&flags).await {
            Some(EventFlag::Eos) => Ok(()),
            _ => Err(self.inner.failure_error()),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Engine's current state, or the last confirmed one after teardown
    pub fn current_state(&self) -> State {
        match lock(&self.inner.pipeline).as_ref() {
            Some(pipeline) => pipeline.current_state(),
            None => self.inner.events.state.current(),
        }
    }

    pub fn events(&self) -> &PlayerEvents {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.event_bus.subscribe()
    }

    /// Error reported on the bus, if any
    pub fn last_error(&self) -> Option<PipelineError> {
        lock(&self.inner.failure).clone()
    }

    pub fn is_setup(&self) -> bool {
        self.inner.events.is_set(EventFlag::Setup)
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.events.is_set(EventFlag::Teardown)
    }

    /// Pipeline elements; empty once torn down
    pub fn elements(&self) -> Vec<ElementInfo> {
        lock(&self.inner.pipeline)
            .as_ref()
            .map(|p| p.elements())
            .unwrap_or_default()
    }

    pub fn sources(&self) -> Vec<ElementInfo> {
        self.elements_of_kind(ElementKind::Source)
    }

    pub fn sinks(&self) -> Vec<ElementInfo> {
        self.elements_of_kind(ElementKind::Sink)
    }

    fn elements_of_kind(&self, kind: ElementKind) -> Vec<ElementInfo> {
        self.elements().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn elements_by_factory(&self, factory: &str) -> Vec<ElementInfo> {
        self.elements()
            .into_iter()
            .filter(|e| e.factory == factory)
            .collect()
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("name", &self.inner.name)
            .field("state", &self.current_state())
            .field("flags", &self.inner.events.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::SimFactory;

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(
            TransitionOutcome::from_return(StateChangeReturn::Success, State::Ready),
            TransitionOutcome::Success
        );
        assert_eq!(
            TransitionOutcome::from_return(StateChangeReturn::NoPreroll, State::Paused),
            TransitionOutcome::Success
        );
        assert_eq!(
            TransitionOutcome::from_return(StateChangeReturn::Async, State::Playing),
            TransitionOutcome::Pending(State::Playing)
        );
        assert!(matches!(
            TransitionOutcome::from_return(StateChangeReturn::Failure, State::Ready),
            TransitionOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_operations_before_setup_fail() {
        let player = Player::from_description(&SimFactory, "fakesrc ! fakesink").unwrap();
        assert!(matches!(player.play().await, Err(Error::NotConfigured(_))));
        assert!(matches!(player.send_eos().await, Err(Error::NotConfigured(_))));
        player.teardown();
    }

    #[tokio::test]
    async fn test_setup_twice_fails() {
        let player = Player::from_description(&SimFactory, "fakesrc ! fakesink").unwrap();
        player.setup().unwrap();
        assert_eq!(player.setup(), Err(Error::AlreadyConfigured));
        player.teardown();
    }

    #[test]
    fn test_setup_without_runtime_fails() {
        let player = Player::from_description(&SimFactory, "fakesrc ! fakesink").unwrap();
        assert!(matches!(player.setup(), Err(Error::AdapterRegistration(_))));
        assert!(!player.is_setup());
    }

    #[tokio::test]
    async fn test_begin_transition_reports_pending() {
        let player = Player::from_description(&SimFactory, "fakesrc ! fakesink").unwrap();
        player.setup().unwrap();

        let outcome = player.begin_transition(State::Paused).unwrap();
        assert_eq!(outcome, TransitionOutcome::Pending(State::Paused));

        tokio::time::timeout(std::time::Duration::from_secs(1), player.events().state.wait_for(State::Paused))
            .await
            .expect("preroll completes")
            .unwrap();
        player.teardown();
    }

    #[tokio::test]
    async fn test_element_queries() {
        let player =
            Player::from_description(&SimFactory, "videotestsrc ! queue ! fakesink name=a ! fakesink")
                .unwrap();
        assert_eq!(player.sources().len(), 1);
        assert_eq!(player.sinks().len(), 2);
        assert_eq!(player.elements_by_factory("queue")[0].name, "queue0");
        player.teardown();
        assert!(player.elements().is_empty());
    }
}
