//! Media engine collaborator contract
//!
//! The player never builds or links elements itself. It drives an engine
//! through the [`Pipeline`] trait and listens to the engine's message channel
//! through [`MessageSource`]. A simulated engine lives in [`sim`].

pub mod sim;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::Result;
use mixtape_common::{Message, State, StateChangeReturn};

/// Role of an element in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Source,
    Filter,
    Sink,
}

/// Description of one element of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub name: String,
    /// Factory the element was made from (`fakesink`, `queue`, ...)
    pub factory: String,
    pub kind: ElementKind,
    pub properties: BTreeMap<String, String>,
}

/// Handle on an engine pipeline (the graph root)
pub trait Pipeline: Send + Sync {
    /// Name of the pipeline root; pipeline-level messages carry it as `src`
    fn name(&self) -> &str;

    /// Request a state change
    fn set_state(&self, target: State) -> StateChangeReturn;

    /// Current committed state, without waiting for pending transitions
    fn current_state(&self) -> State;

    /// Send an end-of-stream event into the graph; returns whether it was accepted
    fn send_eos(&self) -> bool;

    /// Every element of the graph, sources first
    fn elements(&self) -> Vec<ElementInfo>;

    /// The pipeline's message channel
    fn bus(&self) -> Arc<dyn MessageSource>;
}

/// Engine message channel
pub trait MessageSource: Send + Sync {
    /// Pollable readiness descriptor; None if the channel cannot be polled
    fn poll_fd(&self) -> Option<PollFd>;

    /// Pop the next message without blocking
    fn pop(&self) -> Option<Message>;
}

/// Builds pipelines from textual descriptions (`src ! filter ! sink`)
pub trait PipelineFactory: Send + Sync {
    fn parse_launch(&self, description: &str) -> Result<Arc<dyn Pipeline>>;
}

static NEXT_FD: AtomicU64 = AtomicU64::new(3);

struct PollFdInner {
    fd: u64,
    pending: AtomicUsize,
    closed: AtomicBool,
    watched: AtomicBool,
    notify: Notify,
}

/// Level-triggered readiness descriptor of a message channel
///
/// The engine raises it once per posted message and lowers it once per
/// popped message; it stays readable while messages remain. Safe to raise
/// from any thread.
#[derive(Clone)]
pub struct PollFd {
    inner: Arc<PollFdInner>,
}

impl PollFd {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PollFdInner {
                fd: NEXT_FD.fetch_add(1, Ordering::Relaxed),
                pending: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                watched: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Descriptor number, unique per process
    pub fn fd(&self) -> u64 {
        self.inner.fd
    }

    /// Signal one more queued message
    pub fn raise(&self) {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.inner.notify.notify_waiters();
    }

    /// Acknowledge one popped message
    pub fn lower(&self) {
        let _ = self
            .inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Drop all readiness (the channel was flushed)
    pub fn clear(&self) {
        self.inner.pending.store(0, Ordering::Release);
    }

    /// Invalidate the descriptor and wake any watcher
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_readable(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire) > 0
    }

    /// Wait until the descriptor is readable or closed
    pub async fn readable(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_readable() || !self.is_valid() {
                return;
            }
            notified.await;
        }
    }

    /// Claim the descriptor for a watcher; false if another watcher holds it
    pub(crate) fn try_watch(&self) -> bool {
        self.inner
            .watched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_watch(&self) {
        self.inner.watched.store(false, Ordering::Release);
    }
}

impl Default for PollFd {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PollFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollFd")
            .field("fd", &self.inner.fd)
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .field("valid", &self.is_valid())
            .finish()
    }
}
