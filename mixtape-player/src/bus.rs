//! Bus watch: bridges the engine's message channel onto the tokio runtime
//!
//! A [`BusWatch`] owns one spawned task that waits on the channel's
//! readiness descriptor, pops one message per wake-up and dispatches it
//! through a [`HandlerTable`]. Handlers run synchronously on that task; work
//! that resumes another task goes through the [`Scheduler`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::engine::{MessageSource, PollFd};
use crate::error::{Error, Result};
use mixtape_common::{Message, MessageKind};

/// Synchronous message handler
pub type Handler = Box<dyn Fn(&Message) + Send + Sync>;

/// Message kind to handler mapping, with a fallback for unmapped kinds
pub struct HandlerTable {
    handlers: HashMap<MessageKind, Handler>,
    default: Handler,
}

impl HandlerTable {
    /// Empty table whose fallback logs and drops messages
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default: Box::new(|message: &Message| {
                debug!("Unhandled {:?} message from {}", message.kind(), message.src);
            }),
        }
    }

    pub fn on<F>(mut self, kind: MessageKind, handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    pub fn with_default<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.default = Box::new(handler);
        self
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Invoke the handler for the message's kind, or the fallback
    pub fn dispatch(&self, message: &Message) {
        match self.handlers.get(&message.kind()) {
            Some(handler) => handler(message),
            None => (self.default)(message),
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on the runtime that owns the bus watch
///
/// Safe to use from any thread; submitted work always runs on the runtime,
/// never inline on the calling thread.
#[derive(Clone, Debug)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    /// Scheduler for the runtime running on this thread
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|e| Error::AdapterRegistration(format!("no running runtime: {}", e)))
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `callback` on the runtime at its next opportunity
    pub fn call_soon_threadsafe<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { callback() });
    }

    /// Run a future on the runtime and hand back its join handle
    pub fn submit<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

/// Pop at most one message and dispatch it; false on a spurious wake-up
pub fn on_ready(source: &dyn MessageSource, handlers: &HandlerTable) -> bool {
    match source.pop() {
        Some(message) => {
            trace!("Dispatching {:?} from {}", message.kind(), message.src);
            handlers.dispatch(&message);
            true
        }
        None => false,
    }
}

/// Registration of a handler table on a message channel
pub struct BusWatch {
    fd: PollFd,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BusWatch {
    /// Start watching `source` on the scheduler's runtime
    ///
    /// Fails if the channel has no valid descriptor or is already watched.
    pub fn register(
        source: Arc<dyn MessageSource>,
        handlers: HandlerTable,
        scheduler: &Scheduler,
    ) -> Result<Self> {
        let fd = source
            .poll_fd()
            .ok_or_else(|| Error::AdapterRegistration("message source has no poll descriptor".to_string()))?;
        if !fd.is_valid() {
            return Err(Error::AdapterRegistration(format!("descriptor {} is closed", fd.fd())));
        }
        if !fd.try_watch() {
            return Err(Error::AdapterRegistration(format!(
                "descriptor {} is already watched",
                fd.fd()
            )));
        }

        let cancel = CancellationToken::new();
        let task = scheduler.submit(watch_loop(source, handlers, fd.clone(), cancel.clone()));
        debug!("Bus watch registered on fd {}", fd.fd());

        Ok(Self {
            fd,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn fd(&self) -> &PollFd {
        &self.fd
    }

    pub fn is_registered(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop watching; idempotent
    ///
    /// Safe to call from inside a handler: the task finishes the current
    /// dispatch and exits.
    pub fn unregister(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.fd.release_watch();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(task);
        debug!("Bus watch on fd {} unregistered", self.fd.fd());
    }
}

impl Drop for BusWatch {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for BusWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusWatch")
            .field("fd", &self.fd.fd())
            .field("registered", &self.is_registered())
            .finish()
    }
}

async fn watch_loop(
    source: Arc<dyn MessageSource>,
    handlers: HandlerTable,
    fd: PollFd,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = fd.readable() => {}
        }

        if cancel.is_cancelled() {
            break;
        }
        if !fd.is_valid() {
            warn!("Descriptor {} closed, stopping bus watch", fd.fd());
            break;
        }

        on_ready(source.as_ref(), &handlers);

        // One message per wake-up; let other tasks run in between
        tokio::task::yield_now().await;
    }
    trace!("Bus watch loop on fd {} exited", fd.fd());
}
