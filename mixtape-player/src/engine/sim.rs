//! Simulated media engine
//!
//! Reproduces the control-plane behaviour of a real engine without moving
//! any media: step-wise state changes, ASYNC prerolling completed from a
//! streaming thread, NO_PREROLL for live sources, synchronous FAILURE for a
//! `filesrc` without `location`, EOS/ERROR from sources while playing, and
//! bus flushing on NULL.
//!
//! Description syntax: `factory key=value ... ! factory ... ! factory`.
//!
//! Simulation properties:
//! - sources: `num-buffers=N` (EOS after N ms of playing), `error-after=N`
//!   (ERROR after N ms of playing), `is-live=true`
//! - sinks: `async=false`, `preroll-ms=N` (default 5), `qos=true`

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

use super::{ElementInfo, ElementKind, MessageSource, Pipeline, PipelineFactory, PollFd};
use crate::error::{Error, Result};
use mixtape_common::events::QosInfo;
use mixtape_common::{Message, MessageBody, State, StateChangeReturn};

const DEFAULT_PREROLL_MS: u64 = 5;

static NEXT_PIPELINE: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Bus
// ============================================================================

/// In-memory message channel with a level-triggered descriptor
pub struct SimBus {
    queue: Mutex<VecDeque<Message>>,
    fd: PollFd,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fd: PollFd::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Post a message; callable from any thread
    pub fn post(&self, message: Message) {
        trace!("bus post: {:?}", message);
        let mut queue = self.queue();
        queue.push_back(message);
        // Raised under the lock so readiness always matches the queue length
        self.fd.raise();
    }

    /// Drop every queued message
    pub fn flush(&self) {
        let mut queue = self.queue();
        if !queue.is_empty() {
            debug!("Flushing {} bus message(s)", queue.len());
        }
        queue.clear();
        self.fd.clear();
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalidate the readiness descriptor
    pub fn close(&self) {
        self.fd.close();
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSource for SimBus {
    fn poll_fd(&self) -> Option<PollFd> {
        Some(self.fd.clone())
    }

    fn pop(&self) -> Option<Message> {
        let mut queue = self.queue();
        let message = queue.pop_front();
        if message.is_some() {
            self.fd.lower();
        }
        message
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds [`SimPipeline`]s from descriptions
#[derive(Debug, Clone, Copy, Default)]
pub struct SimFactory;

impl PipelineFactory for SimFactory {
    fn parse_launch(&self, description: &str) -> Result<Arc<dyn Pipeline>> {
        Ok(Arc::new(SimPipeline::parse(description)?))
    }
}

fn parse_elements(description: &str) -> Result<Vec<ElementInfo>> {
    if description.trim().is_empty() {
        return Err(Error::InvalidDescription("empty description".to_string()));
    }

    let mut counters: BTreeMap<String, usize> = BTreeMap::new();
    let mut elements = Vec::new();

    for segment in description.split('!') {
        let mut tokens = segment.split_whitespace();
        let factory = tokens
            .next()
            .ok_or_else(|| Error::InvalidDescription(format!("empty link in '{}'", description)))?;
        if !factory
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidDescription(format!("bad element name '{}'", factory)));
        }

        let mut properties = BTreeMap::new();
        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| {
                    Error::InvalidDescription(format!("bad property '{}' on {}", token, factory))
                })?;
            properties.insert(key.to_string(), value.trim_matches('"').to_string());
        }

        let index = counters.entry(factory.to_string()).or_insert(0);
        let name = properties
            .get("name")
            .cloned()
            .unwrap_or_else(|| format!("{}{}", factory, index));
        *index += 1;

        let kind = if factory.ends_with("src") {
            ElementKind::Source
        } else if factory.ends_with("sink") {
            ElementKind::Sink
        } else {
            ElementKind::Filter
        };

        elements.push(ElementInfo {
            name,
            factory: factory.to_string(),
            kind,
            properties,
        });
    }

    Ok(elements)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Behaviour derived from element properties
#[derive(Debug, Clone)]
struct Behaviour {
    live: bool,
    async_preroll: bool,
    preroll_ms: u64,
    missing_location: Option<String>,
    num_buffers: Option<u64>,
    error_after: Option<(String, u64)>,
    qos_sink: Option<String>,
}

impl Behaviour {
    fn from_elements(elements: &[ElementInfo]) -> Self {
        fn prop<'a>(element: &'a ElementInfo, key: &str) -> Option<&'a str> {
            element.properties.get(key).map(String::as_str)
        }

        let sources = elements.iter().filter(|e| e.kind == ElementKind::Source);
        let sinks: Vec<&ElementInfo> = elements
            .iter()
            .filter(|e| e.kind == ElementKind::Sink)
            .collect();

        let live = sources.clone().any(|e| prop(e, "is-live") == Some("true"));
        let async_preroll = sinks.iter().any(|e| prop(e, "async") != Some("false"));
        let preroll_ms = sinks
            .iter()
            .filter_map(|e| prop(e, "preroll-ms").and_then(|v| v.parse().ok()))
            .max()
            .unwrap_or(DEFAULT_PREROLL_MS);
        let missing_location = sources
            .clone()
            .find(|e| e.factory == "filesrc" && prop(e, "location").is_none())
            .map(|e| e.name.clone());
        let num_buffers = sources
            .clone()
            .filter_map(|e| prop(e, "num-buffers").and_then(|v| v.parse().ok()))
            .min();
        let error_after = sources
            .clone()
            .find_map(|e| {
                prop(e, "error-after")
                    .and_then(|v| v.parse().ok())
                    .map(|ms| (e.name.clone(), ms))
            });
        let qos_sink = sinks
            .iter()
            .find(|e| prop(e, "qos") == Some("true"))
            .map(|e| e.name.clone());

        Self {
            live,
            async_preroll,
            preroll_ms,
            missing_location,
            num_buffers,
            error_after,
            qos_sink,
        }
    }
}

#[derive(Debug)]
struct SimState {
    current: State,
    pending: State,
    target: State,
    /// Bumped to cancel an in-flight preroll
    preroll_gen: u64,
    /// Bumped to stop the streaming thread
    stream_gen: u64,
    eos_requested: bool,
    eos_posted: bool,
}

struct SimShared {
    name: String,
    elements: Vec<ElementInfo>,
    behaviour: Behaviour,
    bus: Arc<SimBus>,
    state: Mutex<SimState>,
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Commit one state step and post its STATE_CHANGED messages
    fn commit(self: &Arc<Self>, st: &mut SimState, step: State) {
        let old = st.current;
        st.current = step;
        let pending = if step == st.target { State::VoidPending } else { st.target };

        // Children report before the pipeline itself
        for element in self.elements.iter().rev() {
            self.bus
                .post(Message::state_changed(&element.name, old, step, pending));
        }
        self.bus
            .post(Message::state_changed(&self.name, old, step, pending));

        if step == State::Playing {
            st.stream_gen += 1;
            self.start_streaming(st.stream_gen);
        }
    }

    fn start_preroll(self: &Arc<Self>, generation: u64) {
        let shared = Arc::clone(self);
        let delay = Duration::from_millis(self.behaviour.preroll_ms);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            let mut st = shared.lock();
            if st.preroll_gen != generation || st.current != State::Ready {
                return;
            }
            debug!("{}: preroll complete", shared.name);
            shared.commit(&mut st, State::Paused);
            while let Some(step) = st.current.step_towards(st.target) {
                shared.commit(&mut st, step);
            }
            st.pending = State::VoidPending;
            shared.bus.post(Message::async_done(&shared.name));
        });
    }

    fn start_streaming(self: &Arc<Self>, generation: u64) {
        let shared = Arc::clone(self);
        std::thread::spawn(move || {
            if let Some(sink) = &shared.behaviour.qos_sink {
                shared.bus.post(Message::new(
                    sink.as_str(),
                    MessageBody::Qos(QosInfo {
                        live: shared.behaviour.live,
                        running_time: 0,
                        stream_time: 0,
                        timestamp: 0,
                        duration: 1_000_000,
                    }),
                ));
            }

            let mut elapsed_ms: u64 = 0;
            loop {
                std::thread::sleep(Duration::from_millis(1));
                elapsed_ms += 1;

                let mut st = shared.lock();
                if st.stream_gen != generation || st.current != State::Playing {
                    return;
                }
                if st.eos_posted {
                    return;
                }
                if st.eos_requested {
                    st.eos_posted = true;
                    shared.bus.post(Message::eos(&shared.name));
                    return;
                }
                if let Some((source, after)) = &shared.behaviour.error_after {
                    if elapsed_ms >= *after {
                        shared.bus.post(Message::error(
                            source.as_str(),
                            "Internal data stream error.",
                            Some(format!("streaming stopped, reason error ({})", source)),
                        ));
                        return;
                    }
                }
                if let Some(limit) = shared.behaviour.num_buffers {
                    if elapsed_ms >= limit {
                        st.eos_posted = true;
                        shared.bus.post(Message::eos(&shared.name));
                        return;
                    }
                }
            }
        });
    }
}

/// Simulated pipeline
pub struct SimPipeline {
    shared: Arc<SimShared>,
}

impl SimPipeline {
    /// Parse a description into a pipeline in the NULL state
    pub fn parse(description: &str) -> Result<Self> {
        let elements = parse_elements(description)?;
        let behaviour = Behaviour::from_elements(&elements);
        let name = format!("pipeline{}", NEXT_PIPELINE.fetch_add(1, Ordering::Relaxed));
        debug!("Created {} from '{}'", name, description);

        Ok(Self {
            shared: Arc::new(SimShared {
                name,
                elements,
                behaviour,
                bus: Arc::new(SimBus::new()),
                state: Mutex::new(SimState {
                    current: State::Null,
                    pending: State::VoidPending,
                    target: State::Null,
                    preroll_gen: 0,
                    stream_gen: 0,
                    eos_requested: false,
                    eos_posted: false,
                }),
            }),
        })
    }

    /// Concrete bus handle, for injecting messages
    pub fn sim_bus(&self) -> Arc<SimBus> {
        Arc::clone(&self.shared.bus)
    }

    /// State the pipeline is transitioning to, VOID_PENDING when idle
    pub fn pending_state(&self) -> State {
        self.shared.lock().pending
    }
}

impl Pipeline for SimPipeline {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn set_state(&self, target: State) -> StateChangeReturn {
        if target == State::VoidPending {
            return StateChangeReturn::Failure;
        }

        let shared = &self.shared;
        let mut st = shared.lock();
        st.target = target;
        // Any new request supersedes an in-flight preroll
        st.preroll_gen += 1;
        st.pending = State::VoidPending;

        if target == State::Null {
            st.stream_gen += 1;
            st.current = State::Null;
            st.eos_requested = false;
            st.eos_posted = false;
            // Auto-flush: nothing queued survives NULL
            shared.bus.flush();
            return StateChangeReturn::Success;
        }

        let mut result = StateChangeReturn::Success;
        while let Some(step) = st.current.step_towards(target) {
            if st.current == State::Null && step == State::Ready {
                if let Some(source) = &shared.behaviour.missing_location {
                    shared.bus.post(Message::error(
                        source.as_str(),
                        "Resource not found.",
                        Some("No file name specified for reading.".to_string()),
                    ));
                    st.target = st.current;
                    return StateChangeReturn::Failure;
                }
            }

            if st.current == State::Ready && step == State::Paused {
                if shared.behaviour.live {
                    result = StateChangeReturn::NoPreroll;
                } else if shared.behaviour.async_preroll {
                    st.pending = target;
                    let generation = st.preroll_gen;
                    shared.start_preroll(generation);
                    return StateChangeReturn::Async;
                }
            }

            shared.commit(&mut st, step);
        }
        result
    }

    fn current_state(&self) -> State {
        self.shared.lock().current
    }

    fn send_eos(&self) -> bool {
        let mut st = self.shared.lock();
        if st.current == State::Null {
            return false;
        }
        st.eos_requested = true;
        true
    }

    fn elements(&self) -> Vec<ElementInfo> {
        self.shared.elements.clone()
    }

    fn bus(&self) -> Arc<dyn MessageSource> {
        self.shared.bus.clone()
    }
}

impl Drop for SimPipeline {
    fn drop(&mut self) {
        let mut st = self.shared.lock();
        st.preroll_gen += 1;
        st.stream_gen += 1;
        drop(st);
        self.shared.bus.close();
    }
}
