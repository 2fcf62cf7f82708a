//! Pipeline state type definitions
//!
//! Mirrors the state model of the media engine: a pipeline moves between
//! NULL, READY, PAUSED and PLAYING one step at a time, and VOID_PENDING marks
//! "no pending state".

use serde::{Deserialize, Serialize};

/// Pipeline state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// No pending state
    VoidPending,
    /// Initial state, no resources allocated
    Null,
    /// Resources allocated, not prerolled
    Ready,
    /// Prerolled, clock stopped
    Paused,
    /// Data flowing, clock running
    Playing,
}

impl State {
    /// All real states in transition order (VOID_PENDING excluded)
    pub const ORDERED: [State; 4] = [State::Null, State::Ready, State::Paused, State::Playing];

    /// Engine name of the state
    pub fn name(self) -> &'static str {
        match self {
            State::VoidPending => "VOID_PENDING",
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }

    fn rank(self) -> Option<usize> {
        State::ORDERED.iter().position(|s| *s == self)
    }

    /// Next state one step towards `target`, or None when already there
    ///
    /// Engines never jump: NULL → PLAYING passes READY and PAUSED.
    pub fn step_towards(self, target: State) -> Option<State> {
        let from = self.rank()?;
        let to = target.rank()?;
        match from.cmp(&to) {
            std::cmp::Ordering::Less => Some(State::ORDERED[from + 1]),
            std::cmp::Ordering::Greater => Some(State::ORDERED[from - 1]),
            std::cmp::Ordering::Equal => None,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Return code of an engine `set_state` call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateChangeReturn {
    /// Transition completed synchronously
    Success,
    /// Transition will complete later; a STATE_CHANGED message follows
    Async,
    /// Transition failed
    Failure,
    /// Transition completed, but the pipeline cannot preroll (live source)
    NoPreroll,
}

impl std::fmt::Display for StateChangeReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateChangeReturn::Success => write!(f, "SUCCESS"),
            StateChangeReturn::Async => write!(f, "ASYNC"),
            StateChangeReturn::Failure => write!(f, "FAILURE"),
            StateChangeReturn::NoPreroll => write!(f, "NO_PREROLL"),
        }
    }
}
