//! Bus message type definitions
//!
//! Messages are produced by the engine on its message channel and consumed
//! one at a time by the player's bus watch.

use serde::{Deserialize, Serialize};

use super::State;

/// Error reported by the engine on its message channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineError {
    /// Name of the element that raised the error
    pub source: String,
    /// Human readable error message
    pub message: String,
    /// Optional debugging details from the engine
    pub debug: Option<String>,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Quality-of-service timing fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosInfo {
    pub live: bool,
    pub running_time: u64,
    pub stream_time: u64,
    pub timestamp: u64,
    pub duration: u64,
}

/// Message classification used to pick a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    StateChanged,
    Error,
    Eos,
    AsyncDone,
    Qos,
    Other,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::StateChanged => write!(f, "state-changed"),
            MessageKind::Error => write!(f, "error"),
            MessageKind::Eos => write!(f, "eos"),
            MessageKind::AsyncDone => write!(f, "async-done"),
            MessageKind::Qos => write!(f, "qos"),
            MessageKind::Other => write!(f, "other"),
        }
    }
}

/// Kind-specific message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    StateChanged {
        old: State,
        new: State,
        pending: State,
    },
    Error {
        message: String,
        debug: Option<String>,
    },
    Eos,
    AsyncDone {
        /// Running time in nanoseconds, if the engine reported one
        running_time: Option<u64>,
    },
    Qos(QosInfo),
    /// Any message type without a dedicated handler
    Other {
        type_name: String,
    },
}

/// A single message popped from the engine's message channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Name of the posting element (the pipeline itself for pipeline-level messages)
    pub src: String,
    pub body: MessageBody,
}

impl Message {
    pub fn new(src: impl Into<String>, body: MessageBody) -> Self {
        Self {
            src: src.into(),
            body,
        }
    }

    pub fn state_changed(src: impl Into<String>, old: State, new: State, pending: State) -> Self {
        Self::new(src, MessageBody::StateChanged { old, new, pending })
    }

    pub fn error(src: impl Into<String>, message: impl Into<String>, debug: Option<String>) -> Self {
        Self::new(
            src,
            MessageBody::Error {
                message: message.into(),
                debug,
            },
        )
    }

    pub fn eos(src: impl Into<String>) -> Self {
        Self::new(src, MessageBody::Eos)
    }

    pub fn async_done(src: impl Into<String>) -> Self {
        Self::new(src, MessageBody::AsyncDone { running_time: None })
    }

    pub fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::StateChanged { .. } => MessageKind::StateChanged,
            MessageBody::Error { .. } => MessageKind::Error,
            MessageBody::Eos => MessageKind::Eos,
            MessageBody::AsyncDone { .. } => MessageKind::AsyncDone,
            MessageBody::Qos(_) => MessageKind::Qos,
            MessageBody::Other { .. } => MessageKind::Other,
        }
    }

    /// Parse a STATE_CHANGED payload into (old, new, pending)
    pub fn parse_state_changed(&self) -> Option<(State, State, State)> {
        match self.body {
            MessageBody::StateChanged { old, new, pending } => Some((old, new, pending)),
            _ => None,
        }
    }

    /// Parse an ERROR payload into a [`PipelineError`] attributed to `src`
    pub fn parse_error(&self) -> Option<PipelineError> {
        match &self.body {
            MessageBody::Error { message, debug } => Some(PipelineError {
                source: self.src.clone(),
                message: message.clone(),
                debug: debug.clone(),
            }),
            _ => None,
        }
    }

    pub fn parse_qos(&self) -> Option<QosInfo> {
        match self.body {
            MessageBody::Qos(info) => Some(info),
            _ => None,
        }
    }
}
