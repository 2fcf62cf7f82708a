//! Error types for mixtape-player
//!
//! Errors are `Clone` because one pipeline failure is delivered to every
//! task suspended on the same player.

use mixtape_common::{PipelineError, State};
use thiserror::Error;

/// Main error type for mixtape-player
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Operation attempted before `setup()`
    #[error("Player not configured: {0}")]
    NotConfigured(String),

    /// `setup()` called twice
    #[error("Player has already been set up")]
    AlreadyConfigured,

    /// Redundant transition request
    #[error("Pipeline is already in state {0}")]
    AlreadyInState(State),

    /// Engine synchronously rejected a state change
    #[error("Failed to set pipeline state to {target}: {reason}")]
    SetStateFailure { target: State, reason: String },

    /// Engine reported an error on its message channel
    #[error("Pipeline error: {0}")]
    PipelineFailure(PipelineError),

    /// Bus watch could not be registered
    #[error("Bus registration error: {0}")]
    AdapterRegistration(String),

    /// A later request replaced this one before the engine completed it
    #[error("Transition to {target} superseded by a request for {by}")]
    Superseded { target: State, by: State },

    /// Operation attempted after `teardown()`
    #[error("Player has been torn down")]
    TornDown,

    /// A wait ended because its producer went away
    #[error("Wait aborted: {0}")]
    Closed(String),

    /// Pipeline description could not be parsed
    #[error("Invalid pipeline description: {0}")]
    InvalidDescription(String),

    /// No plugin provides a pipeline with this name
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// No command registered under this name
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A plugin command failed
    #[error("Command error: {0}")]
    Command(String),
}

impl From<PipelineError> for Error {
    fn from(err: PipelineError) -> Self {
        Error::PipelineFailure(err)
    }
}

/// Convenience Result type using mixtape-player Error
pub type Result<T> = std::result::Result<T, Error>;
