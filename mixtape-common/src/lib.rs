//! # Mixtape Common Library
//!
//! Shared code for the mixtape crates:
//! - Engine-facing value types (pipeline states, bus messages)
//! - Player event types and the broadcast EventBus
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{Message, MessageBody, MessageKind, PipelineError, State, StateChangeReturn};
