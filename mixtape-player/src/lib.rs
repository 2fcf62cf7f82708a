//! # mixtape-player
//!
//! Awaitable control of media-engine pipelines.
//!
//! **Layers (bottom up):**
//! - [`engine`]: collaborator contract plus a simulated engine
//! - [`state`] / [`events`]: waitable state and lifecycle flags
//! - [`bus`]: readiness-driven message dispatch onto the tokio runtime
//! - [`player`]: the awaitable pipeline controller
//! - [`boombox`] / [`hooks`] / [`plugins`]: plugin facade with commands

pub mod boombox;
pub mod bus;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod player;
pub mod plugins;
pub mod state;

pub use boombox::{BoomBox, Command, Context, Entry};
pub use bus::{BusWatch, HandlerTable, Scheduler};
pub use error::{Error, Result};
pub use events::{EventFlag, EventFlags, PlayerEvents};
pub use hooks::{HookRegistry, Plugin};
pub use player::{Player, TransitionOutcome};
pub use state::WaitableState;
