//! Plugin hooks
//!
//! A [`Plugin`] implements any subset of the lifecycle hooks; every hook has
//! a no-op default. Plugins live in a [`HookRegistry`] that the
//! [`BoomBox`](crate::boombox::BoomBox) calls in registration order.
//!
//! Hooks are synchronous and run while the BoomBox holds its context lock,
//! so they must not call back into the BoomBox. The message, EOS and error
//! hooks run on the BoomBox's event task, in the order the player's bus
//! watch dispatched the messages.

use std::sync::Arc;
use tracing::debug;

use crate::boombox::{Command, Context};
use crate::player::Player;
use mixtape_common::{Message, PipelineError, State};

/// Lifecycle hooks around a player
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    /// Unique plugin name, used to enable or disable it
    fn name(&self) -> &str;

    /// Called once when the plugin is bound to a BoomBox
    fn plugin_init(&self, ctx: &mut Context) {}

    /// Named pipeline descriptions this plugin provides
    fn add_pipelines(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn before_setup(&self, player: &Player, ctx: &mut Context) {}

    fn setup(&self, player: &Player, ctx: &mut Context) {}

    fn teardown(&self, player: &Player, ctx: &mut Context) {}

    fn after_teardown(&self, player: &Player, ctx: &mut Context) {}

    fn before_state_changed(&self, player: &Player, ctx: &mut Context, target: State) {}

    /// Called after a requested transition succeeded
    fn on_state_changed(&self, player: &Player, ctx: &mut Context, state: State) {}

    fn on_ready(&self, player: &Player, ctx: &mut Context) {}

    fn on_pause(&self, player: &Player, ctx: &mut Context) {}

    fn on_play(&self, player: &Player, ctx: &mut Context) {}

    fn on_stop(&self, player: &Player, ctx: &mut Context) {}

    /// Every message the bus watch dispatches, children's included
    fn on_message(&self, player: &Player, ctx: &mut Context, message: &Message) {}

    fn on_eos(&self, player: &Player, ctx: &mut Context) {}

    /// Engine reported an error; teardown hooks follow
    fn on_error(&self, player: &Player, ctx: &mut Context, error: &PipelineError) {}

    /// Commands to offer; unavailable ones are filtered out by the caller
    fn register_commands(&self, player: &Player, ctx: &Context) -> Vec<Command> {
        Vec::new()
    }
}

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    enabled: bool,
}

/// Ordered set of plugins
#[derive(Default)]
pub struct HookRegistry {
    plugins: Vec<RegisteredPlugin>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.register(plugin);
        self
    }

    /// Register a plugin; a plugin with the same name is replaced in place
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        match self.plugins.iter_mut().find(|p| p.plugin.name() == name) {
            Some(existing) => {
                debug!("Replacing plugin {}", name);
                existing.plugin = plugin;
            }
            None => {
                debug!("Registered plugin {}", name);
                self.plugins.push(RegisteredPlugin {
                    plugin,
                    enabled: true,
                });
            }
        }
    }

    /// Remove a plugin by name; returns whether it was present
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.plugin.name() != name);
        self.plugins.len() < before
    }

    /// Enable or disable a plugin; returns whether it was found
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.plugins.iter_mut().find(|p| p.plugin.name() == name) {
            Some(p) => {
                p.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.plugins
            .iter()
            .any(|p| p.enabled && p.plugin.name() == name)
    }

    /// Enabled plugins in registration order
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|p| p.enabled)
            .map(|p| Arc::clone(&p.plugin))
            .collect()
    }

    /// Names of every registered plugin, enabled or not
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.plugin.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| (p.plugin.name(), p.enabled)))
            .finish()
    }
}
