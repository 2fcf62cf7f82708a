//! BoomBox: plugin-driven facade over a [`Player`]
//!
//! Runs plugin hooks around setup, teardown and every state change, and
//! keeps a registry of named commands that is rebuilt after each
//! transition. Lookups merge plugin properties with commands; a property
//! shadows a command of the same name.
//!
//! After setup an event task follows the player's broadcast and runs the
//! message, EOS and error hooks. When the player tears itself down on an
//! engine error, that task runs the teardown hooks too.

mod command;

pub use command::{Command, Context, Entry};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::bus::Scheduler;
use crate::engine::PipelineFactory;
use crate::error::{Error, Result};
use crate::hooks::{HookRegistry, Plugin};
use crate::player::{Player, TransitionOutcome};
use mixtape_common::events::PlayerEvent;
use mixtape_common::State;

/// Commands every BoomBox offers, with the state each one requests
const BASE_COMMANDS: [(&str, State); 4] = [
    ("play", State::Playing),
    ("pause", State::Paused),
    ("stop", State::Null),
    ("ready", State::Ready),
];

struct BoomBoxInner {
    player: Player,
    hooks: RwLock<HookRegistry>,
    context: Mutex<Context>,
    /// Set once the teardown hooks have run
    torn_down: AtomicBool,
}

/// Player wrapped with plugin hooks and a command registry
#[derive(Clone)]
pub struct BoomBox {
    inner: Arc<BoomBoxInner>,
}

fn base_command(name: &str, target: State, weak: Weak<BoomBoxInner>) -> Command {
    Command::new(name, move || {
        let weak = weak.clone();
        async move {
            let inner = weak.upgrade().ok_or(Error::TornDown)?;
            BoomBox { inner }.request_state(target).await.map(|_| ())
        }
    })
}

impl BoomBox {
    /// Bind a player and plugins; runs `plugin_init` and builds the registry
    pub fn new(player: Player, hooks: HookRegistry) -> Self {
        let boombox = Self {
            inner: Arc::new(BoomBoxInner {
                player,
                hooks: RwLock::new(hooks),
                context: Mutex::new(Context::new()),
                torn_down: AtomicBool::new(false),
            }),
        };
        for plugin in boombox.plugins() {
            debug!("Initialising plugin {}", plugin.name());
            plugin.plugin_init(&mut boombox.context());
        }
        boombox.rebuild();
        boombox
    }

    /// Build and set up a player for a pipeline some plugin provides
    ///
    /// The first plugin in registration order that offers `name` wins.
    pub fn from_plugins(
        factory: &dyn PipelineFactory,
        hooks: HookRegistry,
        name: &str,
    ) -> Result<Self> {
        let description = hooks
            .plugins()
            .iter()
            .find_map(|plugin| {
                plugin
                    .add_pipelines()
                    .into_iter()
                    .find(|(pipeline, _)| pipeline == name)
                    .map(|(_, description)| description)
            })
            .ok_or_else(|| Error::PipelineNotFound(name.to_string()))?;

        info!("Pipeline '{}': {}", name, description);
        let boombox = Self::new(Player::from_description(factory, &description)?, hooks);
        boombox.setup()?;
        Ok(boombox)
    }

    fn context(&self) -> MutexGuard<'_, Context> {
        self.inner
            .context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.inner
            .hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .plugins()
    }

    fn each_hook<F>(&self, hook: F)
    where
        F: Fn(&dyn Plugin, &Player, &mut Context),
    {
        for plugin in self.plugins() {
            hook(plugin.as_ref(), &self.inner.player, &mut self.context());
        }
    }

    pub fn player(&self) -> &Player {
        &self.inner.player
    }

    /// Enable or disable a plugin by name; returns whether it exists
    pub fn set_plugin_enabled(&self, name: &str, enabled: bool) -> bool {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_enabled(name, enabled)
    }

    pub fn setup(&self) -> Result<()> {
        self.each_hook(|p, player, ctx| p.before_setup(player, ctx));
        let events = self.inner.player.subscribe();
        self.inner.player.setup()?;
        self.spawn_event_task(events)?;
        self.each_hook(|p, player, ctx| p.setup(player, ctx));
        self.rebuild();
        Ok(())
    }

    pub fn teardown(&self) {
        if !self.claim_teardown() {
            self.inner.player.teardown();
            return;
        }
        self.each_hook(|p, player, ctx| p.teardown(player, ctx));
        self.inner.player.teardown();
        self.each_hook(|p, player, ctx| p.after_teardown(player, ctx));
    }

    /// True for the first caller only
    fn claim_teardown(&self) -> bool {
        !self.inner.torn_down.swap(true, Ordering::SeqCst)
    }

    fn spawn_event_task(&self, mut events: broadcast::Receiver<PlayerEvent>) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        Scheduler::current()?.submit(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("BoomBox skipped {} player events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !(BoomBox { inner }).on_player_event(event) {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Run the hooks for one player event; false once the player is gone
    fn on_player_event(&self, event: PlayerEvent) -> bool {
        match event {
            PlayerEvent::Message { message, .. } => {
                self.each_hook(|p, player, ctx| p.on_message(player, ctx, &message));
            }
            PlayerEvent::Eos { .. } => {
                self.each_hook(|p, player, ctx| p.on_eos(player, ctx));
            }
            PlayerEvent::Error { error, .. } => {
                self.each_hook(|p, player, ctx| p.on_error(player, ctx, &error));
            }
            PlayerEvent::StateChanged { .. } => {}
            PlayerEvent::TornDown { .. } => {
                if self.claim_teardown() {
                    info!("{}: player tore itself down", self.inner.player.name());
                    self.each_hook(|p, player, ctx| p.teardown(player, ctx));
                    self.each_hook(|p, player, ctx| p.after_teardown(player, ctx));
                }
                self.rebuild();
                return false;
            }
        }
        true
    }

    /// Request a state through the plugin hooks
    ///
    /// The command registry is rebuilt afterwards whether or not the
    /// transition succeeded.
    pub async fn request_state(&self, target: State) -> Result<TransitionOutcome> {
        self.each_hook(|p, player, ctx| p.before_state_changed(player, ctx, target));

        let result = self.inner.player.request_state(target).await;

        if result.is_ok() {
            self.each_hook(|p, player, ctx| {
                p.on_state_changed(player, ctx, target);
                match target {
                    State::Ready => p.on_ready(player, ctx),
                    State::Paused => p.on_pause(player, ctx),
                    State::Playing => p.on_play(player, ctx),
                    State::Null => p.on_stop(player, ctx),
                    State::VoidPending => {}
                }
            });
        }

        self.rebuild();
        result
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

    /// Hooked `play`, then wait for end of stream
    pub async fn play_until_eos(&self) -> Result<()> {
        match self.play().await {
            Ok(_) | Err(Error::AlreadyInState(State::Playing)) => {}
            Err(err) => return Err(err),
        }
        self.inner.player.wait_for_eos().await
    }

    /// Rebuild the command registry and swap it in whole
    fn rebuild(&self) {
        let mut commands: HashMap<String, Command> = BASE_COMMANDS
            .iter()
            .map(|(name, target)| {
                let command = base_command(name, *target, Arc::downgrade(&self.inner));
                (name.to_string(), command)
            })
            .collect();

        let plugins = self.plugins();
        let mut ctx = self.context();
        for plugin in plugins {
            for command in plugin.register_commands(&self.inner.player, &ctx) {
                if command.is_available() {
                    commands.insert(command.name().to_string(), command);
                } else {
                    debug!("Command {} from {} unavailable", command.name(), plugin.name());
                }
            }
        }
        ctx.replace_commands(commands);
    }

    /// Property or command by name; properties shadow commands
    pub fn get(&self, name: &str) -> Option<Entry> {
        self.context().get(name)
    }

    pub fn command(&self, name: &str) -> Option<Command> {
        self.context().command(name).cloned()
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.context().property(name).cloned()
    }

    /// Sorted names of the currently registered commands
    pub fn commands(&self) -> Vec<String> {
        self.context().command_names()
    }

    /// Sorted names of the current properties
    pub fn properties(&self) -> Vec<String> {
        self.context().property_names()
    }

    /// Run a registered command
    pub async fn call(&self, name: &str) -> Result<()> {
        let command = self
            .command(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
        info!("Running command {}", name);
        command.call().await
    }
}

impl std::fmt::Debug for BoomBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoomBox")
            .field("player", &self.inner.player)
            .field("commands", &self.commands())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::SimFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Shadow;

    impl Plugin for Shadow {
        fn name(&self) -> &str {
            "shadow"
        }

        fn plugin_init(&self, ctx: &mut Context) {
            ctx.set_property("play", "not a command");
        }
    }

    struct Counting {
        inits: AtomicUsize,
    }

    impl Plugin for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn plugin_init(&self, _ctx: &mut Context) {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn boombox(hooks: HookRegistry) -> BoomBox {
        let player = Player::from_description(&SimFactory, "fakesrc ! fakesink").unwrap();
        BoomBox::new(player, hooks)
    }

    #[test]
    fn test_base_commands_registered_on_creation() {
        let boombox = boombox(HookRegistry::new());
        assert_eq!(boombox.commands(), vec!["pause", "play", "ready", "stop"]);
        boombox.teardown();
    }

    #[test]
    fn test_plugin_init_runs_once() {
        let counting = Arc::new(Counting {
            inits: AtomicUsize::new(0),
        });
        let boombox = boombox(HookRegistry::new().with(counting.clone()));
        assert_eq!(counting.inits.load(Ordering::SeqCst), 1);
        boombox.teardown();
    }

    #[test]
    fn test_property_wins_over_command() {
        let boombox = boombox(HookRegistry::new().with(Arc::new(Shadow)));
        assert!(matches!(boombox.get("play"), Some(Entry::Property(_))));
        assert!(boombox.command("play").is_some());
        assert!(matches!(boombox.get("pause"), Some(Entry::Command(_))));
        boombox.teardown();
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let boombox = boombox(HookRegistry::new());
        assert_eq!(
            boombox.call("rewind").await,
            Err(Error::UnknownCommand("rewind".to_string()))
        );
        boombox.teardown();
    }

    #[test]
    fn test_from_plugins_unknown_name() {
        let result = BoomBox::from_plugins(&SimFactory, HookRegistry::new(), "nowhere");
        assert!(matches!(result, Err(Error::PipelineNotFound(_))));
    }
}
