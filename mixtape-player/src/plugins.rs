//! Built-in plugins

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::boombox::{Command, Context};
use crate::error::Error;
use crate::hooks::Plugin;
use crate::player::Player;
use mixtape_common::State;

/// Publishes pipeline status properties and an `eos` command
///
/// Properties: `pipeline` (name), `elements` (element names), `state`
/// (last state reached through the BoomBox). The `eos` command is only
/// offered while the pipeline is PLAYING.
#[derive(Debug, Default)]
pub struct StatusPlugin;

impl StatusPlugin {
    pub const NAME: &'static str = "status";
}

impl Plugin for StatusPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn setup(&self, player: &Player, ctx: &mut Context) {
        let elements: Vec<Value> = player.elements().into_iter().map(|e| json!(e.name)).collect();
        ctx.set_property("pipeline", player.name());
        ctx.set_property("elements", elements);
        ctx.set_property("state", player.current_state().name());
    }

    fn on_state_changed(&self, _player: &Player, ctx: &mut Context, state: State) {
        ctx.set_property("state", state.name());
    }

    fn after_teardown(&self, player: &Player, ctx: &mut Context) {
        ctx.remove_property("elements");
        ctx.set_property("state", player.current_state().name());
    }

    fn register_commands(&self, player: &Player, _ctx: &Context) -> Vec<Command> {
        let sender = player.clone();
        let probe = player.clone();
        let eos = Command::new("eos", move || {
            let player = sender.clone();
            async move {
                if player.send_eos().await? {
                    Ok(())
                } else {
                    Err(Error::Command(format!(
                        "eos: {} did not accept the event",
                        player.name()
                    )))
                }
            }
        })
        .available_when(move || probe.current_state() == State::Playing);
        vec![eos]
    }
}

/// Offers the named pipelines of the configuration file
#[derive(Debug, Default)]
pub struct PipelineLibrary {
    pipelines: BTreeMap<String, String>,
}

impl PipelineLibrary {
    pub const NAME: &'static str = "pipelines";

    pub fn new(pipelines: BTreeMap<String, String>) -> Self {
        Self { pipelines }
    }
}

impl Plugin for PipelineLibrary {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn plugin_init(&self, ctx: &mut Context) {
        let names: Vec<Value> = self.pipelines.keys().map(|n| json!(n)).collect();
        ctx.set_property("pipelines", names);
    }

    fn add_pipelines(&self) -> Vec<(String, String)> {
        self.pipelines
            .iter()
            .map(|(name, description)| (name.clone(), description.clone()))
            .collect()
    }
}
