//! Test helpers for mixtape-player integration tests
//!
//! Provides:
//! - Pipeline descriptions for the simulated engine
//! - Player construction with access to the injectable bus
//! - `timed`: bounded await that fails the test instead of hanging
//! - RecordingPlugin: records every hook invocation

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mixtape_common::{Message, MessageKind, PipelineError, State};
use mixtape_player::engine::sim::{SimBus, SimPipeline};
use mixtape_player::{Command, Context, Player, Plugin};

/// Prerolls asynchronously, plays forever
pub const ASYNC_PIPELINE: &str = "videotestsrc ! queue ! fakesink";
/// Every transition completes synchronously
pub const SYNC_PIPELINE: &str = "fakesrc ! fakesink async=false";
/// Reaches EOS shortly after PLAYING
pub const FINITE_PIPELINE: &str = "videotestsrc num-buffers=20 ! fakesink";
/// Fails NULL → READY (no location)
pub const BROKEN_PIPELINE: &str = "filesrc ! fakesink";
/// Posts an ERROR shortly after PLAYING
pub const ERRORING_PIPELINE: &str = "fakesrc error-after=10 ! fakesink";
/// Prerolls slowly enough to inject messages while a play is suspended
pub const SLOW_PIPELINE: &str = "fakesrc ! fakesink preroll-ms=500";

pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Build a player and keep a handle on its bus
pub fn player_with_bus(description: &str) -> (Player, Arc<SimBus>) {
    let pipeline = SimPipeline::parse(description).expect("valid description");
    let bus = pipeline.sim_bus();
    (Player::new(Arc::new(pipeline)), bus)
}

/// Build and set up a player (call from inside a runtime)
pub fn setup_player(description: &str) -> (Player, Arc<SimBus>) {
    let (player, bus) = player_with_bus(description);
    player.setup().expect("setup succeeds");
    (player, bus)
}

/// Await `future`, failing the test if it takes longer than [`TIMEOUT`]
pub async fn timed<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("operation timed out")
}

/// Poll `condition` until it holds, failing the test after [`TIMEOUT`]
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    timed(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
}

/// True if `future` is still pending after `ms` milliseconds
pub async fn still_pending<F: Future + Unpin>(future: &mut F, ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), future).await.is_err()
}

/// Plugin that records every hook call in order
#[derive(Default)]
pub struct RecordingPlugin {
    name: String,
    calls: Arc<Mutex<Vec<String>>>,
    /// Kinds seen by on_message, kept apart from `calls`
    messages: Arc<Mutex<Vec<MessageKind>>>,
    /// Extra command offered while the pipeline is PLAYING
    playing_command: Option<String>,
}

impl RecordingPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_playing_command(mut self, command: &str) -> Self {
        self.playing_command = Some(command.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn message_kinds(&self) -> Vec<MessageKind> {
        self.messages.lock().unwrap().clone()
    }

    pub fn has_call(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_init(&self, _ctx: &mut Context) {
        self.record("plugin_init");
    }

    fn add_pipelines(&self) -> Vec<(String, String)> {
        vec![(format!("{}-pipeline", self.name), SYNC_PIPELINE.to_string())]
    }

    fn before_setup(&self, _player: &Player, _ctx: &mut Context) {
        self.record("before_setup");
    }

    fn setup(&self, _player: &Player, _ctx: &mut Context) {
        self.record("setup");
    }

    fn teardown(&self, _player: &Player, _ctx: &mut Context) {
        self.record("teardown");
    }

    fn after_teardown(&self, _player: &Player, _ctx: &mut Context) {
        self.record("after_teardown");
    }

    fn before_state_changed(&self, _player: &Player, _ctx: &mut Context, target: State) {
        self.record(format!("before_state_changed:{}", target));
    }

    fn on_state_changed(&self, _player: &Player, _ctx: &mut Context, state: State) {
        self.record(format!("on_state_changed:{}", state));
    }

    fn on_ready(&self, _player: &Player, _ctx: &mut Context) {
        self.record("on_ready");
    }

    fn on_pause(&self, _player: &Player, _ctx: &mut Context) {
        self.record("on_pause");
    }

    fn on_play(&self, _player: &Player, _ctx: &mut Context) {
        self.record("on_play");
    }

    fn on_stop(&self, _player: &Player, _ctx: &mut Context) {
        self.record("on_stop");
    }

    fn on_message(&self, _player: &Player, _ctx: &mut Context, message: &Message) {
        self.messages.lock().unwrap().push(message.kind());
    }

    fn on_eos(&self, _player: &Player, _ctx: &mut Context) {
        self.record("on_eos");
    }

    fn on_error(&self, _player: &Player, _ctx: &mut Context, error: &PipelineError) {
        self.record(format!("on_error:{}", error.source));
    }

    fn register_commands(&self, player: &Player, _ctx: &Context) -> Vec<Command> {
        match &self.playing_command {
            Some(name) => {
                let probe = player.clone();
                vec![Command::new(name.clone(), || async { Ok(()) })
                    .available_when(move || probe.current_state() == State::Playing)]
            }
            None => Vec::new(),
        }
    }
}
