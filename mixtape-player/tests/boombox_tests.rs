//! Integration tests for the BoomBox facade and plugin hooks

mod helpers;

use helpers::*;
use mixtape_common::{MessageKind, State};
use mixtape_player::engine::sim::SimFactory;
use mixtape_player::plugins::{PipelineLibrary, StatusPlugin};
use mixtape_player::{BoomBox, Entry, Error, EventFlag, HookRegistry, Player, Plugin};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn boombox_with(description: &str, hooks: HookRegistry) -> BoomBox {
    let player = Player::from_description(&SimFactory, description).expect("valid description");
    BoomBox::new(player, hooks)
}

// ============================================================================
// Hook ordering
// ============================================================================

/// **Given:** A BoomBox with a recording plugin
/// **When:** It is set up, played and torn down
/// **Then:** Hooks fire in lifecycle order, shortcut hook after on_state_changed
#[tokio::test]
async fn test_hook_order_through_lifecycle() {
    let recorder = Arc::new(RecordingPlugin::new("recorder"));
    let boombox = boombox_with(SYNC_PIPELINE, HookRegistry::new().with(recorder.clone()));

    boombox.setup().unwrap();
    timed(boombox.play()).await.unwrap();
    boombox.teardown();

    assert_eq!(
        recorder.calls(),
        vec![
            "plugin_init",
            "before_setup",
            "setup",
            "before_state_changed:PLAYING",
            "on_state_changed:PLAYING",
            "on_play",
            "teardown",
            "after_teardown",
        ]
    );
}

#[tokio::test]
async fn test_failed_transition_skips_success_hooks() {
    let recorder = Arc::new(RecordingPlugin::new("recorder"));
    let boombox = boombox_with(BROKEN_PIPELINE, HookRegistry::new().with(recorder.clone()));
    boombox.setup().unwrap();

    let err = timed(boombox.play()).await.unwrap_err();
    assert!(matches!(err, Error::SetStateFailure { .. }));

    // Registry still rebuilt after the failure
    assert_eq!(boombox.commands(), vec!["pause", "play", "ready", "stop"]);

    // The player tore itself down, so the event task runs the teardown hooks
    wait_until(|| recorder.has_call("after_teardown")).await;
    let calls = recorder.calls();
    assert!(!calls.iter().any(|c| c == "on_play"));
    assert_eq!(
        &calls[calls.len() - 3..],
        ["before_state_changed:PLAYING", "teardown", "after_teardown"]
    );

    boombox.teardown();
    assert_eq!(recorder.calls().len(), calls.len());
}

#[tokio::test]
async fn test_disabled_plugin_is_skipped() {
    let recorder = Arc::new(RecordingPlugin::new("recorder"));
    let boombox = boombox_with(SYNC_PIPELINE, HookRegistry::new().with(recorder.clone()));

    assert!(boombox.set_plugin_enabled("recorder", false));
    boombox.setup().unwrap();
    timed(boombox.play()).await.unwrap();
    boombox.teardown();

    assert_eq!(recorder.calls(), vec!["plugin_init"]);
}

// ============================================================================
// Bus event hooks
// ============================================================================

/// **Given:** A pipeline that reaches EOS on its own
/// **When:** It is played to the end
/// **Then:** on_eos fires once and on_message saw every bus message kind
#[tokio::test]
async fn test_eos_and_message_hooks() {
    let recorder = Arc::new(RecordingPlugin::new("recorder"));
    let boombox = boombox_with(FINITE_PIPELINE, HookRegistry::new().with(recorder.clone()));
    boombox.setup().unwrap();

    timed(boombox.play_until_eos()).await.unwrap();
    wait_until(|| recorder.has_call("on_eos")).await;

    let kinds = recorder.message_kinds();
    assert!(kinds.contains(&MessageKind::StateChanged));
    assert!(kinds.contains(&MessageKind::AsyncDone));
    assert_eq!(kinds.last(), Some(&MessageKind::Eos));

    boombox.teardown();
    assert_eq!(recorder.calls().iter().filter(|c| *c == "on_eos").count(), 1);
}

/// **Given:** A BoomBox whose pipeline errors while playing
/// **When:** The player tears itself down
/// **Then:** on_error runs, then the teardown hooks, and status properties
///   reflect the released pipeline
#[tokio::test]
async fn test_engine_error_runs_error_and_teardown_hooks() {
    let recorder = Arc::new(RecordingPlugin::new("recorder"));
    let hooks = HookRegistry::new()
        .with(Arc::new(StatusPlugin))
        .with(recorder.clone());
    let boombox = boombox_with(ERRORING_PIPELINE, hooks);
    boombox.setup().unwrap();

    let err = timed(boombox.play_until_eos()).await.unwrap_err();
    assert!(matches!(err, Error::PipelineFailure(_)), "got {:?}", err);

    wait_until(|| recorder.has_call("after_teardown")).await;
    let calls = recorder.calls();
    let error_at = calls.iter().position(|c| c == "on_error:fakesrc0").expect("on_error ran");
    let teardown_at = calls.iter().position(|c| c == "teardown").expect("teardown ran");
    assert!(error_at < teardown_at);

    assert_eq!(boombox.property("state"), Some(json!("NULL")));
    assert!(boombox.property("elements").is_none());
    assert!(boombox.command("eos").is_none());

    // Hooks already ran; an explicit teardown does not repeat them
    boombox.teardown();
    assert_eq!(recorder.calls().iter().filter(|c| *c == "teardown").count(), 1);
}

// ============================================================================
// Command registry
// ============================================================================

/// **Given:** A plugin offering a command only while PLAYING
/// **When:** The pipeline is played, then paused
/// **Then:** The registry holds the base four plus the command only while PLAYING
#[tokio::test]
async fn test_registry_follows_availability() {
    let recorder = Arc::new(RecordingPlugin::new("recorder").with_playing_command("seek"));
    let boombox = boombox_with(SYNC_PIPELINE, HookRegistry::new().with(recorder));
    boombox.setup().unwrap();

    assert_eq!(boombox.commands(), vec!["pause", "play", "ready", "stop"]);

    timed(boombox.play()).await.unwrap();
    assert_eq!(boombox.commands(), vec!["pause", "play", "ready", "seek", "stop"]);

    timed(boombox.pause()).await.unwrap();
    assert_eq!(boombox.commands(), vec!["pause", "play", "ready", "stop"]);

    boombox.teardown();
}

#[tokio::test]
async fn test_base_commands_route_through_hooks() {
    let recorder = Arc::new(RecordingPlugin::new("recorder"));
    let boombox = boombox_with(SYNC_PIPELINE, HookRegistry::new().with(recorder.clone()));
    boombox.setup().unwrap();

    timed(boombox.call("ready")).await.unwrap();

    assert_eq!(boombox.player().current_state(), State::Ready);
    assert!(recorder.calls().iter().any(|c| c == "on_ready"));
    boombox.teardown();
}

#[tokio::test]
async fn test_status_plugin_properties_and_eos_command() {
    let boombox = boombox_with(ASYNC_PIPELINE, HookRegistry::new().with(Arc::new(StatusPlugin)));
    boombox.setup().unwrap();

    assert_eq!(boombox.property("pipeline"), Some(json!(boombox.player().name())));
    assert_eq!(
        boombox.property("elements"),
        Some(json!(["videotestsrc0", "queue0", "fakesink0"]))
    );
    assert!(boombox.command("eos").is_none());

    timed(boombox.play()).await.unwrap();
    assert_eq!(boombox.property("state"), Some(json!("PLAYING")));
    assert!(matches!(boombox.get("eos"), Some(Entry::Command(_))));

    timed(boombox.call("eos")).await.unwrap();
    assert!(boombox.player().events().is_set(EventFlag::Eos));

    boombox.teardown();
    assert_eq!(boombox.property("state"), Some(json!("NULL")));
    assert!(boombox.property("elements").is_none());
}

#[tokio::test]
async fn test_eos_command_reports_rejected_event() {
    let boombox = boombox_with(ASYNC_PIPELINE, HookRegistry::new().with(Arc::new(StatusPlugin)));
    boombox.setup().unwrap();
    timed(boombox.play()).await.unwrap();
    let eos = boombox.command("eos").expect("offered while PLAYING");

    // Stopped behind the BoomBox's back, so the registry still offers eos
    timed(boombox.player().stop()).await.unwrap();
    assert!(matches!(timed(eos.call()).await, Err(Error::Command(_))));

    boombox.teardown();
}

// ============================================================================
// Pipelines from plugins
// ============================================================================

#[tokio::test]
async fn test_from_plugins_first_provider_wins() {
    let mut first = BTreeMap::new();
    first.insert("demo".to_string(), FINITE_PIPELINE.to_string());
    let mut second = BTreeMap::new();
    second.insert("demo".to_string(), BROKEN_PIPELINE.to_string());

    let hooks = HookRegistry::new()
        .with(Arc::new(PipelineLibrary::new(first)))
        .with(Arc::new(RecordingPlugin::new("shadowed")));
    // A second library under another name offering the same pipeline
    let hooks = hooks.with(Arc::new(NamedLibrary(PipelineLibrary::new(second))));

    let boombox = BoomBox::from_plugins(&SimFactory, hooks, "demo").expect("pipeline found");
    assert!(boombox.player().is_setup());
    assert_eq!(boombox.player().sources()[0].factory, "videotestsrc");

    timed(boombox.play_until_eos()).await.unwrap();
    boombox.teardown();
}

#[tokio::test]
async fn test_from_plugins_uses_plugin_pipeline_names() {
    let hooks = HookRegistry::new().with(Arc::new(RecordingPlugin::new("rec")));
    let boombox = BoomBox::from_plugins(&SimFactory, hooks, "rec-pipeline").unwrap();
    assert_eq!(boombox.player().sinks().len(), 1);
    boombox.teardown();

    let hooks = HookRegistry::new().with(Arc::new(RecordingPlugin::new("rec")));
    assert!(matches!(
        BoomBox::from_plugins(&SimFactory, hooks, "other"),
        Err(Error::PipelineNotFound(_))
    ));
}

/// Library registered under a different plugin name
struct NamedLibrary(PipelineLibrary);

impl Plugin for NamedLibrary {
    fn name(&self) -> &str {
        "second-library"
    }

    fn add_pipelines(&self) -> Vec<(String, String)> {
        self.0.add_pipelines()
    }
}
