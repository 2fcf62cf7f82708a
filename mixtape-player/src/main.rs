//! mixtape - play a pipeline until end of stream
//!
//! Builds a simulated pipeline from a description (or a named pipeline from
//! the config file), wraps it in a BoomBox with the built-in plugins, plays
//! it to EOS and tears it down. Ctrl+C or `--duration-ms` drain the pipeline
//! with an EOS first.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixtape_common::config::{load_config, resolve_pipeline};
use mixtape_common::events::PlayerEvent;
use mixtape_player::engine::sim::SimFactory;
use mixtape_player::plugins::{PipelineLibrary, StatusPlugin};
use mixtape_player::{BoomBox, HookRegistry, Player};

/// How long to wait for the pipeline to drain after an EOS is sent
const EOS_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line arguments for mixtape
#[derive(Parser, Debug)]
#[command(name = "mixtape")]
#[command(about = "Play a media pipeline until end of stream")]
#[command(version)]
struct Args {
    /// Config file (overrides MIXTAPE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(short, long, env = "MIXTAPE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Named pipeline from the config file
    #[arg(short, long)]
    pipeline: Option<String>,

    /// Send EOS after this many milliseconds of playback
    #[arg(short, long)]
    duration_ms: Option<u64>,

    /// Disable a plugin by name (repeatable)
    #[arg(long = "disable-plugin", value_name = "NAME")]
    disable_plugin: Vec<String>,

    /// Pipeline description, e.g. `videotestsrc num-buffers=100 ! fakesink`
    #[arg(trailing_var_arg = true)]
    description: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("mixtape={level},mixtape_player={level},mixtape_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mixtape v{}", env!("CARGO_PKG_VERSION"));

    let description = args.description.join(" ");
    let description = resolve_pipeline(Some(&description), args.pipeline.as_deref(), &config)
        .context("No pipeline to play")?;
    info!("Pipeline: {}", description);

    let mut hooks = HookRegistry::new()
        .with(Arc::new(StatusPlugin))
        .with(Arc::new(PipelineLibrary::new(config.pipelines.clone())));
    for name in hooks.names() {
        if !config.plugin_enabled(&name) || args.disable_plugin.contains(&name) {
            hooks.set_enabled(&name, false);
            info!("Plugin {} disabled", name);
        }
    }

    let player =
        Player::from_description(&SimFactory, &description).context("Failed to build pipeline")?;
    let boombox = BoomBox::new(player, hooks);
    boombox.setup().context("Failed to set up player")?;
    spawn_event_logger(boombox.player());

    let result = run(&boombox, args.duration_ms).await;
    boombox.teardown();
    result?;

    info!("Playback complete");
    Ok(())
}

/// Play to EOS, or drain early on timeout or Ctrl+C
async fn run(boombox: &BoomBox, duration_ms: Option<u64>) -> Result<()> {
    let playback = boombox.play_until_eos();
    tokio::pin!(playback);

    let deadline = async {
        match duration_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = &mut playback => return result.context("Playback failed"),
        _ = deadline => info!("Duration elapsed, sending EOS"),
        _ = shutdown_signal() => info!("Interrupted, sending EOS"),
    }

    let drain = async {
        match boombox.command("eos") {
            Some(command) => command.call().await,
            None => boombox.player().send_eos().await.map(|_| ()),
        }
    };
    tokio::time::timeout(EOS_TIMEOUT, drain)
        .await
        .context("Timed out waiting for EOS")?
        .context("Failed to drain pipeline")?;
    Ok(())
}

fn spawn_event_logger(player: &Player) {
    let mut rx = player.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PlayerEvent::Message { message, .. }) => {
                    trace!("Bus message {} from {}", message.kind(), message.src)
                }
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!("Player event: {}", json),
                    Err(e) => warn!("Failed to serialize {} event: {}", event.name(), e),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Event logger skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Ctrl+C handler
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
