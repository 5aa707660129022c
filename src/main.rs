mod args;
mod audio;
mod error;
mod pipeline;
mod text;
mod tts;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::Args;
use crate::audio::PlayerCommand;
use crate::pipeline::{Phase, SpeakConfig, Speaker};
use crate::tts::GoogleTranslateTts;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let text = args.input_text()?;
    if text.trim().is_empty() {
        warn!("Nothing to say");
        return Ok(());
    }

    let timeout = args.timeout_secs.map(Duration::from_secs);
    let synthesizer = GoogleTranslateTts::new(&args.endpoint, timeout)?;
    let config = SpeakConfig {
        max_length: args.max_length,
        work_dir: std::env::temp_dir().join(format!("speak-{}", std::process::id())),
        player: PlayerCommand::mplayer(&args.player),
    };
    let speaker = Speaker::new(config, Arc::new(synthesizer));

    let controller = speaker.controller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Interrupted, stopping");
        controller.stop();
        // a second Ctrl-C exits even if cleanup is stuck
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted again, exiting");
            std::process::exit(130);
        }
    });

    speaker.speak(&text, &args.language, args.speed).await;
    if speaker.state().phase() == Phase::Stopped {
        std::process::exit(130);
    }
    Ok(())
}
