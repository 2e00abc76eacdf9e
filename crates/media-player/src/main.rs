//! Media Player — plays one WAV file through a low-latency output stream and exits when
//! playback finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use audio_engine::EngineConfig;
use clap::Parser;
use media_player::{MediaPlayer, cli, runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_engine=info,media_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let path = args.path.clone().ok_or_else(|| anyhow!("missing filename"))?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = stop.clone();
    ctrlc::set_handler(move || stop_for_signal.store(true, Ordering::Relaxed))
        .context("install ctrl-c handler")?;

    let config = EngineConfig::default()
        .with_device(args.device.clone())
        .with_looping(args.looping);
    let player = MediaPlayer::new(config);

    let finished = runtime::play_until_done(
        &player,
        &path,
        Duration::from_millis(args.poll_ms.max(1)),
        &stop,
    );
    tracing::info!(finished, "playback ended");

    player.shutdown();
    if args.status_json {
        let status = serde_json::to_string_pretty(&player.status()).context("encode status")?;
        println!("{status}");
    }
    Ok(())
}
