//! Process-level helpers: device listing and the play-and-poll loop.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use audio_engine::device;

use crate::MediaPlayer;

/// Print available output devices to stdout.
pub fn list_devices() -> Result<()> {
    let names = device::list_device_names().context("list output devices")?;
    for (i, name) in names.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Start `path` and poll until playback finishes or `stop` is raised.
///
/// Returns `true` when playback reached its natural end.
pub fn play_until_done(
    player: &MediaPlayer,
    path: &Path,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> bool {
    player.play_file(path);
    while player.is_playing() {
        if stop.load(Ordering::Relaxed) {
            tracing::info!("interrupted");
            return false;
        }
        thread::sleep(poll_interval);
    }
    !stop.load(Ordering::Relaxed)
}
