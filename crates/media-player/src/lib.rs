//! Host-facing facade over the playback engine.
//!
//! `play_file` is fire-and-forget and `is_playing` is a lock-free poll; engine errors
//! are logged, never returned.

pub mod cli;
pub mod runtime;

use std::path::Path;
use std::sync::Arc;

use audio_engine::{EngineConfig, EngineStatus, OutputBackend, PlaybackEngine};

/// Cheap-to-clone handle; clones share one engine and one output stream.
#[derive(Clone)]
pub struct MediaPlayer {
    engine: Arc<PlaybackEngine>,
}

impl MediaPlayer {
    /// Open the output stream immediately. Failure is only visible in the logs.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: Arc::new(PlaybackEngine::new(config)),
        }
    }

    pub fn with_backend(config: EngineConfig, backend: Arc<dyn OutputBackend>) -> Self {
        Self {
            engine: Arc::new(PlaybackEngine::with_backend(config, backend)),
        }
    }

    pub fn play_file(&self, path: impl AsRef<Path>) {
        let _ = self.engine.play_file(path);
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    /// Stop the stream for every clone of this handle.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
