//! Error taxonomy for the audio engine.
//!
//! None of these cross the facade boundary: the engine logs them where they occur and
//! leaves itself in a degraded-but-usable state (silent output, `is_playing() == false`).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures raised by the loader, the stream session, or the platform backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The audio file could not be opened (missing, permissions, ...).
    #[error("could not open {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading or seeking inside an already opened file failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The container is not RIFF/WAVE (or has no `data` chunk).
    ///
    /// The loader recovers from this by reading the file as raw samples.
    #[error("unrecognized container: {0}")]
    Format(String),

    /// The platform refused to open, start, stop, or close the output stream.
    #[error("output device error: {0}")]
    Device(String),

    /// A stream operation was requested while no stream is open.
    #[error("no output stream is open")]
    NoStream,
}

impl EngineError {
    /// Shorthand for [`EngineError::Device`] from any displayable platform error.
    pub fn device(err: impl std::fmt::Display) -> Self {
        Self::Device(err.to_string())
    }
}
