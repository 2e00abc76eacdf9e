//! Low-latency playback of a single uncompressed audio file.
//!
//! ## Pipeline
//! 1. **Load**: the control thread reads a RIFF/WAVE (or raw) file into an [`AudioBuffer`].
//! 2. **Exchange**: the buffer is installed under the buffer-exchange lock.
//! 3. **Supply**: the platform audio thread pulls frames with a try-lock and zero-fills any
//!    shortfall.
//!
//! A device disconnect closes and reopens the output stream; overlapping disconnect
//! notifications are collapsed into one restart.

pub mod buffer;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod exclusive;
pub mod loader;
pub mod playback;
pub mod restart;
pub mod session;
pub mod status;

pub use buffer::AudioBuffer;
pub use config::{EngineConfig, StreamConfiguration};
pub use engine::PlaybackEngine;
pub use error::{EngineError, Result};
pub use playback::AudioCallback;
pub use session::{OutputBackend, OutputStream, StreamFault, StreamSession};
pub use status::{EngineState, EngineStatus};
