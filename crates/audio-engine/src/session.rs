//! Output stream session.
//!
//! [`StreamSession`] owns at most one platform output stream and drives its
//! open → start → stop → close transitions. The platform itself sits behind
//! [`OutputBackend`]/[`OutputStream`] so the engine can run against cpal in production
//! and against a recording fake in tests.

use std::sync::Arc;

use crate::config::StreamConfiguration;
use crate::error::{EngineError, Result};
use crate::playback::AudioCallback;

/// Asynchronous failure reported by the platform after a stream was opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFault {
    /// The output device went away (headphones unplugged, USB DAC removed, ...).
    Disconnected,
    /// Any other backend error; logged, no recovery action.
    Backend(String),
}

/// Receives [`StreamFault`]s from whatever thread the platform reports them on.
pub type FaultHandler = Arc<dyn Fn(StreamFault) + Send + Sync>;

/// Platform factory for output streams.
pub trait OutputBackend: Send + Sync {
    /// Open an output stream that pulls samples from `callback`.
    ///
    /// The stream is opened but not started. `on_fault` must be invoked for errors the
    /// platform reports while the stream is alive.
    fn open(
        &self,
        config: &StreamConfiguration,
        callback: Arc<dyn AudioCallback>,
        on_fault: FaultHandler,
    ) -> Result<Box<dyn OutputStream>>;
}

/// An opened platform output stream.
pub trait OutputStream: Send {
    /// Minimum callback granularity reported by the device.
    fn frames_per_burst(&self) -> u32;
    /// Request a buffer size; returns the size actually applied by the platform.
    fn set_buffer_size_in_frames(&mut self, frames: u32) -> Result<u32>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Release the platform stream. The stream is unusable afterwards.
    fn close(&mut self) -> Result<()>;
}

/// Owner of the current output stream (if any).
#[derive(Default)]
pub struct StreamSession {
    stream: Option<Box<dyn OutputStream>>,
    frames_per_burst: Option<u32>,
    buffer_size_frames: Option<u32>,
}

impl StreamSession {
    /// A session with no stream; every transition is a no-op.
    pub fn closed() -> Self {
        Self::default()
    }

    /// Open a stream with `callback` registered as its data source.
    ///
    /// Records the device burst size and immediately shrinks the buffer to a single burst.
    pub fn open(
        backend: &dyn OutputBackend,
        config: &StreamConfiguration,
        callback: Arc<dyn AudioCallback>,
        on_fault: FaultHandler,
    ) -> Result<Self> {
        let mut stream = backend.open(config, callback, on_fault)?;

        let frames_per_burst = stream.frames_per_burst();
        let buffer_size_frames = match stream.set_buffer_size_in_frames(frames_per_burst) {
            Ok(applied) => Some(applied),
            Err(e) => {
                tracing::warn!(frames_per_burst, "could not set buffer size: {e}");
                None
            }
        };
        tracing::info!(
            frames_per_burst,
            buffer_size_frames = ?buffer_size_frames,
            channels = config.channel_count,
            rate_hz = config.sample_rate,
            "output stream opened"
        );

        Ok(Self {
            stream: Some(stream),
            frames_per_burst: Some(frames_per_burst),
            buffer_size_frames,
        })
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn frames_per_burst(&self) -> Option<u32> {
        self.frames_per_burst
    }

    pub fn buffer_size_frames(&self) -> Option<u32> {
        self.buffer_size_frames
    }

    /// Ask the platform to begin invoking the data callback. Not retried on failure.
    pub fn start(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(EngineError::NoStream)?;
        stream.start().inspect_err(|e| {
            tracing::error!("error starting stream: {e}");
        })
    }

    /// Stop the stream. No-op when nothing is open; failures are logged and returned.
    pub fn stop(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        stream.stop().inspect_err(|e| {
            tracing::error!("error stopping output stream: {e}");
        })
    }

    /// Stop and release the stream. No-op when nothing is open.
    ///
    /// The session is always left closed, even when the platform reports an error, so a
    /// fresh stream can be opened afterwards.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.frames_per_burst = None;
        self.buffer_size_frames = None;

        let stopped = stream.stop().inspect_err(|e| {
            tracing::error!("error stopping output stream: {e}");
        });
        let closed = stream.close().inspect_err(|e| {
            tracing::error!("error closing output stream: {e}");
        });
        tracing::debug!("output stream closed");
        stopped.and(closed)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
