//! Playback engine: wires loader → buffer exchange → output stream, and recovers from
//! device disconnects.
//!
//! Construction opens and starts a stream immediately. Failures anywhere are logged and
//! leave the engine usable but silent; nothing here panics across the facade.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;

use crate::buffer::AudioBuffer;
use crate::config::{CHANNEL_COUNT, EngineConfig, StreamConfiguration};
use crate::device::CpalBackend;
use crate::error::Result;
use crate::loader;
use crate::playback::{AudioCallback, PlaybackState};
use crate::restart::{RestartGuard, RestartOutcome};
use crate::session::{FaultHandler, OutputBackend, StreamFault, StreamSession};
use crate::status::{EngineState, EngineStatus, StateCell};

/// Plays one in-memory audio buffer at a time through a low-latency output stream.
///
/// Dropping the engine stops and closes the stream.
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    this: Weak<EngineInner>,
    backend: Arc<dyn OutputBackend>,
    stream_config: StreamConfiguration,
    playback: Arc<PlaybackState>,
    session: Mutex<StreamSession>,
    restart: RestartGuard,
    state: StateCell,
    /// Bumped on every open; fault handlers carry the value they were created with.
    generation: AtomicU64,
}

impl PlaybackEngine {
    /// Open the configured CPAL output device and start streaming silence.
    pub fn new(config: EngineConfig) -> Self {
        let backend = Arc::new(CpalBackend::new(config.device.clone()));
        Self::with_backend(config, backend)
    }

    /// Same as [`PlaybackEngine::new`] with an explicit platform backend.
    pub fn with_backend(config: EngineConfig, backend: Arc<dyn OutputBackend>) -> Self {
        let inner = Arc::new_cyclic(|this| EngineInner {
            this: this.clone(),
            backend,
            stream_config: config.stream,
            playback: Arc::new(PlaybackState::new(CHANNEL_COUNT, config.looping)),
            session: Mutex::new(StreamSession::closed()),
            restart: RestartGuard::new(),
            state: StateCell::new(EngineState::Uninitialized),
            generation: AtomicU64::new(0),
        });

        let session = inner.create_playback_stream();
        *inner.lock_session() = session;
        Self { inner }
    }

    /// Load `path` and make it the playing buffer, replacing whatever was playing.
    ///
    /// Blocks on file I/O. On failure the error is logged, nothing is installed, and the
    /// output stays silent.
    pub fn play_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let result = self.inner.playback.exchange(|| {
            let loaded = loader::load(path)?;
            tracing::info!(
                path = %path.display(),
                total_frames = loaded.total_frames,
                container = ?loaded.container,
                "file loaded"
            );
            Ok(AudioBuffer::new(loaded.samples, CHANNEL_COUNT))
        });

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(path = %path.display(), "could not play file: {e}");
                Err(e)
            }
        }
    }

    /// `true` while a buffer is installed and has not reached end of data.
    pub fn is_playing(&self) -> bool {
        self.inner.playback.is_playing()
    }

    pub fn state(&self) -> EngineState {
        self.inner.state.get()
    }

    pub fn status(&self) -> EngineStatus {
        let (frames_per_burst, buffer_size_frames) = {
            let session = self.inner.lock_session();
            (session.frames_per_burst(), session.buffer_size_frames())
        };
        let cursor = self.inner.playback.cursor();
        EngineStatus {
            state: self.state(),
            playing: self.is_playing(),
            total_frames: cursor.map(|(_, total)| total),
            read_frame_index: cursor.map(|(index, _)| index),
            frames_per_burst,
            buffer_size_frames,
            skipped_callbacks: self.inner.playback.skipped_callbacks(),
            restarts_performed: self.inner.restart.performed(),
            restarts_skipped: self.inner.restart.skipped(),
        }
    }

    /// Handle a fault against the current stream, synchronously on the calling thread.
    ///
    /// Returns the restart outcome for [`StreamFault::Disconnected`], `None` otherwise.
    pub fn handle_stream_fault(&self, fault: StreamFault) -> Option<RestartOutcome> {
        match fault {
            StreamFault::Disconnected => self.inner.handle_disconnect(None),
            StreamFault::Backend(message) => {
                tracing::warn!("stream error: {message}");
                None
            }
        }
    }

    /// Stop and close the stream and drop any installed buffer. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl EngineInner {
    fn lock_session(&self) -> MutexGuard<'_, StreamSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a stream with the shared playback state as its callback and start it.
    ///
    /// Failures are logged; the returned session is closed when open failed.
    fn create_playback_stream(&self) -> StreamSession {
        let callback: Arc<dyn AudioCallback> = self.playback.clone();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut session = match StreamSession::open(
            self.backend.as_ref(),
            &self.stream_config,
            callback,
            self.fault_handler(generation),
        ) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("failed to create stream: {e}");
                self.state.set(EngineState::Closed);
                return StreamSession::closed();
            }
        };
        self.state.set(EngineState::StreamOpen);

        if session.start().is_ok() {
            self.state.set(EngineState::Running);
        }
        session
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Fault callback registered with the stream opened as `generation`.
    ///
    /// Runs on a platform thread. Backend errors are only logged. A disconnect from the
    /// current stream moves to a short-lived `stream-restart` thread; the restart guard
    /// decides which of several such threads does the work.
    fn fault_handler(&self, generation: u64) -> FaultHandler {
        let this = self.this.clone();
        Arc::new(move |fault: StreamFault| {
            let message = match fault {
                StreamFault::Backend(message) => message,
                StreamFault::Disconnected => {
                    let Some(inner) = this.upgrade() else {
                        return;
                    };
                    if !inner.is_current(generation) {
                        tracing::debug!(generation, "disconnect from a replaced stream; ignoring");
                        return;
                    }
                    drop(inner);
                    let this = this.clone();
                    let spawned = thread::Builder::new()
                        .name("stream-restart".to_string())
                        .spawn(move || {
                            if let Some(inner) = this.upgrade() {
                                inner.handle_disconnect(Some(generation));
                            }
                        });
                    if let Err(e) = spawned {
                        tracing::error!("could not spawn restart thread: {e}");
                    }
                    return;
                }
            };
            tracing::warn!(generation, "stream error: {message}");
        })
    }

    /// `origin` is the generation that reported the disconnect; `None` means the current one.
    fn handle_disconnect(&self, origin: Option<u64>) -> Option<RestartOutcome> {
        if self.state.get() == EngineState::Closed {
            tracing::debug!("disconnect after shutdown; ignoring");
            return None;
        }
        tracing::warn!("output device disconnected");
        Some(self.restart_stream(origin))
    }

    fn restart_stream(&self, origin: Option<u64>) -> RestartOutcome {
        let is_current = || origin.is_none_or(|generation| self.is_current(generation));
        self.restart.try_restart_if(&self.session, is_current, || {
            // The state is checked under the session lock, which shutdown also takes.
            if self.state.get() == EngineState::Closed {
                return None;
            }
            self.state.set(EngineState::ErrorDisconnected);
            self.state.set(EngineState::Restarting);
            Some(self.create_playback_stream())
        })
    }

    fn shutdown(&self) {
        let was_open = {
            let mut session = self.lock_session();
            self.state.set(EngineState::Closed);
            let was_open = session.is_open();
            let _ = session.close();
            was_open
        };
        self.playback.clear();
        if was_open {
            tracing::debug!("closing play engine");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::session::fake::{Call, FakeBackend, OpenGate};

    fn write_wav(dir: &Path, name: &str, frames: usize, value: i16) -> std::path::PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..frames * 2 {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn engine_with(backend: &Arc<FakeBackend>) -> PlaybackEngine {
        let backend_dyn: Arc<dyn OutputBackend> = backend.clone();
        PlaybackEngine::with_backend(EngineConfig::default(), backend_dyn)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn construction_opens_and_starts_stream() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        assert_eq!(engine.state(), EngineState::Running);
        assert!(!engine.is_playing());
        assert_eq!(
            backend.calls(),
            vec![Call::Open, Call::SetBufferSize(192), Call::Start]
        );
        let status = engine.status();
        assert_eq!(status.frames_per_burst, Some(192));
        assert_eq!(status.buffer_size_frames, Some(192));
    }

    #[test]
    fn construction_failure_is_not_fatal() {
        let backend = Arc::new(FakeBackend::new(192));
        backend.fail_open.store(true, Ordering::SeqCst);
        let engine = engine_with(&backend);

        assert_eq!(engine.state(), EngineState::Closed);
        assert!(!engine.is_playing());
        assert_eq!(engine.status().frames_per_burst, None);
    }

    #[test]
    fn start_failure_leaves_stream_open() {
        let backend = Arc::new(FakeBackend::new(192));
        backend.fail_start.store(true, Ordering::SeqCst);
        let engine = engine_with(&backend);
        assert_eq!(engine.state(), EngineState::StreamOpen);
    }

    #[test]
    fn play_file_installs_buffer_and_plays_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "short.wav", 300, 1000);
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        engine.play_file(&path).unwrap();
        assert!(engine.is_playing());
        assert_eq!(engine.status().total_frames, Some(300));

        let first = backend.pull(192);
        assert!(first.iter().all(|&s| s == 1000));
        assert!(engine.is_playing());

        let second = backend.pull(192);
        assert!(second[..108 * 2].iter().all(|&s| s == 1000));
        assert!(second[108 * 2..].iter().all(|&s| s == 0));
        assert!(!engine.is_playing());

        assert!(backend.pull(192).iter().all(|&s| s == 0));
    }

    #[test]
    fn play_missing_file_reports_error_and_stays_silent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        assert!(engine.play_file(dir.path().join("nope.wav")).is_err());
        assert!(!engine.is_playing());
        assert!(backend.pull(64).iter().all(|&s| s == 0));
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn play_file_replaces_previous_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_wav(dir.path(), "a.wav", 1000, 1);
        let second = write_wav(dir.path(), "b.wav", 1000, 2);
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        engine.play_file(&first).unwrap();
        backend.pull(100);
        engine.play_file(&second).unwrap();

        let out = backend.pull(100);
        assert!(out.iter().all(|&s| s == 2));
        assert_eq!(engine.status().read_frame_index, Some(100));
    }

    #[test]
    fn failed_play_file_discards_previous_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_wav(dir.path(), "a.wav", 1000, 1);
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        engine.play_file(&good).unwrap();
        assert!(engine.play_file(dir.path().join("missing.wav")).is_err());
        assert!(!engine.is_playing());
    }

    #[test]
    fn disconnect_restarts_stream() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        let outcome = engine.handle_stream_fault(StreamFault::Disconnected);
        assert_eq!(outcome, Some(RestartOutcome::Performed { stream_open: true }));
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        assert_eq!(
            backend.calls(),
            vec![
                Call::Open,
                Call::SetBufferSize(192),
                Call::Start,
                Call::Stop,
                Call::Close,
                Call::Open,
                Call::SetBufferSize(192),
                Call::Start,
            ]
        );
        assert_eq!(engine.status().restarts_performed, 1);
    }

    #[test]
    fn playback_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "long.wav", 10_000, 7);
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        engine.play_file(&path).unwrap();
        backend.pull(192);
        engine.handle_stream_fault(StreamFault::Disconnected);

        assert!(engine.is_playing());
        assert!(backend.pull(192).iter().all(|&s| s == 7));
        assert_eq!(engine.status().read_frame_index, Some(384));
    }

    #[test]
    fn failed_reopen_leaves_engine_without_stream() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        backend.fail_open.store(true, Ordering::SeqCst);
        let outcome = engine.handle_stream_fault(StreamFault::Disconnected);
        assert_eq!(outcome, Some(RestartOutcome::Performed { stream_open: false }));
        assert_eq!(engine.state(), EngineState::Closed);
        assert_eq!(engine.status().frames_per_burst, None);
    }

    #[test]
    fn backend_error_does_not_restart() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        let outcome = engine.handle_stream_fault(StreamFault::Backend("xrun".to_string()));
        assert_eq!(outcome, None);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_disconnects_run_one_restart() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = Arc::new(engine_with(&backend));

        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        *backend.gate.lock().unwrap() = Some(OpenGate {
            entered: entered_tx,
            release: release_rx,
        });

        let first = {
            let engine = engine.clone();
            thread::spawn(move || engine.handle_stream_fault(StreamFault::Disconnected))
        };
        entered_rx.recv().unwrap();
        assert_eq!(engine.state(), EngineState::Restarting);

        let second = engine.handle_stream_fault(StreamFault::Disconnected);
        assert_eq!(second, Some(RestartOutcome::Skipped));

        release_tx.send(()).unwrap();
        assert_eq!(
            first.join().unwrap(),
            Some(RestartOutcome::Performed { stream_open: true })
        );
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        let status = engine.status();
        assert_eq!(status.restarts_performed, 1);
        assert_eq!(status.restarts_skipped, 1);
    }

    #[test]
    fn platform_fault_restarts_on_background_thread() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        backend.report(StreamFault::Disconnected);
        assert!(wait_until(|| {
            backend.opens.load(Ordering::SeqCst) == 2 && engine.state() == EngineState::Running
        }));
    }

    #[test]
    fn platform_backend_error_is_only_logged() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        backend.report(StreamFault::Backend("underrun".to_string()));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn disconnect_from_replaced_stream_is_dropped() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);
        let first_handler = backend.on_fault.lock().unwrap().clone().unwrap();

        engine.handle_stream_fault(StreamFault::Disconnected);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);

        first_handler(StreamFault::Disconnected);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn queued_restart_for_replaced_stream_is_stale() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);

        // Generation 1 disconnects; a second thread for the same stream runs afterwards.
        assert_eq!(
            engine.inner.handle_disconnect(Some(1)),
            Some(RestartOutcome::Performed { stream_open: true })
        );
        assert_eq!(
            engine.inner.handle_disconnect(Some(1)),
            Some(RestartOutcome::Stale)
        );
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.status().restarts_performed, 1);
    }

    #[test]
    fn disconnect_while_restart_finishes_keeps_running_state() {
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);
        let inner = &engine.inner;

        let outcome = inner.restart.try_restart(&inner.session, || {
            let session = inner.create_playback_stream();
            assert_eq!(engine.state(), EngineState::Running);
            // Restart guard still held: this notification is skipped.
            assert_eq!(
                engine.handle_stream_fault(StreamFault::Disconnected),
                Some(RestartOutcome::Skipped)
            );
            assert_eq!(engine.state(), EngineState::Running);
            Some(session)
        });
        assert_eq!(outcome, RestartOutcome::Performed { stream_open: true });
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn shutdown_closes_stream_and_blocks_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "a.wav", 1000, 1);
        let backend = Arc::new(FakeBackend::new(192));
        let engine = engine_with(&backend);
        engine.play_file(&path).unwrap();

        engine.shutdown();
        assert_eq!(engine.state(), EngineState::Closed);
        assert!(!engine.is_playing());
        assert_eq!(backend.calls().last(), Some(&Call::Close));

        assert_eq!(engine.handle_stream_fault(StreamFault::Disconnected), None);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);

        // Idempotent.
        engine.shutdown();
        let closes = backend.calls().iter().filter(|c| **c == Call::Close).count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn drop_closes_stream() {
        let backend = Arc::new(FakeBackend::new(192));
        drop(engine_with(&backend));
        assert_eq!(backend.calls().last(), Some(&Call::Close));
    }
}
