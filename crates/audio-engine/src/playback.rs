//! Playback stage (real-time data supply).
//!
//! [`PlaybackState`] is the callback target registered with every output stream. It owns
//! the buffer-exchange slot shared by two contexts:
//! - the control thread installs/replaces buffers with a blocking lock
//! - the platform audio thread reads from the installed buffer with a **try-lock**, and
//!   skips sample production for that invocation when the lock is contended
//!
//! ## Real-time constraints
//! `supply` never blocks, never allocates or frees, and never performs I/O. Shortfalls are
//! filled with zeros (silence) so the stream keeps running for the next file.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::buffer::AudioBuffer;
use crate::error::Result;

/// Capability invoked by the platform audio thread to fill an output region.
pub trait AudioCallback: Send + Sync {
    /// Fill `output` with interleaved samples (`output.len() / channels` frames requested).
    ///
    /// Returns the number of frames taken from audio data; every sample after those frames
    /// is set to zero.
    fn supply(&self, output: &mut [i16]) -> usize;

    /// Produce `total_samples` of output through `scratch`, handing each filled chunk to
    /// `sink` together with its sample offset.
    ///
    /// One call is one platform invocation: the buffer-exchange lock is attempted once and
    /// held across every chunk, so an invocation is either skipped as a whole or drawn from
    /// a single buffer. Returns the frames taken from audio data.
    fn supply_chunked(
        &self,
        scratch: &mut [i16],
        total_samples: usize,
        sink: &mut dyn FnMut(usize, &[i16]),
    ) -> usize;
}

#[derive(Debug, Default)]
struct BufferSlot {
    current: Option<AudioBuffer>,
    /// Exhausted buffer parked by the audio thread; dropped later on the control thread.
    retired: Option<AudioBuffer>,
}

/// Shared playback state: installed buffer, playing flag, and callback counters.
#[derive(Debug)]
pub struct PlaybackState {
    channels: usize,
    looping: bool,
    slot: Mutex<BufferSlot>,
    playing: AtomicBool,
    skipped_callbacks: AtomicU64,
}

impl PlaybackState {
    pub fn new(channels: usize, looping: bool) -> Self {
        Self {
            channels: channels.max(1),
            looping,
            slot: Mutex::new(BufferSlot::default()),
            playing: AtomicBool::new(false),
            skipped_callbacks: AtomicU64::new(0),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `true` while a buffer is installed and has not reached end of data.
    ///
    /// Lock-free; safe to poll from any thread.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Callback invocations that produced no samples because a swap held the lock.
    pub fn skipped_callbacks(&self) -> u64 {
        self.skipped_callbacks.load(Ordering::Relaxed)
    }

    /// Replace the installed buffer with the one produced by `load`.
    ///
    /// Control path only: takes the exchange lock with a blocking acquire, discards the
    /// previous buffer, then runs `load` while holding the lock so the audio thread never
    /// observes a half-swapped state. When `load` fails the slot is left empty.
    ///
    /// Returns the installed buffer's total frames.
    pub fn exchange<F>(&self, load: F) -> Result<usize>
    where
        F: FnOnce() -> Result<AudioBuffer>,
    {
        let mut slot = self.lock_slot();
        self.playing.store(false, Ordering::Release);
        slot.current = None;
        slot.retired = None;

        let buffer = load()?;
        let total_frames = buffer.total_frames();
        slot.current = Some(buffer);
        self.playing.store(true, Ordering::Release);
        Ok(total_frames)
    }

    /// Drop the installed and retired buffers (control path).
    pub fn clear(&self) {
        let mut slot = self.lock_slot();
        self.playing.store(false, Ordering::Release);
        slot.current = None;
        slot.retired = None;
    }

    /// Best-effort `(read_frame_index, total_frames)` of the installed buffer.
    ///
    /// Returns `None` when nothing is installed or the lock is currently held.
    pub fn cursor(&self) -> Option<(usize, usize)> {
        let slot = match self.slot.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        slot.current
            .as_ref()
            .map(|b| (b.read_frame_index(), b.total_frames()))
    }

    fn lock_slot(&self) -> MutexGuard<'_, BufferSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on the slot if the lock is free right now; otherwise skip this tick.
    fn try_with_slot<R>(&self, f: impl FnOnce(&mut BufferSlot) -> R) -> Option<R> {
        match self.slot.try_lock() {
            Ok(mut g) => Some(f(&mut g)),
            Err(TryLockError::Poisoned(p)) => Some(f(&mut p.into_inner())),
            Err(TryLockError::WouldBlock) => {
                self.skipped_callbacks.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Copy up to `requested` frames from the installed buffer into `output`.
    ///
    /// Without looping, at most the remaining frames are emitted; when they do not exceed
    /// the request the end of data has been reached and the buffer is retired.
    fn fill_from_slot(&self, slot: &mut BufferSlot, output: &mut [i16], requested: usize) -> usize {
        let Some(buffer) = slot.current.as_mut() else {
            return 0;
        };

        if self.looping && !buffer.is_empty() {
            return buffer.read_wrapping(output, requested);
        }

        let remaining = buffer.remaining_frames();
        let written = buffer.read_wrapping(output, requested.min(remaining));
        if requested >= remaining {
            slot.retired = slot.current.take();
            self.playing.store(false, Ordering::Release);
        }
        written
    }
}

impl AudioCallback for PlaybackState {
    fn supply(&self, output: &mut [i16]) -> usize {
        let requested = output.len() / self.channels;
        let written = self
            .try_with_slot(|slot| self.fill_from_slot(slot, output, requested))
            .unwrap_or(0);

        output[written * self.channels..].fill(0);
        written
    }

    fn supply_chunked(
        &self,
        scratch: &mut [i16],
        total_samples: usize,
        sink: &mut dyn FnMut(usize, &[i16]),
    ) -> usize {
        let chunk_samples = scratch.len() - scratch.len() % self.channels;
        if chunk_samples == 0 {
            return 0;
        }

        let mut fill = |mut slot: Option<&mut BufferSlot>| {
            let mut written_total = 0;
            let mut offset = 0;
            while offset < total_samples {
                let len = chunk_samples.min(total_samples - offset);
                let chunk = &mut scratch[..len];
                let written = match slot.as_deref_mut() {
                    Some(slot) => self.fill_from_slot(slot, chunk, len / self.channels),
                    None => 0,
                };
                chunk[written * self.channels..].fill(0);
                sink(offset, chunk);
                written_total += written;
                offset += len;
            }
            written_total
        };

        match self.slot.try_lock() {
            Ok(mut g) => fill(Some(&mut *g)),
            Err(TryLockError::Poisoned(p)) => {
                let mut g = p.into_inner();
                fill(Some(&mut *g))
            }
            Err(TryLockError::WouldBlock) => {
                self.skipped_callbacks.fetch_add(1, Ordering::Relaxed);
                fill(None)
            }
        }
    }
}
