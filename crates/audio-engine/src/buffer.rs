//! Decoded sample storage shared between the control path and the real-time path.
//!
//! An [`AudioBuffer`] owns a flat array of interleaved `i16` samples plus a read cursor.
//! Ownership moves from the loader to the engine on install; there is exactly one owner
//! at any time and the storage is released when that owner drops it.
//!
//! ## Data model
//! Samples are stored **interleaved**:
//! `frame0[ch0], frame0[ch1], frame1[ch0], frame1[ch1], ...`
//!
//! `read_frame_index` always stays in `[0, total_frames)` when the buffer is non-empty:
//! it wraps to `0` when it reaches `total_frames`.

/// Owned, interleaved sample buffer with a playback cursor.
#[derive(Debug)]
pub struct AudioBuffer {
    samples: Box<[i16]>,
    channels: usize,
    total_frames: usize,
    read_frame_index: usize,
}

impl AudioBuffer {
    /// Take ownership of interleaved samples.
    ///
    /// A trailing partial frame (fewer than `channels` samples) is dropped so the sample
    /// count is always a whole number of frames.
    pub fn new(mut samples: Vec<i16>, channels: usize) -> Self {
        let channels = channels.max(1);
        let total_frames = samples.len() / channels;
        samples.truncate(total_frames * channels);
        Self {
            samples: samples.into_boxed_slice(),
            channels,
            total_frames,
            read_frame_index: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Next frame to be emitted.
    pub fn read_frame_index(&self) -> usize {
        self.read_frame_index
    }

    /// Frames left before the cursor reaches the end of data.
    pub fn remaining_frames(&self) -> usize {
        self.total_frames - self.read_frame_index
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.total_frames == 0
    }

    /// Copy `frames` frames into `out` starting at the cursor, wrapping to frame 0 at the end.
    ///
    /// `out` must hold at least `frames * channels` samples. Returns the number of frames
    /// copied, which is `0` for an empty buffer and `frames` otherwise. Never allocates.
    pub fn read_wrapping(&mut self, out: &mut [i16], frames: usize) -> usize {
        if self.total_frames == 0 {
            return 0;
        }
        let frames = frames.min(out.len() / self.channels);
        let mut copied = 0usize;
        while copied < frames {
            let run = (frames - copied).min(self.total_frames - self.read_frame_index);
            let src_start = self.read_frame_index * self.channels;
            let dst_start = copied * self.channels;
            let len = run * self.channels;
            out[dst_start..dst_start + len]
                .copy_from_slice(&self.samples[src_start..src_start + len]);

            copied += run;
            self.read_frame_index += run;
            if self.read_frame_index >= self.total_frames {
                self.read_frame_index = 0;
            }
        }
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Vec<i16> {
        (0..frames * 2).map(|v| v as i16).collect()
    }

    #[test]
    fn new_drops_trailing_partial_frame() {
        let buf = AudioBuffer::new(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(buf.total_frames(), 2);
        assert_eq!(buf.samples(), &[1, 2, 3, 4]);
    }

    #[test]
    fn read_wrapping_advances_cursor() {
        let mut buf = AudioBuffer::new(ramp(4), 2);
        let mut out = [0i16; 4];
        assert_eq!(buf.read_wrapping(&mut out, 2), 2);
        assert_eq!(out, [0, 1, 2, 3]);
        assert_eq!(buf.read_frame_index(), 2);
        assert_eq!(buf.remaining_frames(), 2);
    }

    #[test]
    fn read_wrapping_wraps_at_end_of_data() {
        let mut buf = AudioBuffer::new(ramp(3), 2);
        let mut out = [0i16; 10];
        assert_eq!(buf.read_wrapping(&mut out, 5), 5);
        // frames 0,1,2 then wrap to 0,1
        assert_eq!(out, [0, 1, 2, 3, 4, 5, 0, 1, 2, 3]);
        assert_eq!(buf.read_frame_index(), 2);
    }

    #[test]
    fn read_wrapping_exact_end_resets_cursor() {
        let mut buf = AudioBuffer::new(ramp(3), 2);
        let mut out = [0i16; 6];
        assert_eq!(buf.read_wrapping(&mut out, 3), 3);
        assert_eq!(buf.read_frame_index(), 0);
    }

    #[test]
    fn read_wrapping_on_empty_buffer_copies_nothing() {
        let mut buf = AudioBuffer::new(Vec::new(), 2);
        let mut out = [7i16; 4];
        assert_eq!(buf.read_wrapping(&mut out, 2), 0);
        assert_eq!(out, [7; 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_wrapping_clamps_to_output_len() {
        let mut buf = AudioBuffer::new(ramp(8), 2);
        let mut out = [0i16; 4];
        assert_eq!(buf.read_wrapping(&mut out, 8), 2);
    }
}
