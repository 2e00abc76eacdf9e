//! Sample loading stage.
//!
//! Reads a whole file into memory as interleaved 16-bit little-endian samples:
//! - RIFF/WAVE containers are walked chunk by chunk until the `data` chunk is found
//! - anything else is read as raw sample bytes from the start of the file
//!
//! Container metadata (`fmt `) is reported but never validated: the output stream is
//! always 16-bit stereo at 44.1 kHz, and mismatched files simply play at the wrong pitch.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::config::{CHANNEL_COUNT, SAMPLE_RATE_HZ};
use crate::error::{EngineError, Result};

const BYTES_PER_SAMPLE: u64 = 2;
const WAVE_FORMAT_PCM: u16 = 1;

/// Format fields decoded from a `fmt ` chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    /// Whether the container matches what the stream actually plays.
    pub fn matches_stream(&self) -> bool {
        self.format_tag == WAVE_FORMAT_PCM
            && usize::from(self.channels) == CHANNEL_COUNT
            && self.sample_rate == SAMPLE_RATE_HZ
            && self.bits_per_sample == 16
    }
}

/// Which interpretation of the file produced the samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    /// RIFF/WAVE with a `data` chunk; `format` is set when a `fmt ` chunk preceded it.
    Wave { format: Option<WaveFormat> },
    /// Unrecognized container; the whole file was read as samples.
    Raw,
}

/// Samples read from a file, ready to become an [`AudioBuffer`](crate::buffer::AudioBuffer).
#[derive(Debug)]
pub struct LoadedSamples {
    /// Interleaved samples; always a whole number of frames.
    pub samples: Vec<i16>,
    pub total_frames: usize,
    /// Byte length declared by the `data` chunk, or the file size for raw input.
    pub declared_bytes: u64,
    pub container: Container,
}

/// Load `path` into memory.
///
/// Returns [`EngineError::FileOpen`] when the file cannot be opened; no partial
/// buffer is produced in that case.
pub fn load(path: &Path) -> Result<LoadedSamples> {
    let file = File::open(path).map_err(|source| EngineError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    load_from(BufReader::new(file))
}

/// Load samples from any seekable byte source.
pub fn load_from<R: Read + Seek>(mut reader: R) -> Result<LoadedSamples> {
    let (declared_bytes, container) = match parse_wave(&mut reader) {
        Ok((length, format)) => (length, Container::Wave { format }),
        Err(EngineError::Format(reason)) => {
            tracing::warn!(reason = %reason, "not a RIFF/WAVE file; reading raw samples");
            let length = reader.seek(SeekFrom::End(0))?;
            reader.seek(SeekFrom::Start(0))?;
            (length, Container::Raw)
        }
        Err(e) => return Err(e),
    };

    if let Container::Wave {
        format: Some(format),
    } = container
    {
        if format.matches_stream() {
            tracing::debug!(?format, "wave format");
        } else {
            tracing::warn!(
                format_tag = format.format_tag,
                channels = format.channels,
                rate_hz = format.sample_rate,
                bits = format.bits_per_sample,
                "wave format differs from 16-bit stereo 44.1 kHz; playing as-is"
            );
        }
    }

    let requested_samples = declared_bytes / BYTES_PER_SAMPLE;
    let mut samples = read_samples(&mut reader, requested_samples)?;
    if (samples.len() as u64) < requested_samples {
        tracing::warn!(
            declared = requested_samples,
            read = samples.len(),
            "file ended before declared sample count"
        );
    }

    let total_frames = samples.len() / CHANNEL_COUNT;
    samples.truncate(total_frames * CHANNEL_COUNT);

    tracing::debug!(
        length = declared_bytes,
        samples = samples.len(),
        total_frames,
        "samples loaded"
    );

    Ok(LoadedSamples {
        samples,
        total_frames,
        declared_bytes,
        container,
    })
}

/// Validate the RIFF/WAVE header and walk sub-chunks until `data`.
///
/// On success the reader is positioned at the first payload byte and the declared payload
/// length is returned. Chunk sizes are little-endian and no pad byte is skipped after
/// odd-sized chunks.
fn parse_wave<R: Read + Seek>(reader: &mut R) -> Result<(u64, Option<WaveFormat>)> {
    if read_tag(reader)? != Some(*b"RIFF") {
        return Err(EngineError::Format("missing RIFF tag".to_string()));
    }
    reader.seek(SeekFrom::Start(8))?;
    if read_tag(reader)? != Some(*b"WAVE") {
        return Err(EngineError::Format("missing WAVE tag".to_string()));
    }

    let mut format = None;
    let mut chunk_pos: u64 = 12;
    loop {
        reader.seek(SeekFrom::Start(chunk_pos))?;
        let Some(tag) = read_tag(reader)? else {
            return Err(EngineError::Format("no data chunk".to_string()));
        };
        let Some(size) = read_u32_le(reader)? else {
            return Err(EngineError::Format("truncated chunk header".to_string()));
        };

        match &tag {
            b"data" => return Ok((u64::from(size), format)),
            b"fmt " if size >= 16 => format = read_format(reader)?,
            _ => {}
        }
        chunk_pos += 8 + u64::from(size);
    }
}

fn read_format<R: Read>(reader: &mut R) -> Result<Option<WaveFormat>> {
    let mut raw = [0u8; 16];
    if !read_full(reader, &mut raw)? {
        return Ok(None);
    }
    Ok(Some(WaveFormat {
        format_tag: u16::from_le_bytes([raw[0], raw[1]]),
        channels: u16::from_le_bytes([raw[2], raw[3]]),
        sample_rate: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        bits_per_sample: u16::from_le_bytes([raw[14], raw[15]]),
    }))
}

/// Read up to `count` little-endian samples; stops early at end of file.
fn read_samples<R: Read>(reader: &mut R, count: u64) -> Result<Vec<i16>> {
    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take(count.saturating_mul(BYTES_PER_SAMPLE))
        .read_to_end(&mut bytes)?;
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE as usize)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn read_tag<R: Read>(reader: &mut R) -> Result<Option<[u8; 4]>> {
    let mut tag = [0u8; 4];
    Ok(read_full(reader, &mut tag)?.then_some(tag))
}

fn read_u32_le<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut raw = [0u8; 4];
    Ok(read_full(reader, &mut raw)?.then(|| u32::from_le_bytes(raw)))
}

/// `read_exact` that reports end of file as `false` instead of an error.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
