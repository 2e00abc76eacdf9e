//! CPAL output backend and device selection.
//!
//! Device selection accepts a name fragment or falls back to the host default. The stream
//! config is stereo 44.1 kHz at the smallest buffer the device reports, and exclusive
//! access is attempted first when the configuration prefers it.
//!
//! `cpal::Stream` is not guaranteed to be `Send`, so every stream lives on its own
//! `audio-stream` thread and is controlled with request/reply messages. The engine only
//! ever holds a [`CpalStream`] handle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::config::{DEFAULT_FRAMES_PER_BURST, SharingMode, StreamConfiguration};
use crate::error::{EngineError, Result};
use crate::exclusive::{self, ExclusiveGuard};
use crate::playback::AudioCallback;
use crate::session::{FaultHandler, OutputBackend, OutputStream, StreamFault};

/// Scratch space (frames) for converting `i16` samples to the device format.
const SCRATCH_MIN_FRAMES: usize = 1024;

/// Resolve the output device for a stream.
///
/// `needle` selects the first device whose description contains it, ignoring case. Without
/// one the host default is used.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().map_err(EngineError::device)?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .is_some_and(|desc| matches_device_name(&desc.name(), needle))
            })
            .ok_or_else(|| EngineError::Device(format!("no output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| EngineError::Device("no default output device".to_string()))
}

/// Return available output device names for the default host.
pub fn list_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.output_devices().map_err(EngineError::device)?;
    let mut out = Vec::new();
    for d in devices {
        out.push(d.description().map_err(EngineError::device)?.to_string());
    }
    Ok(out)
}

/// Choose a supported config with the requested channel count and sample rate.
///
/// Among matching ranges the sample format closest to `i16` wins.
fn pick_output_config(
    device: &cpal::Device,
    config: &StreamConfiguration,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges = device
        .supported_output_configs()
        .map_err(EngineError::device)?;

    let mut best: Option<(u8, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if range.channels() != config.channel_count {
            continue;
        }
        let rates = range.min_sample_rate()..=range.max_sample_rate();
        if !rates.contains(&config.sample_rate) {
            continue;
        }
        let rank = sample_format_rank(range.sample_format());
        if rank == UNSUPPORTED_RANK {
            continue;
        }
        if best.as_ref().is_none_or(|(b_rank, _)| rank < *b_rank) {
            best = Some((rank, range));
        }
    }

    best.map(|(_, range)| range.with_sample_rate(config.sample_rate))
        .ok_or_else(|| {
            EngineError::Device(format!(
                "no output config for {} channels at {} Hz",
                config.channel_count, config.sample_rate
            ))
        })
}

const UNSUPPORTED_RANK: u8 = u8::MAX;

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => UNSUPPORTED_RANK,
    }
}

/// Burst size and buffer request for a device's supported buffer sizes.
///
/// The smallest size in the range is treated as the burst. Hosts that report no range
/// keep their default buffer and a nominal burst is assumed.
fn burst_for(buffer_size: &cpal::SupportedBufferSize) -> (u32, cpal::BufferSize) {
    match buffer_size {
        cpal::SupportedBufferSize::Range { min, max } => {
            let burst = burst_from_range(*min, *max);
            (burst, cpal::BufferSize::Fixed(burst))
        }
        cpal::SupportedBufferSize::Unknown => {
            (DEFAULT_FRAMES_PER_BURST, cpal::BufferSize::Default)
        }
    }
}

fn burst_from_range(min: u32, max: u32) -> u32 {
    if min > 0 {
        min
    } else {
        DEFAULT_FRAMES_PER_BURST.min(max.max(1))
    }
}

/// Blank fragments never match, so `--device ""` cannot select an arbitrary device.
fn matches_device_name(description: &str, fragment: &str) -> bool {
    let fragment = fragment.trim().to_lowercase();
    !fragment.is_empty() && description.to_lowercase().contains(&fragment)
}

/// Output backend that opens streams on a CPAL device.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend {
    device: Option<String>,
}

impl CpalBackend {
    /// `device` is a substring of the output device name; `None` uses the default device.
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl OutputBackend for CpalBackend {
    fn open(
        &self,
        config: &StreamConfiguration,
        callback: Arc<dyn AudioCallback>,
        on_fault: FaultHandler,
    ) -> Result<Box<dyn OutputStream>> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let needle = self.device.clone();
        let config = config.clone();

        let join = thread::Builder::new()
            .name("audio-stream".to_string())
            .spawn(move || stream_thread_main(needle, config, callback, on_fault, ready_tx, cmd_rx))
            .map_err(EngineError::device)?;

        match ready_rx.recv() {
            Ok(Ok(opened)) => Ok(Box::new(CpalStream {
                cmd_tx,
                join: Some(join),
                opened,
            })),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(EngineError::Device("stream thread exited during open".to_string()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct OpenedStream {
    frames_per_burst: u32,
    buffer_size_frames: u32,
}

enum StreamCommand {
    Start(Sender<Result<()>>),
    Stop(Sender<Result<()>>),
    Close,
}

/// Body of the `audio-stream` thread: build the stream, then serve commands until closed.
fn stream_thread_main(
    needle: Option<String>,
    config: StreamConfiguration,
    callback: Arc<dyn AudioCallback>,
    on_fault: FaultHandler,
    ready_tx: Sender<Result<OpenedStream>>,
    cmd_rx: Receiver<StreamCommand>,
) {
    let (stream, opened, exclusive) =
        match build_output(needle.as_deref(), &config, callback, on_fault) {
            Ok(v) => v,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
    let _ = ready_tx.send(Ok(opened));

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            StreamCommand::Start(reply) => {
                let _ = reply.send(stream.play().map_err(EngineError::device));
            }
            StreamCommand::Stop(reply) => {
                let _ = reply.send(stream.pause().map_err(EngineError::device));
            }
            StreamCommand::Close => break,
        }
    }
    // Release hog mode only after the stream is gone.
    drop(stream);
    drop(exclusive);
}

fn build_output(
    needle: Option<&str>,
    config: &StreamConfiguration,
    callback: Arc<dyn AudioCallback>,
    on_fault: FaultHandler,
) -> Result<(cpal::Stream, OpenedStream, Option<ExclusiveGuard>)> {
    let host = cpal::default_host();
    let device = pick_device(&host, needle)?;
    let device_name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let exclusive = exclusive::maybe_acquire(
        &device,
        config.sample_rate,
        config.sharing_mode == SharingMode::ExclusivePreferred,
    );

    let supported = pick_output_config(&device, config)?;
    let (frames_per_burst, buffer_size) = burst_for(supported.buffer_size());
    let stream_config = cpal::StreamConfig {
        channels: config.channel_count,
        sample_rate: config.sample_rate,
        buffer_size,
    };
    let scratch_frames = (frames_per_burst as usize).max(SCRATCH_MIN_FRAMES);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, callback, on_fault, scratch_frames)
        }
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &stream_config, callback, on_fault, scratch_frames)
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(&device, &stream_config, callback, on_fault, scratch_frames)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &stream_config, callback, on_fault, scratch_frames)
        }
        other => Err(EngineError::Device(format!("unsupported sample format: {other:?}"))),
    }?;

    tracing::info!(
        device = %device_name,
        sample_format = ?supported.sample_format(),
        frames_per_burst,
        exclusive = exclusive.is_some(),
        "output device"
    );

    let buffer_size_frames = match buffer_size {
        cpal::BufferSize::Fixed(n) => n,
        cpal::BufferSize::Default => frames_per_burst,
    };
    Ok((
        stream,
        OpenedStream {
            frames_per_burst,
            buffer_size_frames,
        },
        exclusive,
    ))
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// The engine always produces `i16`; samples go through a scratch buffer allocated here,
/// before the stream exists, and are converted to the device format in the callback. A
/// platform period longer than the scratch is filled in chunks under one lock attempt.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    callback: Arc<dyn AudioCallback>,
    on_fault: FaultHandler,
    scratch_frames: usize,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels = config.channels as usize;
    let mut scratch = vec![0i16; scratch_frames.max(1) * channels];

    let err_fn = move |err: cpal::StreamError| {
        let fault = match err {
            cpal::StreamError::DeviceNotAvailable => StreamFault::Disconnected,
            other => StreamFault::Backend(other.to_string()),
        };
        on_fault(fault);
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let total = data.len();
                callback.supply_chunked(&mut scratch, total, &mut |offset, chunk| {
                    let dst = &mut data[offset..offset + chunk.len()];
                    for (dst, &sample) in dst.iter_mut().zip(chunk) {
                        *dst = <T as cpal::Sample>::from_sample::<i16>(sample);
                    }
                });
            },
            err_fn,
            None,
        )
        .map_err(EngineError::device)
}

/// Handle to a stream owned by an `audio-stream` thread.
struct CpalStream {
    cmd_tx: Sender<StreamCommand>,
    join: Option<JoinHandle<()>>,
    opened: OpenedStream,
}

impl CpalStream {
    fn request(&self, command: impl FnOnce(Sender<Result<()>>) -> StreamCommand) -> Result<()> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(command(reply_tx))
            .map_err(|_| EngineError::NoStream)?;
        reply_rx.recv().map_err(|_| EngineError::NoStream)?
    }
}

impl OutputStream for CpalStream {
    fn frames_per_burst(&self) -> u32 {
        self.opened.frames_per_burst
    }

    /// CPAL fixes the buffer size when the stream is built; report what was applied.
    fn set_buffer_size_in_frames(&mut self, frames: u32) -> Result<u32> {
        if frames != self.opened.buffer_size_frames {
            tracing::debug!(
                requested = frames,
                applied = self.opened.buffer_size_frames,
                "buffer size fixed at stream build"
            );
        }
        Ok(self.opened.buffer_size_frames)
    }

    fn start(&mut self) -> Result<()> {
        self.request(StreamCommand::Start)
    }

    fn stop(&mut self) -> Result<()> {
        self.request(StreamCommand::Stop)
    }

    fn close(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let _ = self.cmd_tx.send(StreamCommand::Close);
        join.join()
            .map_err(|_| EngineError::Device("stream thread panicked".to_string()))
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
