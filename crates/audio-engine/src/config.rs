/// Channel count of every stream and every loaded buffer (interleaved stereo).
pub const CHANNEL_COUNT: usize = 2;

/// Sample rate requested from the output device.
pub const SAMPLE_RATE_HZ: u32 = 44_100;

/// Burst size assumed when the host does not report a buffer-size range.
pub const DEFAULT_FRAMES_PER_BURST: u32 = 192;

/// Sample format delivered to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit PCM.
    I16,
}

/// Whether the stream asks for sole use of the hardware path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharingMode {
    /// Request exclusive access; hosts that cannot grant it fall back to shared.
    ExclusivePreferred,
    /// Share the device with the platform mixer.
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerformanceMode {
    /// Smallest stable buffer the device reports.
    LowLatency,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Output,
}

/// Parameters used every time an output stream is opened (including restarts).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub format: SampleFormat,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub sharing_mode: SharingMode,
    pub performance_mode: PerformanceMode,
    pub direction: Direction,
}

impl Default for StreamConfiguration {
    /// 16-bit stereo at 44.1 kHz, low latency, exclusive when available.
    fn default() -> Self {
        Self {
            format: SampleFormat::I16,
            channel_count: CHANNEL_COUNT as u16,
            sample_rate: SAMPLE_RATE_HZ,
            sharing_mode: SharingMode::ExclusivePreferred,
            performance_mode: PerformanceMode::LowLatency,
            direction: Direction::Output,
        }
    }
}

/// Engine-level settings chosen by the host application.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Output device substring match; `None` selects the host default device.
    pub device: Option<String>,
    /// Loop the installed buffer forever instead of clearing it at end of data.
    pub looping: bool,
    /// Stream parameters reused on every open/reopen.
    pub stream: StreamConfiguration,
}

impl EngineConfig {
    /// Normalize a user-provided device name: blank strings mean "default device".
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device.and_then(|name| {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stream_is_stereo_i16_44k() {
        let cfg = StreamConfiguration::default();
        assert_eq!(cfg.format, SampleFormat::I16);
        assert_eq!(cfg.channel_count, 2);
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.sharing_mode, SharingMode::ExclusivePreferred);
        assert_eq!(cfg.performance_mode, PerformanceMode::LowLatency);
        assert_eq!(cfg.direction, Direction::Output);
    }

    #[test]
    fn with_device_treats_blank_as_default() {
        let cfg = EngineConfig::default().with_device(Some("   ".to_string()));
        assert!(cfg.device.is_none());

        let cfg = EngineConfig::default().with_device(Some("  USB DAC ".to_string()));
        assert_eq!(cfg.device.as_deref(), Some("USB DAC"));
    }
}
