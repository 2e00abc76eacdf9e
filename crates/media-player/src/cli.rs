use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "media-player", version)]
pub struct Args {
    /// Path to a 16-bit stereo 44.1 kHz WAV file (other files are played as raw samples)
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Loop the file until interrupted
    #[arg(long = "loop")]
    pub looping: bool,

    /// How often to poll for end of playback, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub poll_ms: u64,

    /// Print the final engine status as JSON on exit
    #[arg(long)]
    pub status_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let args = Args::try_parse_from(["media-player", "song.wav"]).unwrap();
        assert_eq!(args.path, Some(PathBuf::from("song.wav")));
        assert_eq!(args.poll_ms, 50);
        assert!(!args.looping);
        assert!(!args.list_devices);
        assert!(args.device.is_none());
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "media-player",
            "--device",
            "usb",
            "--loop",
            "--poll-ms",
            "10",
            "--status-json",
            "a.wav",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("usb"));
        assert!(args.looping);
        assert_eq!(args.poll_ms, 10);
        assert!(args.status_json);
    }

    #[test]
    fn list_devices_needs_no_path() {
        let args = Args::try_parse_from(["media-player", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.path.is_none());
    }
}
