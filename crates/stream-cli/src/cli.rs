//! Command-line arguments.

use clap::Parser;
use stream_types::DisplayMode;

/// Stream an MP3 URL to the local audio output.
#[derive(Parser, Debug)]
#[command(name = "stream-cli", version, about)]
pub struct Args {
    /// Stream URL to play.
    #[arg(required_unless_present = "list_devices")]
    pub url: Option<String>,

    /// LRC caption file URL, shown in sync with playback.
    #[arg(long)]
    pub caption_url: Option<String>,

    /// What to render while playing: spectrum or captions.
    #[arg(long, value_enum, default_value_t = DisplayModeArg::Captions)]
    pub display_mode: DisplayModeArg,

    /// Output device name substring (case-insensitive). Defaults to the
    /// system default output device.
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Stream buffer cap in KiB.
    #[arg(long, default_value_t = 512)]
    pub max_buffer_kb: usize,

    /// Compressed bytes to buffer before playback starts, in KiB.
    #[arg(long, default_value_t = 32)]
    pub min_start_kb: usize,

    /// HTTP timeout per call, in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Print the final engine status as JSON on exit.
    #[arg(long)]
    pub json_status: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayModeArg {
    Spectrum,
    Captions,
}

impl From<DisplayModeArg> for DisplayMode {
    fn from(arg: DisplayModeArg) -> Self {
        match arg {
            DisplayModeArg::Spectrum => DisplayMode::Spectrum,
            DisplayModeArg::Captions => DisplayMode::Captions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_required_without_list_devices() {
        assert!(Args::try_parse_from(["stream-cli"]).is_err());
        assert!(Args::try_parse_from(["stream-cli", "--list-devices"]).is_ok());
        let args = Args::try_parse_from(["stream-cli", "http://x/a.mp3"]).unwrap();
        assert_eq!(args.url.as_deref(), Some("http://x/a.mp3"));
    }

    #[test]
    fn display_mode_parses() {
        let args =
            Args::try_parse_from(["stream-cli", "http://x/a.mp3", "--display-mode", "spectrum"])
                .unwrap();
        assert_eq!(args.display_mode, DisplayModeArg::Spectrum);
    }
}
