//! Command-line argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use lumen_core::EngineConfig;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "lumend")]
#[command(about = "Audio-reactive LED strip daemon", long_about = None)]
pub struct Args {
    /// JSON configuration file; flags below override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Render into memory instead of driving hardware
    #[arg(long)]
    pub fake_strip: bool,

    /// Number of LEDs on the strip
    #[arg(long, value_name = "N")]
    pub led_count: Option<usize>,

    /// Effect to start with
    #[arg(long, value_name = "ID")]
    pub effect: Option<String>,

    /// Target frame rate
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Do not capture audio
    #[arg(long)]
    pub no_audio: bool,

    /// Exit after this many seconds
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds, allow_negative_numbers = true)]
    pub run_for: Option<Duration>,

    /// Print capture devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Print the effect catalog and exit
    #[arg(long)]
    pub list_effects: bool,
}

/// Non-negative, finite seconds
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("expected a non-negative number of seconds, got {value}"))
}

impl Args {
    /// Overlay the flags onto a loaded configuration
    pub fn apply(&self, config: &mut EngineConfig) {
        if self.fake_strip {
            config.strip.fake = true;
        }
        if let Some(count) = self.led_count {
            config.strip.led_count = count;
        }
        if let Some(effect) = &self.effect {
            config.effect = effect.clone();
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if self.no_audio {
            config.audio_enabled = false;
        }
    }
}
