//! Engine and Capture Configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::state::EngineState;
use lumen_dsp::{AnalyzerSettings, AGC_DEFAULT_TARGET, DEFAULT_FRAME_SIZE, DEFAULT_SAMPLE_RATE};
use lumen_strip::StripConfig;

/// Audio capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested sample rate in Hz; the device default is used if unsupported
    pub sample_rate: u32,

    /// Analysis frame size in samples (power of two)
    pub frame_size: usize,

    /// Input device name, or the system default when absent
    pub device: Option<String>,

    /// Ring buffer capacity in analysis frames
    pub ring_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            device: None,
            ring_frames: 8,
        }
    }
}

impl CaptureConfig {
    /// Capture latency of one analysis frame in milliseconds
    pub fn frame_ms(&self) -> f32 {
        (self.frame_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Ring buffer capacity in samples
    pub fn ring_capacity(&self) -> usize {
        self.frame_size * self.ring_frames
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.frame_size < 64 || self.frame_size > 8192 || !self.frame_size.is_power_of_two() {
            return Err(format!("Invalid frame size: {}", self.frame_size));
        }
        if self.ring_frames < 2 {
            return Err(format!("Invalid ring size: {} frames", self.ring_frames));
        }
        Ok(())
    }
}

/// Overall engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Strip hardware
    pub strip: StripConfig,

    /// Audio capture
    pub capture: CaptureConfig,

    /// Initial analyzer settings
    pub analyzer: AnalyzerSettings,

    /// Loudness the AGC steers toward
    pub agc_target: f32,

    /// Initial global effect
    pub effect: String,

    /// Initial frame rate
    pub fps: f32,

    /// How long `stop` waits for a worker thread before detaching it
    pub join_timeout_ms: u64,

    /// Whether `start` also starts audio capture
    pub audio_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strip: StripConfig::default(),
            capture: CaptureConfig::default(),
            analyzer: AnalyzerSettings::default(),
            agc_target: AGC_DEFAULT_TARGET,
            effect: "rainbow_cycle".to_string(),
            fps: 60.0,
            join_timeout_ms: 1000,
            audio_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate().map_err(EngineError::ConfigError)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.strip.validate()?;
        self.capture.validate()?;
        if !(self.agc_target.is_finite() && self.agc_target > 0.0 && self.agc_target <= 1.0) {
            return Err(format!("Invalid AGC target: {}", self.agc_target));
        }
        if !self.fps.is_finite() {
            return Err(format!("Invalid fps: {}", self.fps));
        }
        if self.join_timeout_ms == 0 {
            return Err("join_timeout_ms must be positive".into());
        }
        Ok(())
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Engine state at startup
    pub fn initial_state(&self) -> EngineState {
        let mut state = EngineState {
            brightness: self.strip.brightness,
            effect: self.effect.clone(),
            max_leds: self.strip.led_count,
            ..EngineState::default()
        };
        state.fps = EngineState::clamp_fps(self.fps);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.capture.sample_rate, 44100);
        assert_eq!(config.capture.frame_size, 512);
        assert_eq!(config.effect, "rainbow_cycle");
        assert_eq!(config.join_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frame_latency() {
        let config = CaptureConfig {
            sample_rate: 48000,
            frame_size: 512,
            ..Default::default()
        };
        assert!((config.frame_ms() - 10.667).abs() < 0.01);
        assert_eq!(config.ring_capacity(), 512 * 8);
    }

    #[test]
    fn test_capture_validation() {
        assert!(CaptureConfig::default().validate().is_ok());

        let invalid_rate = CaptureConfig {
            sample_rate: 100,
            ..Default::default()
        };
        assert!(invalid_rate.validate().is_err());

        let invalid_frame = CaptureConfig {
            frame_size: 500,
            ..Default::default()
        };
        assert!(invalid_frame.validate().is_err());

        let invalid_ring = CaptureConfig {
            ring_frames: 1,
            ..Default::default()
        };
        assert!(invalid_ring.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "strip": { "led_count": 60, "fake": true }, "effect": "twinkle" }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.strip.led_count, 60);
        assert!(config.strip.fake);
        assert_eq!(config.strip.gpio_pin, 18);
        assert_eq!(config.effect, "twinkle");
        assert_eq!(config.capture.frame_size, 512);
        assert!(config.audio_enabled);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("lumen-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "fps": 30, "audio_enabled": false }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.fps, 30.0);
        assert!(!config.audio_enabled);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_errors() {
        let missing = EngineConfig::load("/nonexistent/lumen.json");
        assert!(matches!(missing, Err(EngineError::Io(_))));

        let path = std::env::temp_dir().join(format!("lumen-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(EngineError::Json(_))));

        std::fs::write(&path, r#"{ "capture": { "frame_size": 100 } }"#).unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(EngineError::ConfigError(_))));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_initial_state_follows_config() {
        let mut config = EngineConfig::default();
        config.strip.led_count = 144;
        config.strip.brightness = 90;
        config.fps = 500.0;
        let state = config.initial_state();
        assert_eq!(state.max_leds, 144);
        assert_eq!(state.brightness, 90);
        assert_eq!(state.fps, 240.0);
        assert_eq!(state.effect, "rainbow_cycle");
        assert_eq!(state.layout_generation(), 0);
        assert!(state.segments.is_empty());
    }
}
