//! Spectral Audio Analyzer
//!
//! Turns fixed-size mono PCM frames into an [`AudioSnapshot`]:
//!
//! ```text
//! frame ─▶ Hann + FFT ─▶ 8 bands ─▶ AGC ─▶ fast/slow envelopes ─▶ vol, bass
//!                                    │                          
//!                                    └─▶ spectral flux ─▶ beat ─▶ bpm
//! ```
//!
//! All gain state, envelopes and detector history live in the analyzer and
//! persist across frames.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agc::{AutoGain, AGC_DEFAULT_TARGET};
use crate::bands::{BandLayout, BAND_COUNT};
use crate::error::DspError;
use crate::fft::SpectrumFft;
use crate::onset::{OnsetDetector, DEFAULT_BEAT_THRESHOLD};
use crate::snapshot::AudioSnapshot;

/// Default capture sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default analysis frame size in samples (~11.6ms at 44.1kHz)
pub const DEFAULT_FRAME_SIZE: usize = 512;

/// Smoothing factor of the fast envelope
const FAST_ALPHA: f32 = 0.6;

/// Contribution of the fast envelope to `vol`; the slow one gets the rest
const VOL_FAST_WEIGHT: f32 = 0.65;

/// User-adjustable analyzer settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerSettings {
    /// Input gain applied before AGC (0.1 - 100)
    pub gain: f32,
    /// Slow envelope smoothing factor (0.05 - 0.95)
    pub smoothing: f32,
    /// Floor of the adaptive beat threshold (0.05 - 1.0)
    pub beat_threshold: f32,
    /// When false, snapshots are published zeroed
    pub enabled: bool,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            gain: 4.0,
            smoothing: 0.28,
            beat_threshold: DEFAULT_BEAT_THRESHOLD,
            enabled: true,
        }
    }
}

/// Partial update of [`AnalyzerSettings`]; absent fields are left unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioSettingsPatch {
    #[serde(default)]
    pub gain: Option<f32>,
    #[serde(default)]
    pub smoothing: Option<f32>,
    #[serde(default)]
    pub beat_threshold: Option<f32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl AnalyzerSettings {
    /// Clamp every field into its documented range.
    /// Non-finite values fall back to the defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let pick = |v: f32, fallback: f32, lo: f32, hi: f32| {
            if v.is_finite() {
                v.clamp(lo, hi)
            } else {
                fallback
            }
        };
        Self {
            gain: pick(self.gain, defaults.gain, 0.1, 100.0),
            smoothing: pick(self.smoothing, defaults.smoothing, 0.05, 0.95),
            beat_threshold: pick(self.beat_threshold, defaults.beat_threshold, 0.05, 1.0),
            enabled: self.enabled,
        }
    }

    /// Apply a partial update and return the resulting settings.
    /// Non-finite values in the patch are ignored.
    pub fn apply(&mut self, patch: &AudioSettingsPatch) -> Self {
        let finite = |v: Option<f32>| v.filter(|x| x.is_finite());
        if let Some(gain) = finite(patch.gain) {
            self.gain = gain;
        }
        if let Some(smoothing) = finite(patch.smoothing) {
            self.smoothing = smoothing;
        }
        if let Some(threshold) = finite(patch.beat_threshold) {
            self.beat_threshold = threshold;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        *self = self.sanitized();
        *self
    }
}

/// Frame-by-frame spectral analyzer
pub struct SpectralAnalyzer {
    sample_rate: f32,
    fft: SpectrumFft,
    layout: BandLayout,
    agc: AutoGain,
    onset: OnsetDetector,
    fast: [f32; BAND_COUNT],
    slow: [f32; BAND_COUNT],
    settings: AnalyzerSettings,
}

impl SpectralAnalyzer {
    /// Create an analyzer for `frame_size`-sample frames at `sample_rate` Hz
    pub fn new(sample_rate: f32, frame_size: usize) -> Result<Self, DspError> {
        Self::with_target(sample_rate, frame_size, AGC_DEFAULT_TARGET)
    }

    /// Create an analyzer with a custom AGC loudness target
    pub fn with_target(sample_rate: f32, frame_size: usize, agc_target: f32) -> Result<Self, DspError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if frame_size < 64 || !frame_size.is_power_of_two() {
            return Err(DspError::InvalidFrameSize(frame_size));
        }

        let settings = AnalyzerSettings::default();
        Ok(Self {
            sample_rate,
            fft: SpectrumFft::new(frame_size),
            layout: BandLayout::new(sample_rate, frame_size),
            agc: AutoGain::new(agc_target),
            onset: OnsetDetector::new(settings.beat_threshold),
            fast: [0.0; BAND_COUNT],
            slow: [0.0; BAND_COUNT],
            settings,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn frame_size(&self) -> usize {
        self.fft.size()
    }

    /// Duration covered by one frame
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f32(self.frame_size() as f32 / self.sample_rate)
    }

    pub fn settings(&self) -> AnalyzerSettings {
        self.settings
    }

    /// Replace the settings (clamped)
    pub fn set_settings(&mut self, settings: AnalyzerSettings) {
        self.settings = settings.sanitized();
        self.onset.set_threshold_floor(self.settings.beat_threshold);
    }

    /// Gain currently applied by the AGC
    pub fn agc_gain(&self) -> f32 {
        self.agc.gain()
    }

    /// Analyze one frame captured at `now` (time since analysis start)
    pub fn process_frame(&mut self, frame: &[f32], now: Duration) -> Result<AudioSnapshot, DspError> {
        let expected = self.frame_size();
        if frame.len() != expected {
            return Err(DspError::FrameSizeMismatch {
                expected,
                got: frame.len(),
            });
        }

        let rms = self.fft.process(frame);
        let raw = self.layout.energies(self.fft.magnitudes());
        let peak = raw.iter().copied().fold(0.0_f32, f32::max);

        let scale = self.agc.track(peak, self.settings.gain);
        let levels = AutoGain::levels(&raw, scale);

        let slow_alpha = self.settings.smoothing;
        for i in 0..BAND_COUNT {
            self.fast[i] = FAST_ALPHA * levels[i] + (1.0 - FAST_ALPHA) * self.fast[i];
            self.slow[i] = slow_alpha * levels[i] + (1.0 - slow_alpha) * self.slow[i];
        }

        let vol_fast = max_of(&self.fast).clamp(0.0, 1.0);
        let vol_slow = max_of(&self.slow).clamp(0.0, 1.0);
        let vol = (vol_fast * VOL_FAST_WEIGHT + vol_slow * (1.0 - VOL_FAST_WEIGHT)).clamp(0.0, 1.0);
        let bass = ((self.slow[0] + self.slow[1]) * 0.5).clamp(0.0, 1.0);

        let flux = self.onset.flux(&levels);
        self.agc.feedback(peak, scale);

        if !self.settings.enabled {
            return Ok(AudioSnapshot::disabled(self.agc.gain(), None));
        }

        let beat = self.onset.detect(flux, bass, now);
        let bpm = self.onset.bpm(now);

        Ok(AudioSnapshot {
            bands: self.slow.map(|b| b.clamp(0.0, 1.0)),
            vol,
            beat,
            bpm,
            flux,
            rms,
            bass,
            agc_gain: self.agc.gain(),
            enabled: true,
            error: None,
        })
    }

    /// Snapshot describing an analyzer whose input is unavailable
    pub fn disabled_snapshot(&self, reason: impl Into<String>) -> AudioSnapshot {
        AudioSnapshot::disabled(self.agc.gain(), Some(reason.into()))
    }
}

fn max_of(values: &[f32; BAND_COUNT]) -> f32 {
    values.iter().copied().fold(0.0_f32, f32::max)
}
