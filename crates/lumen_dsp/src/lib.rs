//! Lumen DSP - Audio Analysis Module
//!
//! This crate turns live microphone frames into the feature snapshot that
//! drives audio-reactive effects:
//! - Hann-windowed FFT magnitude spectrum
//! - 8 perceptual frequency bands with fast and slow envelopes
//! - Automatic gain control that steers the loudest band toward a target
//! - Spectral-flux onset detection with an adaptive threshold and BPM estimate
//!
//! # Architecture
//!
//! [`SpectralAnalyzer`] owns every piece of state (AGC reference, envelopes,
//! flux history, beat timestamps) and is driven one frame at a time by the
//! capture loop. Time is passed in explicitly, so the analyzer can be tested
//! against a synthetic clock.

mod agc;
mod analyzer;
mod bands;
mod error;
mod fft;
mod onset;
mod snapshot;

pub use agc::{AutoGain, AGC_DEFAULT_TARGET, AGC_INITIAL_REFERENCE, AGC_MAX_GAIN, AGC_MIN_GAIN};
pub use analyzer::{
    AnalyzerSettings, AudioSettingsPatch, SpectralAnalyzer, DEFAULT_FRAME_SIZE, DEFAULT_SAMPLE_RATE,
};
pub use bands::{BandLayout, BAND_COUNT, BAND_RANGES};
pub use error::DspError;
pub use fft::{SpectrumFft, PCM_FULL_SCALE};
pub use onset::{OnsetDetector, BPM_WINDOW, DEFAULT_BEAT_THRESHOLD, FLUX_HISTORY, MIN_BEAT_INTERVAL};
pub use snapshot::AudioSnapshot;
