//! Automatic Gain Control
//!
//! Single-pole proportional controller that keeps the loudest band near a
//! target level regardless of microphone sensitivity or room loudness.
//!
//! A slow rolling reference tracks peak band energy; the applied scale is
//! `user_gain * agc_gain / max(1, reference)`. After each frame the controller
//! nudges `agc_gain` multiplicatively toward the target.

use crate::bands::BAND_COUNT;

/// Initial value of the rolling peak reference (16-bit magnitude units)
pub const AGC_INITIAL_REFERENCE: f32 = 2_000_000.0;

/// Default loudness the controller steers toward
pub const AGC_DEFAULT_TARGET: f32 = 0.85;

/// Bounds for the applied gain
pub const AGC_MIN_GAIN: f32 = 0.05;
pub const AGC_MAX_GAIN: f32 = 120.0;

/// Per-frame decay of the rolling reference
const REFERENCE_DECAY: f32 = 0.98;

/// Proportional rate of the feedback step
const FEEDBACK_RATE: f32 = 0.12;

/// Bounds on the multiplicative step so the gain never changes sign and a
/// single loud frame cannot collapse it
const MIN_STEP: f32 = 0.5;
const MAX_STEP: f32 = 1.5;

/// Exponent applied to scaled band energy
const LEVEL_CURVE: f32 = 0.9;

/// Automatic gain controller state
#[derive(Debug, Clone)]
pub struct AutoGain {
    reference: f32,
    gain: f32,
    target: f32,
}

impl Default for AutoGain {
    fn default() -> Self {
        Self::new(AGC_DEFAULT_TARGET)
    }
}

impl AutoGain {
    pub fn new(target: f32) -> Self {
        let target = if target.is_finite() { target.clamp(0.05, 1.0) } else { AGC_DEFAULT_TARGET };
        Self {
            reference: AGC_INITIAL_REFERENCE,
            gain: 1.0,
            target,
        }
    }

    /// Current controller gain, always within `[AGC_MIN_GAIN, AGC_MAX_GAIN]`
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn reference(&self) -> f32 {
        self.reference
    }

    /// Fold `peak` into the rolling reference and return the scale to apply
    /// to raw band energies this frame
    pub fn track(&mut self, peak: f32, user_gain: f32) -> f32 {
        let peak = if peak.is_finite() { peak } else { 0.0 };
        self.reference = REFERENCE_DECAY * self.reference + (1.0 - REFERENCE_DECAY) * peak.max(1.0);
        user_gain * self.gain / self.reference.max(1.0)
    }

    /// Map raw band energies to instantaneous levels in `[0, 1]`
    pub fn levels(raw: &[f32; BAND_COUNT], scale: f32) -> [f32; BAND_COUNT] {
        core::array::from_fn(|i| {
            let scaled = raw[i] * scale;
            if !scaled.is_finite() {
                return 0.0;
            }
            scaled.clamp(0.0, 2.0).powf(LEVEL_CURVE).min(1.0)
        })
    }

    /// Feedback step: compare the scaled peak against the target and adjust
    /// the gain for the next frame
    pub fn feedback(&mut self, peak: f32, scale: f32) {
        let level = peak * scale;
        if !level.is_finite() {
            return;
        }
        let error = self.target - level;
        let step = (1.0 + error * FEEDBACK_RATE).clamp(MIN_STEP, MAX_STEP);
        self.gain = (self.gain * step).clamp(AGC_MIN_GAIN, AGC_MAX_GAIN);
    }
}
