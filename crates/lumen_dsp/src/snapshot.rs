//! Audio Feature Snapshot
//!
//! The immutable value published by the analyzer once per analysis frame and
//! read by the compositor once per render tick.

use serde::{Deserialize, Serialize};

use crate::agc::{AGC_MAX_GAIN, AGC_MIN_GAIN};
use crate::bands::BAND_COUNT;

/// Audio features for one analysis frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSnapshot {
    /// Smoothed per-band energy, 0..1
    pub bands: [f32; BAND_COUNT],
    /// Overall loudness, 0..1
    pub vol: f32,
    /// True only on the frame a beat was detected
    pub beat: bool,
    /// Tempo estimate, 0 when undetermined
    pub bpm: f32,
    /// Onset energy, 0..1
    pub flux: f32,
    /// Windowed RMS relative to full scale, 0..1
    pub rms: f32,
    /// Low-frequency energy, 0..1
    pub bass: f32,
    /// Automatic gain currently applied, 0.05..120
    pub agc_gain: f32,
    /// Whether audio analysis is active
    pub enabled: bool,
    /// Why audio is disabled, if it is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for AudioSnapshot {
    fn default() -> Self {
        Self {
            bands: [0.0; BAND_COUNT],
            vol: 0.0,
            beat: false,
            bpm: 0.0,
            flux: 0.0,
            rms: 0.0,
            bass: 0.0,
            agc_gain: 1.0,
            enabled: true,
            error: None,
        }
    }
}

impl AudioSnapshot {
    /// Snapshot for disabled audio: every feature zeroed except the gain
    pub fn disabled(agc_gain: f32, error: Option<String>) -> Self {
        Self {
            agc_gain: sanitize_gain(agc_gain),
            enabled: false,
            error,
            ..Self::default()
        }
    }

    /// Whether every numeric field lies in its documented range
    pub fn is_well_formed(&self) -> bool {
        let unit = |v: f32| (0.0..=1.0).contains(&v);
        let features_ok = self.bands.iter().all(|&b| unit(b))
            && unit(self.vol)
            && unit(self.flux)
            && unit(self.rms)
            && unit(self.bass)
            && self.bpm.is_finite()
            && self.bpm >= 0.0
            && (AGC_MIN_GAIN..=AGC_MAX_GAIN).contains(&self.agc_gain);

        let disabled_ok = self.enabled
            || (self.bands.iter().all(|&b| b == 0.0)
                && self.vol == 0.0
                && !self.beat
                && self.bpm == 0.0
                && self.flux == 0.0
                && self.rms == 0.0
                && self.bass == 0.0);

        features_ok && disabled_ok
    }
}

fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.clamp(AGC_MIN_GAIN, AGC_MAX_GAIN)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_well_formed() {
        let snap = AudioSnapshot::default();
        assert_eq!(snap.bands.len(), BAND_COUNT);
        assert!(snap.is_well_formed());
    }

    #[test]
    fn test_disabled_keeps_gain_only() {
        let snap = AudioSnapshot::disabled(12.5, Some("No audio input device detected".into()));
        assert!(!snap.enabled);
        assert_eq!(snap.agc_gain, 12.5);
        assert!(snap.bands.iter().all(|&b| b == 0.0));
        assert!(!snap.beat);
        assert!(snap.is_well_formed());
        assert!(snap.error.as_deref().unwrap().contains("No audio"));
    }

    #[test]
    fn test_disabled_sanitizes_gain() {
        assert_eq!(AudioSnapshot::disabled(f32::NAN, None).agc_gain, 1.0);
        assert_eq!(AudioSnapshot::disabled(1000.0, None).agc_gain, AGC_MAX_GAIN);
    }

    #[test]
    fn test_serialization_omits_missing_error() {
        let json = serde_json::to_string(&AudioSnapshot::default()).unwrap();
        assert!(!json.contains("error"));
        assert!(json.contains("\"bands\""));

        let disabled = AudioSnapshot::disabled(1.0, Some("boom".into()));
        let json = serde_json::to_string(&disabled).unwrap();
        let back: AudioSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, disabled);
    }
}
