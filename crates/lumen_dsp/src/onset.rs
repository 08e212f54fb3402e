//! Onset and Beat Detection
//!
//! Spectral flux over the lower half of the bands feeds an adaptive threshold
//! (`mean + 1.2 * std` over the recent flux history, floored by a user
//! threshold). Detected beats are timestamped to estimate tempo.
//!
//! Time is passed in explicitly as a `Duration` since analysis start, so the
//! detector behaves identically against wall-clock time or a synthetic clock.

use std::collections::VecDeque;
use std::time::Duration;

use crate::bands::BAND_COUNT;

/// Number of flux values retained
pub const FLUX_HISTORY: usize = 64;

/// Minimum spacing between two beats
pub const MIN_BEAT_INTERVAL: Duration = Duration::from_millis(140);

/// Beats older than this no longer contribute to the tempo estimate
pub const BPM_WINDOW: Duration = Duration::from_secs(15);

/// Default floor for the adaptive threshold
pub const DEFAULT_BEAT_THRESHOLD: f32 = 0.35;

/// Trailing history length used for the adaptive threshold
const THRESHOLD_WINDOW: usize = 24;

/// Standard deviations above the mean a flux value must reach
const THRESHOLD_SPREAD: f32 = 1.2;

/// Bass level below which no beat is reported
const MIN_BASS: f32 = 0.08;

/// Spectral flux, beat and tempo tracker
#[derive(Debug, Clone)]
pub struct OnsetDetector {
    previous: [f32; BAND_COUNT],
    history: VecDeque<f32>,
    last_beat: Option<Duration>,
    beats: VecDeque<Duration>,
    threshold_floor: f32,
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BEAT_THRESHOLD)
    }
}

impl OnsetDetector {
    pub fn new(threshold_floor: f32) -> Self {
        let mut detector = Self {
            previous: [0.0; BAND_COUNT],
            history: VecDeque::with_capacity(FLUX_HISTORY + 1),
            last_beat: None,
            beats: VecDeque::new(),
            threshold_floor: DEFAULT_BEAT_THRESHOLD,
        };
        detector.set_threshold_floor(threshold_floor);
        detector
    }

    /// Set the user threshold floor, clamped to `[0.05, 1.0]`
    pub fn set_threshold_floor(&mut self, floor: f32) {
        if floor.is_finite() {
            self.threshold_floor = floor.clamp(0.05, 1.0);
        }
    }

    pub fn threshold_floor(&self) -> f32 {
        self.threshold_floor
    }

    /// Positive-only change of the lower bands since the previous frame.
    ///
    /// The value is appended to the flux history before returning.
    pub fn flux(&mut self, levels: &[f32; BAND_COUNT]) -> f32 {
        let focus = (BAND_COUNT / 2).max(3);
        let rise: f32 = levels[..focus]
            .iter()
            .zip(&self.previous[..focus])
            .map(|(current, previous)| (current - previous).max(0.0))
            .sum();
        let flux = (rise / focus as f32).clamp(0.0, 1.0);

        self.previous = *levels;
        self.history.push_back(flux);
        while self.history.len() > FLUX_HISTORY {
            self.history.pop_front();
        }

        flux
    }

    /// Flux history, oldest first
    pub fn history(&self) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().copied()
    }

    /// Threshold the next flux value must exceed
    pub fn threshold(&self) -> f32 {
        let n = self.history.len().min(THRESHOLD_WINDOW);
        if n == 0 {
            return self.threshold_floor;
        }
        let recent = || self.history.iter().rev().take(n);
        let mean = recent().sum::<f32>() / n as f32;
        let variance = recent().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;
        let adaptive = mean + THRESHOLD_SPREAD * variance.sqrt();
        self.threshold_floor.max(adaptive)
    }

    /// Decide whether this frame carries a beat
    pub fn detect(&mut self, flux: f32, bass: f32, now: Duration) -> bool {
        let cooled_down = self
            .last_beat
            .map_or(true, |last| now.saturating_sub(last) > MIN_BEAT_INTERVAL);

        if flux > self.threshold() && bass > MIN_BASS && cooled_down {
            self.last_beat = Some(now);
            self.beats.push_back(now);
            self.prune(now);
            return true;
        }
        false
    }

    /// Tempo estimate from beats within the trailing window, 0 when fewer
    /// than two beats are available
    pub fn bpm(&self, now: Duration) -> f32 {
        let mut recent = self
            .beats
            .iter()
            .filter(|&&beat| now.saturating_sub(beat) < BPM_WINDOW);

        let Some(first) = recent.next() else {
            return 0.0;
        };
        let (count, last) = recent.fold((1_usize, *first), |(n, _), &beat| (n + 1, beat));
        if count < 2 {
            return 0.0;
        }

        // The mean of consecutive intervals telescopes to span / (count - 1)
        let mean_interval = last.saturating_sub(*first).as_secs_f32() / (count - 1) as f32;
        if mean_interval <= 0.0 {
            return 0.0;
        }
        60.0 / mean_interval
    }

    /// Time of the most recent beat
    pub fn last_beat(&self) -> Option<Duration> {
        self.last_beat
    }

    /// Forget flux history and beats, keeping the threshold floor
    pub fn reset(&mut self) {
        self.previous = [0.0; BAND_COUNT];
        self.history.clear();
        self.last_beat = None;
        self.beats.clear();
    }

    fn prune(&mut self, now: Duration) {
        while let Some(&oldest) = self.beats.front() {
            if now.saturating_sub(oldest) >= BPM_WINDOW {
                self.beats.pop_front();
            } else {
                break;
            }
        }
    }
}
