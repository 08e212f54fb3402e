//! FFT Magnitude Spectrum
//!
//! Windows a mono PCM frame, runs a forward FFT and exposes the magnitude of
//! the non-negative frequency bins.
//!
//! # Architecture
//!
//! All working buffers are allocated once at construction. The per-frame path
//! (`process`) performs no allocation, so it is safe to run at the capture
//! cadence on the analysis thread.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Full-scale amplitude of 16-bit PCM.
///
/// Normalized `f32` samples are rescaled to this range before analysis so the
/// gain constants used downstream are expressed in 16-bit units.
pub const PCM_FULL_SCALE: f32 = 32768.0;

/// Hann window coefficient for sample `n` of a `size`-point frame
fn hann_window(n: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

/// Pre-computed Hann window lookup table
struct HannWindow {
    coeffs: Vec<f32>,
}

impl HannWindow {
    fn new(size: usize) -> Self {
        let coeffs = (0..size).map(|i| hann_window(i, size)).collect();
        Self { coeffs }
    }

    #[inline]
    fn apply(&self, sample: f32, index: usize) -> f32 {
        sample * self.coeffs[index]
    }
}

/// Windowed forward FFT producing a magnitude spectrum
pub struct SpectrumFft {
    size: usize,
    window: HannWindow,
    fft: Arc<dyn Fft<f32>>,
    /// Working buffer, transformed in place
    buffer: Vec<Complex<f32>>,
    /// Magnitudes of bins `0..=size/2`
    magnitudes: Vec<f32>,
}

impl SpectrumFft {
    /// Create an FFT stage for frames of `size` samples
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        Self {
            size,
            window: HannWindow::new(size),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            magnitudes: vec![0.0; size / 2 + 1],
        }
    }

    /// Frame size this stage was planned for
    pub fn size(&self) -> usize {
        self.size
    }

    /// Window and transform one frame.
    ///
    /// `frame` must hold exactly `size()` normalized samples; extra samples are
    /// ignored and missing ones count as silence. Non-finite samples are treated
    /// as silence. Returns the RMS of the windowed frame relative to full scale,
    /// clipped to 1.
    pub fn process(&mut self, frame: &[f32]) -> f32 {
        let mut sum_sq = 0.0_f64;

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let raw = frame.get(i).copied().unwrap_or(0.0);
            let sample = if raw.is_finite() {
                raw.clamp(-1.0, 1.0) * PCM_FULL_SCALE
            } else {
                0.0
            };
            let windowed = self.window.apply(sample, i);
            sum_sq += f64::from(windowed) * f64::from(windowed);
            *slot = Complex::new(windowed, 0.0);
        }

        self.fft.process(&mut self.buffer);

        for (magnitude, bin) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *magnitude = bin.norm();
        }

        let rms = (sum_sq / self.size as f64).sqrt() as f32;
        (rms / PCM_FULL_SCALE).min(1.0)
    }

    /// Magnitude spectrum of the last processed frame (`size/2 + 1` bins)
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }
}
