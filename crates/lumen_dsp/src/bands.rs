//! Frequency Band Layout
//!
//! Partitions the FFT bins into eight fixed frequency ranges. Bin ranges are
//! resolved once for a given sample rate and frame size.

use std::ops::Range;

/// Number of analysis bands
pub const BAND_COUNT: usize = 8;

/// Band edges in Hz, lower bound inclusive, upper bound exclusive
pub const BAND_RANGES: [(f32, f32); BAND_COUNT] = [
    (20.0, 60.0),
    (60.0, 250.0),
    (250.0, 500.0),
    (500.0, 2000.0),
    (2000.0, 4000.0),
    (4000.0, 6000.0),
    (6000.0, 12000.0),
    (12000.0, 20000.0),
];

/// FFT bin ranges for each analysis band
#[derive(Debug, Clone)]
pub struct BandLayout {
    ranges: [Range<usize>; BAND_COUNT],
}

impl BandLayout {
    /// Resolve bin ranges for frames of `fft_size` samples at `sample_rate` Hz
    pub fn new(sample_rate: f32, fft_size: usize) -> Self {
        let bins = fft_size / 2 + 1;
        let bin_hz = f64::from(sample_rate) / fft_size as f64;
        let first_at_or_above =
            |from: usize, hz: f32| (from..bins).find(|&k| k as f64 * bin_hz >= f64::from(hz)).unwrap_or(bins);

        let ranges = core::array::from_fn(|band| {
            let (low, high) = BAND_RANGES[band];
            let start = first_at_or_above(0, low);
            let end = first_at_or_above(start, high);
            start..end
        });

        Self { ranges }
    }

    /// Number of FFT bins that fall inside `band`
    pub fn bin_count(&self, band: usize) -> usize {
        self.ranges.get(band).map_or(0, |r| r.len())
    }

    /// Mean magnitude per band; bands without bins report 0
    pub fn energies(&self, magnitudes: &[f32]) -> [f32; BAND_COUNT] {
        core::array::from_fn(|band| {
            let range = &self.ranges[band];
            let end = range.end.min(magnitudes.len());
            if range.start >= end {
                return 0.0;
            }
            let slice = &magnitudes[range.start..end];
            slice.iter().sum::<f32>() / slice.len() as f32
        })
    }
}
