//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during spectral analysis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Frame size mismatch: expected {expected}, got {got}")]
    FrameSizeMismatch { expected: usize, got: usize },

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Frame size must be a power of two >= 64, got {0}")]
    InvalidFrameSize(usize),
}
