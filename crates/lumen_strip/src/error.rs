//! Strip Error Types

use thiserror::Error;

/// Errors from LED strip output
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StripError {
    #[error("No strip driver available: {0}")]
    DriverUnavailable(String),

    #[error("Strip initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Failed to push frame to strip: {0}")]
    ShowFailed(String),

    #[error("Invalid strip configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StripError::DriverUnavailable("ws281x".into());
        assert!(err.to_string().contains("ws281x"));
    }
}
