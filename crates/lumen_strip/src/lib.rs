//! Lumen Strip - Addressable LED Output
//!
//! This crate defines the output side of the engine:
//! - `Rgb` pixels and the `StripSink` capability
//! - `StripConfig` hardware parameters
//! - `MemoryStrip`, an in-memory stand-in for tests and headless runs
//!
//! # Drivers
//!
//! | Sink      | Selected when        | Notes                             |
//! |-----------|----------------------|-----------------------------------|
//! | `memory`  | `StripConfig::fake`  | Always available                  |
//! | hardware  | otherwise            | Not linked into this workspace    |
//!
//! The engine only talks to `dyn StripSink`, so a hardware driver plugs in
//! by implementing the trait.

mod error;
mod memory;
mod traits;

pub use error::StripError;
pub use memory::{MemoryStrip, MemoryStripHandle};
pub use traits::{Rgb, StripConfig, StripSink, MAX_LED_COUNT};

use tracing::info;

/// Open the strip described by `config`
///
/// Returns the in-memory stand-in when `config.fake` is set. No hardware
/// driver is built into this crate, so any other configuration fails with
/// [`StripError::DriverUnavailable`].
pub fn open_strip(config: &StripConfig) -> Result<Box<dyn StripSink>, StripError> {
    config.validate().map_err(StripError::InvalidConfiguration)?;

    if config.fake {
        info!("Using in-memory strip with {} pixels", config.led_count);
        return Ok(Box::new(MemoryStrip::new(config.led_count)));
    }

    Err(StripError::DriverUnavailable(format!(
        "no hardware driver for GPIO {} (run with a fake strip)",
        config.gpio_pin
    )))
}
