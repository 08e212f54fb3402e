//! Strip Sink Traits
//!
//! Defines the capability every LED output must provide, plus the pixel and
//! configuration types shared with the engine.

use serde::{Deserialize, Serialize};

use crate::error::StripError;

/// Upper bound on strip length accepted by [`StripConfig::validate`]
pub const MAX_LED_COUNT: usize = 10_000;

/// One 8-bit RGB pixel (serialized as `[r, g, b]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);

    /// Build a pixel from float channels in 0..255.
    /// Non-finite channels become 0, everything else is rounded and clamped.
    pub fn from_f32(r: f32, g: f32, b: f32) -> Self {
        Rgb(channel(r), channel(g), channel(b))
    }

    /// Channels as floats
    pub fn to_f32(self) -> [f32; 3] {
        [f32::from(self.0), f32::from(self.1), f32::from(self.2)]
    }

    /// Multiply every channel by `factor`
    pub fn scale(self, factor: f32) -> Self {
        let [r, g, b] = self.to_f32();
        Self::from_f32(r * factor, g * factor, b * factor)
    }

    pub fn is_black(self) -> bool {
        self == Self::BLACK
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(c: [u8; 3]) -> Self {
        Rgb(c[0], c[1], c[2])
    }
}

fn channel(v: f32) -> u8 {
    if v.is_finite() {
        v.round().clamp(0.0, 255.0) as u8
    } else {
        0
    }
}

/// Hardware parameters for an addressable strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    /// Number of physical pixels
    pub led_count: usize,

    /// Data GPIO pin
    pub gpio_pin: u8,

    /// Signal frequency in Hz
    pub freq_hz: u32,

    /// DMA channel
    pub dma: u8,

    /// Invert the data signal (for inverting level shifters)
    pub invert: bool,

    /// Driver-level brightness, also the engine's initial brightness
    pub brightness: u8,

    /// PWM channel
    pub channel: u8,

    /// Use the in-memory stand-in instead of a hardware driver
    pub fake: bool,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            led_count: 300,
            gpio_pin: 18,
            freq_hz: 800_000,
            dma: 10,
            invert: false,
            brightness: 200,
            channel: 0,
            fake: false,
        }
    }
}

impl StripConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.led_count == 0 {
            return Err("led_count must be at least 1".into());
        }
        if self.led_count > MAX_LED_COUNT {
            return Err(format!(
                "led_count {} exceeds maximum {}",
                self.led_count, MAX_LED_COUNT
            ));
        }
        if !(400_000..=800_000).contains(&self.freq_hz) {
            return Err(format!("freq_hz {} must be 400000 or 800000", self.freq_hz));
        }
        if self.channel > 1 {
            return Err(format!("channel {} must be 0 or 1", self.channel));
        }
        Ok(())
    }
}

/// Trait for addressable LED outputs
///
/// Pixels are staged with `set_pixel` and latched onto the strip by `show`.
pub trait StripSink: Send {
    /// Get the name of this sink (e.g., "memory")
    fn name(&self) -> &'static str;

    /// Initialize the output; called once before the first frame
    fn begin(&mut self) -> Result<(), StripError>;

    /// Number of addressable pixels
    fn pixel_count(&self) -> usize;

    /// Stage one pixel. Out-of-range indices are ignored.
    fn set_pixel(&mut self, index: usize, color: Rgb);

    /// Latch the staged pixels onto the strip
    fn show(&mut self) -> Result<(), StripError>;
}
