//! Effect Abstraction and Registry
//!
//! An effect turns an [`EffectContext`] into one color per segment pixel.
//! Instances may keep state between frames (particle arrays, peak holds);
//! the compositor owns one instance per `(effect, start, end)` key.
//!
//! The [`EffectRegistry`] maps effect ids to descriptors carrying metadata and
//! a factory. It is immutable once handed to the engine.

mod audio;
mod basic;
mod color;
mod particle;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state::{EngineState, LiveParams, Params, Segment};
use lumen_dsp::AudioSnapshot;
use lumen_strip::Rgb;

pub use color::{hsv_to_rgb, lerp_color, Palette};

/// Failure reported by an effect's `render`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("Render failed: {0}")]
    Failed(String),
}

/// A visual effect
pub trait Effect: Send {
    /// Produce `ctx.length` colors. Shorter output is repeated by the
    /// compositor and longer output truncated.
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError>;
}

/// Everything an effect may read while rendering one segment
pub struct EffectContext<'a> {
    /// Speed-scaled timeline in seconds
    pub time: f64,
    /// Speed-scaled frame delta in seconds
    pub dt: f32,
    /// Segment length in pixels (at least 1)
    pub length: usize,
    /// Global params with segment overrides merged on top
    pub params: &'a Params,
    pub audio: &'a AudioSnapshot,
    pub state: &'a EngineState,
    pub segment: &'a Segment,
    pub live: &'a LiveParams,
    pub master_speed: f32,
}

impl<'a> EffectContext<'a> {
    /// Numeric param, or `default` when missing, non-numeric or non-finite
    pub fn f32_param(&self, key: &str, default: f32) -> f32 {
        self.params
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    /// Integer param, at least `min`
    pub fn usize_param(&self, key: &str, default: usize, min: usize) -> usize {
        let value = self.f32_param(key, default as f32);
        if value <= min as f32 {
            min
        } else {
            value as usize
        }
    }

    pub fn bool_param(&self, key: &str, default: bool) -> bool {
        self.params.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn str_param<'s>(&'s self, key: &str, default: &'s str) -> &'s str {
        self.params.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    /// Color param given as `[r, g, b]`
    pub fn color_param(&self, key: &str, default: Rgb) -> Rgb {
        let Some(Value::Array(items)) = self.params.get(key) else {
            return default;
        };
        let channels: Vec<f32> = items.iter().filter_map(Value::as_f64).map(|v| v as f32).collect();
        match channels.as_slice() {
            [r, g, b, ..] => Rgb::from_f32(*r, *g, *b),
            _ => default,
        }
    }

    /// Named palette param
    pub fn palette_param(&self, key: &str, default: Palette) -> Palette {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(Palette::from_name)
            .unwrap_or(default)
    }

    /// All-black buffer for this segment
    pub fn black(&self) -> Vec<Rgb> {
        vec![Rgb::BLACK; self.length]
    }
}

/// Effect metadata as listed to a control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectInfo {
    pub id: String,
    pub label: String,
    pub category: String,
    pub description: String,
    pub default_params: Params,
}

/// Registry entry: metadata plus a factory
pub struct EffectDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    defaults: fn() -> Params,
    factory: fn() -> Box<dyn Effect>,
}

impl EffectDescriptor {
    pub fn new(
        id: &'static str,
        label: &'static str,
        category: &'static str,
        description: &'static str,
        defaults: fn() -> Params,
        factory: fn() -> Box<dyn Effect>,
    ) -> Self {
        Self {
            id,
            label,
            category,
            description,
            defaults,
            factory,
        }
    }

    /// Build a fresh instance
    pub fn create(&self) -> Box<dyn Effect> {
        (self.factory)()
    }

    pub fn default_params(&self) -> Params {
        (self.defaults)()
    }

    pub fn info(&self) -> EffectInfo {
        EffectInfo {
            id: self.id.to_string(),
            label: self.label.to_string(),
            category: self.category.to_string(),
            description: self.description.to_string(),
            default_params: self.default_params(),
        }
    }
}

/// Map from effect id to descriptor, in registration order
#[derive(Default)]
pub struct EffectRegistry {
    entries: Vec<Arc<EffectDescriptor>>,
    index: HashMap<&'static str, usize>,
}

impl EffectRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in effect
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        basic::register(&mut registry);
        particle::register(&mut registry);
        audio::register(&mut registry);
        registry
    }

    /// Add a descriptor, replacing any existing entry with the same id
    pub fn register(&mut self, descriptor: EffectDescriptor) {
        let descriptor = Arc::new(descriptor);
        match self.index.get(descriptor.id) {
            Some(&slot) => self.entries[slot] = descriptor,
            None => {
                self.index.insert(descriptor.id, self.entries.len());
                self.entries.push(descriptor);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<EffectDescriptor>> {
        self.index.get(id).map(|&slot| &self.entries[slot])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata for every registered effect
    pub fn list(&self) -> Vec<EffectInfo> {
        self.entries.iter().map(|d| d.info()).collect()
    }
}

/// Turn a `json!` object literal into params
pub(crate) fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}
