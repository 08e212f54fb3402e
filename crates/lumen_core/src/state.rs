//! Engine Control State
//!
//! `EngineState` is the single mutable description of what the strip should
//! show. It is only changed through [`EngineState::apply`] and
//! [`EngineState::set_segments`], both of which clamp every value into range
//! and drop non-finite numbers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use lumen_strip::{Rgb, MAX_LED_COUNT};

/// Effect parameters: a JSON object
pub type Params = Map<String, Value>;

/// Orientation applied to the finished frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
    Center,
}

/// Global controls applied across all effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveParams {
    /// Timeline speed multiplier (0.05 - 10)
    pub master_speed: f32,
    /// Output gamma (0.2 - 4)
    pub gamma: f32,
    /// Weight of the previous frame in temporal blending (0 - 0.98)
    pub frame_blend: f32,
    pub direction: Direction,
    pub dither: bool,
    /// Dither amplitude (0 - 1)
    pub dither_strength: f32,
}

impl Default for LiveParams {
    fn default() -> Self {
        Self {
            master_speed: 1.0,
            gamma: 1.0,
            frame_blend: 0.15,
            direction: Direction::Forward,
            dither: true,
            dither_strength: 0.3,
        }
    }
}

/// Partial update of [`LiveParams`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivePatch {
    pub master_speed: Option<f32>,
    pub gamma: Option<f32>,
    pub frame_blend: Option<f32>,
    pub direction: Option<Direction>,
    pub dither: Option<bool>,
    pub dither_strength: Option<f32>,
}

impl LiveParams {
    /// Neutral post-processing: no blend, no gamma, no dither, forward
    pub fn neutral() -> Self {
        Self {
            frame_blend: 0.0,
            dither: false,
            ..Self::default()
        }
    }

    /// Clamp every field into range; non-finite values fall back to defaults
    pub fn sanitized(&self) -> Self {
        let d = Self::default();
        Self {
            master_speed: clamp_or(self.master_speed, d.master_speed, 0.05, 10.0),
            gamma: clamp_or(self.gamma, d.gamma, 0.2, 4.0),
            frame_blend: clamp_or(self.frame_blend, d.frame_blend, 0.0, 0.98),
            direction: self.direction,
            dither: self.dither,
            dither_strength: clamp_or(self.dither_strength, d.dither_strength, 0.0, 1.0),
        }
    }

    /// Merge a patch field by field
    pub fn apply(&mut self, patch: &LivePatch) {
        set_finite(&mut self.master_speed, patch.master_speed);
        set_finite(&mut self.gamma, patch.gamma);
        set_finite(&mut self.frame_blend, patch.frame_blend);
        set_finite(&mut self.dither_strength, patch.dither_strength);
        if let Some(direction) = patch.direction {
            self.direction = direction;
        }
        if let Some(dither) = patch.dither {
            self.dither = dither;
        }
        *self = self.sanitized();
    }
}

/// A contiguous, inclusive range of the strip with its own effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub name: String,
    pub start: usize,
    /// Inclusive
    pub end: usize,
    /// Falls back to the global effect when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    /// Overrides merged over the global effect params
    #[serde(default)]
    pub params: Params,
}

impl Segment {
    pub fn new(name: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            effect: None,
            params: Params::new(),
        }
    }

    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effect = Some(effect.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Implicit segment covering `len` pixels with the global effect
    pub fn whole_strip(len: usize) -> Self {
        Self::new("Strip", 0, len.saturating_sub(1))
    }
}

/// The engine's control state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    pub on: bool,
    pub brightness: u8,
    /// Global effect id
    pub effect: String,
    /// Target frame rate (10 - 240)
    pub fps: f32,
    /// Global intensity multiplier (0.1 - 3)
    pub intensity_boost: f32,
    /// Upper bound on driven pixels
    pub max_leds: usize,
    /// Global effect params
    pub effect_params: Params,
    pub live: LiveParams,
    pub segments: Vec<Segment>,
    #[serde(skip)]
    pub(crate) layout_generation: u64,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            on: true,
            brightness: 200,
            effect: "rainbow_cycle".to_string(),
            fps: 60.0,
            intensity_boost: 1.0,
            max_leds: 300,
            effect_params: Params::new(),
            live: LiveParams::default(),
            segments: Vec::new(),
            layout_generation: 0,
        }
    }
}

/// Partial update of [`EngineState`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatePatch {
    pub on: Option<bool>,
    /// Clamped to 0 - 255
    pub brightness: Option<f32>,
    pub effect: Option<String>,
    pub fps: Option<f32>,
    pub intensity_boost: Option<f32>,
    pub max_leds: Option<usize>,
    /// Replaces the global params; wins over `params`
    pub effect_params: Option<Params>,
    /// Alias of `effect_params`
    pub params: Option<Params>,
    pub live: Option<LivePatch>,
    pub segments: Option<Vec<Segment>>,
}

impl EngineState {
    pub fn clamp_fps(fps: f32) -> f32 {
        clamp_or(fps, 60.0, 10.0, 240.0)
    }

    /// Incremented on every segment layout change
    pub fn layout_generation(&self) -> u64 {
        self.layout_generation
    }

    /// Merge a patch into the state
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(on) = patch.on {
            self.on = on;
        }
        if let Some(brightness) = patch.brightness.filter(|b| b.is_finite()) {
            self.brightness = brightness.round().clamp(0.0, 255.0) as u8;
        }
        if let Some(effect) = patch.effect {
            self.effect = effect;
        }
        if let Some(fps) = patch.fps.filter(|f| f.is_finite()) {
            self.fps = Self::clamp_fps(fps);
        }
        if let Some(boost) = patch.intensity_boost.filter(|b| b.is_finite()) {
            self.intensity_boost = boost.clamp(0.1, 3.0);
        }
        if let Some(max_leds) = patch.max_leds {
            self.max_leds = max_leds.clamp(1, MAX_LED_COUNT);
        }
        if let Some(params) = patch.effect_params.or(patch.params) {
            self.effect_params = params;
        }
        if let Some(live) = patch.live {
            self.live.apply(&live);
        }
        if let Some(segments) = patch.segments {
            self.set_segments(segments);
        }
    }

    /// Replace the segment list and start a new layout generation
    pub fn set_segments(&mut self, segments: Vec<Segment>) -> &[Segment] {
        self.segments = segments;
        self.layout_generation = self.layout_generation.wrapping_add(1);
        &self.segments
    }
}

/// Engine state as reported to a control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    #[serde(flatten)]
    pub state: EngineState,
    /// Alias of `state.effect_params`
    pub params: Params,
    /// Last rendered frame
    pub frame_preview: Vec<Rgb>,
}

fn clamp_or(value: f32, fallback: f32, lo: f32, hi: f32) -> f32 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        fallback
    }
}

fn set_finite(slot: &mut f32, value: Option<f32>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        *slot = v;
    }
}
