//! Decaying particle effects
//!
//! Each instance keeps a per-pixel intensity array sized to its segment.
//! Every frame intensities decay by `fade^(dt * 60)` and new full-intensity
//! points spawn at a rate proportional to `length * density * dt`. The
//! fractional part of the spawn count carries over to the next frame so slow
//! rates still spawn on average. A frame never spawns more points than the
//! segment has pixels.
//!
//! Randomness comes from a `SmallRng` with a fixed seed, so output depends
//! only on the context sequence an instance has seen.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use super::{lerp_color, params, Effect, EffectContext, EffectDescriptor, EffectError, EffectRegistry, Palette};
use lumen_strip::Rgb;

const TWINKLE_SEED: u64 = 0x7417_4b1e;
const CONFETTI_SEED: u64 = 0xc0f3_77e1;

pub(super) fn register(registry: &mut EffectRegistry) {
    registry.register(EffectDescriptor::new(
        "twinkle",
        "Twinkle",
        "party",
        "Twinkling stars across the strip",
        || params(json!({ "density": 0.12, "fade": 0.88, "color": [255, 255, 255], "background": [0, 0, 0] })),
        || Box::new(Twinkle::new(TWINKLE_SEED)),
    ));
    registry.register(EffectDescriptor::new(
        "confetti",
        "Confetti",
        "party",
        "Colorful confetti flashes",
        || params(json!({ "chance": 0.22, "fade": 0.9, "palette": "neon" })),
        || Box::new(Confetti::new(CONFETTI_SEED)),
    ));
}

/// Per-pixel intensities with decay and spawn bookkeeping
struct Particles {
    levels: Vec<f32>,
    credit: f32,
}

impl Particles {
    fn new() -> Self {
        Self {
            levels: Vec::new(),
            credit: 0.0,
        }
    }

    /// Resize to `length`, dropping all state if it changed
    fn fit(&mut self, length: usize) -> bool {
        if self.levels.len() == length {
            return false;
        }
        self.levels = vec![0.0; length];
        self.credit = 0.0;
        true
    }

    fn decay(&mut self, fade: f32, dt: f32) {
        let factor = fade.clamp(0.0, 0.999).powf(dt.max(0.0) * 60.0);
        for level in &mut self.levels {
            *level *= factor;
        }
    }

    /// Add `rate` to the spawn credit and return how many points to spawn now,
    /// at most one per pixel
    fn take_spawns(&mut self, rate: f32) -> usize {
        if !rate.is_finite() || rate <= 0.0 {
            return 0;
        }
        let cap = self.levels.len();
        self.credit += rate;
        if self.credit >= cap as f32 {
            self.credit = 0.0;
            return cap;
        }
        let whole = self.credit.floor();
        self.credit -= whole;
        whole as usize
    }
}

struct Twinkle {
    particles: Particles,
    rng: SmallRng,
}

impl Twinkle {
    fn new(seed: u64) -> Self {
        Self {
            particles: Particles::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Effect for Twinkle {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let density = ctx.f32_param("density", 0.12).max(0.0);
        let fade = ctx.f32_param("fade", 0.88);
        let color = ctx.color_param("color", Rgb::WHITE);
        let background = ctx.color_param("background", Rgb::BLACK);

        let len = ctx.length;
        self.particles.fit(len);
        self.particles.decay(fade, ctx.dt);

        let spawns = self.particles.take_spawns(len as f32 * density * ctx.dt * 8.0);
        for _ in 0..spawns {
            let idx = self.rng.random_range(0..len);
            self.particles.levels[idx] = 1.0;
        }

        Ok(self
            .particles
            .levels
            .iter()
            .map(|&level| lerp_color(background, color, level))
            .collect())
    }
}

struct Confetti {
    particles: Particles,
    colors: Vec<Rgb>,
    rng: SmallRng,
}

impl Confetti {
    fn new(seed: u64) -> Self {
        Self {
            particles: Particles::new(),
            colors: Vec::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Effect for Confetti {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let chance = ctx.f32_param("chance", 0.22).max(0.0);
        let fade = ctx.f32_param("fade", 0.9);
        let palette = ctx.palette_param("palette", Palette::Neon);

        let len = ctx.length;
        if self.particles.fit(len) {
            self.colors = vec![Rgb::WHITE; len];
        }
        self.particles.decay(fade, ctx.dt);

        let spawns = self.particles.take_spawns(len as f32 * chance * ctx.dt * 6.0);
        for _ in 0..spawns {
            let idx = self.rng.random_range(0..len);
            self.particles.levels[idx] = 1.0;
            self.colors[idx] = palette.sample(self.rng.random::<f32>());
        }

        Ok(self
            .particles
            .levels
            .iter()
            .zip(&self.colors)
            .map(|(&level, &color)| color.scale(level.clamp(0.0, 1.0)))
            .collect())
    }
}
