//! Procedural effects: pure functions of time, position and params

use std::f64::consts::TAU;

use serde_json::json;

use super::{hsv_to_rgb, params, Effect, EffectContext, EffectDescriptor, EffectError, EffectRegistry, Palette};
use lumen_strip::Rgb;

pub(super) fn register(registry: &mut EffectRegistry) {
    registry.register(EffectDescriptor::new(
        "solid",
        "Solid Color",
        "basic",
        "Constant single color",
        || params(json!({ "color": [255, 255, 255] })),
        || Box::new(Solid),
    ));
    registry.register(EffectDescriptor::new(
        "color_wipe",
        "Color Wipe",
        "basic",
        "Color sweeps across the strip",
        || params(json!({ "color": [255, 50, 120], "direction": "forward", "speed": 2.2 })),
        || Box::new(ColorWipe),
    ));
    registry.register(EffectDescriptor::new(
        "theater_chase",
        "Theater Chase",
        "basic",
        "Marquee-style marching lights",
        || params(json!({ "color": [255, 255, 255], "gap": 3, "speed": 1.0 })),
        || Box::new(TheaterChase),
    ));
    registry.register(EffectDescriptor::new(
        "strobe",
        "Strobe Flash",
        "basic",
        "Fast flashes with adjustable frequency and duty cycle",
        || params(json!({ "color": [255, 255, 255], "frequency": 8.0, "duty_cycle": 0.2 })),
        || Box::new(Strobe),
    ));
    registry.register(EffectDescriptor::new(
        "rainbow",
        "Soft Rainbow",
        "rainbow",
        "Slowly drifting rainbow",
        || params(json!({ "speed": 0.3 })),
        || Box::new(Rainbow { default_speed: 0.3 }),
    ));
    registry.register(EffectDescriptor::new(
        "rainbow_cycle",
        "Rainbow Cycle",
        "rainbow",
        "Full rainbow cycling along the strip",
        || params(json!({ "speed": 0.5 })),
        || Box::new(Rainbow { default_speed: 0.5 }),
    ));
    registry.register(EffectDescriptor::new(
        "palette_flow",
        "Palette Flow",
        "rainbow",
        "Scrolls a named palette evenly",
        || params(json!({ "palette": "sunset", "speed": 0.2 })),
        || Box::new(PaletteFlow),
    ));
    registry.register(EffectDescriptor::new(
        "breathing",
        "Breathing",
        "ambient",
        "Soft fade in and out",
        || params(json!({ "color": [80, 180, 255], "speed": 0.5, "depth": 0.7 })),
        || Box::new(Breathing),
    ));
    registry.register(EffectDescriptor::new(
        "comet",
        "Comet",
        "party",
        "Single comet with a fading tail",
        || params(json!({ "color": [255, 120, 60], "speed": 2.4, "tail": 10, "fade": 0.88 })),
        || Box::new(Comet),
    ));
}

struct Solid;

impl Effect for Solid {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        Ok(vec![ctx.color_param("color", Rgb::WHITE); ctx.length])
    }
}

struct ColorWipe;

impl Effect for ColorWipe {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb(255, 50, 120));
        let speed = f64::from(ctx.f32_param("speed", 2.2));
        let len = ctx.length;
        let phase = (ctx.time * speed).rem_euclid(len as f64);
        let direction = ctx.str_param("direction", "forward");

        Ok((0..len)
            .map(|i| {
                let idx = match direction {
                    "reverse" => len - 1 - i,
                    "center" => (len / 2).abs_diff(i),
                    _ => i,
                };
                if idx as f64 <= phase {
                    color
                } else {
                    Rgb::BLACK
                }
            })
            .collect())
    }
}

struct TheaterChase;

impl Effect for TheaterChase {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb::WHITE);
        let gap = ctx.usize_param("gap", 3, 1);
        let speed = f64::from(ctx.f32_param("speed", 1.0));
        let offset = (ctx.time * 20.0 * speed).floor().rem_euclid(gap as f64) as usize;

        Ok((0..ctx.length)
            .map(|i| if (i + offset) % gap == 0 { color } else { Rgb::BLACK })
            .collect())
    }
}

struct Strobe;

impl Effect for Strobe {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb::WHITE);
        let frequency = f64::from(ctx.f32_param("frequency", 8.0));
        let duty = f64::from(ctx.f32_param("duty_cycle", 0.2));
        let lit = (ctx.time * frequency).rem_euclid(1.0) < duty;
        Ok(vec![if lit { color } else { Rgb::BLACK }; ctx.length])
    }
}

/// Hue rotating along the strip; `rainbow` and `rainbow_cycle` differ only in
/// default speed
struct Rainbow {
    default_speed: f32,
}

impl Effect for Rainbow {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let speed = f64::from(ctx.f32_param("speed", self.default_speed));
        let base = (ctx.time * speed).rem_euclid(1.0);
        let len = ctx.length as f64;
        Ok((0..ctx.length)
            .map(|i| hsv_to_rgb((base + i as f64 / len) as f32, 1.0, 1.0))
            .collect())
    }
}

struct PaletteFlow;

impl Effect for PaletteFlow {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let palette = ctx.palette_param("palette", Palette::Sunset);
        let speed = f64::from(ctx.f32_param("speed", 0.2));
        let offset = (ctx.time * speed).rem_euclid(1.0);
        let len = ctx.length as f64;
        Ok((0..ctx.length)
            .map(|i| palette.sample((offset + i as f64 / len) as f32))
            .collect())
    }
}

struct Breathing;

impl Effect for Breathing {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb(80, 180, 255));
        let speed = f64::from(ctx.f32_param("speed", 0.5));
        let depth = ctx.f32_param("depth", 0.7).clamp(0.0, 1.0);
        let level = ((ctx.time * speed * TAU).sin() * 0.5 + 0.5) as f32 * depth;
        Ok(vec![color.scale(level); ctx.length])
    }
}

struct Comet;

impl Effect for Comet {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb(255, 120, 60));
        let speed = f64::from(ctx.f32_param("speed", 2.4));
        let tail = ctx.usize_param("tail", 10, 1);
        let fade = ctx.f32_param("fade", 0.88).clamp(0.0, 1.0);
        let len = ctx.length as f64;
        let head = (ctx.time * speed).rem_euclid(len);

        let mut out = ctx.black();
        let mut factor = 1.0_f32;
        for k in 0..tail.min(ctx.length) {
            let idx = (head - k as f64).rem_euclid(len) as usize;
            out[idx.min(ctx.length - 1)] = color.scale(factor);
            factor *= fade;
        }
        Ok(out)
    }
}
