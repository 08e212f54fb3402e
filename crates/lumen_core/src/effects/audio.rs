//! Audio-reactive effects: map the latest snapshot onto position and brightness

use std::f64::consts::TAU;

use serde_json::json;

use super::{params, Effect, EffectContext, EffectDescriptor, EffectError, EffectRegistry, Palette};
use lumen_dsp::BAND_COUNT;
use lumen_strip::Rgb;

pub(super) fn register(registry: &mut EffectRegistry) {
    registry.register(EffectDescriptor::new(
        "audio_bars",
        "Audio Bars",
        "music",
        "Spectrum bars following the audio, optionally mirrored",
        || params(json!({ "mirror": true, "palette": "neon", "span": 0 })),
        || Box::new(AudioBars),
    ));
    registry.register(EffectDescriptor::new(
        "energy_wave",
        "Energy Wave",
        "music",
        "Wave whose brightness follows the volume",
        || params(json!({ "color": [0, 255, 200] })),
        || Box::new(EnergyWave),
    ));
    registry.register(EffectDescriptor::new(
        "bass_pulse",
        "Bass Pulse",
        "music",
        "Whole strip pulses with the low end",
        || params(json!({ "color": [255, 90, 0] })),
        || Box::new(BassPulse),
    ));
    registry.register(EffectDescriptor::new(
        "strobe_on_beat",
        "Strobe on Beat",
        "music",
        "Flash on every detected beat",
        || params(json!({ "color": [255, 255, 255], "flash_ms": 80 })),
        || Box::new(StrobeOnBeat::default()),
    ));
    registry.register(EffectDescriptor::new(
        "spectrum_gravity",
        "Spectrum Gravity",
        "music",
        "Frequency bars with slowly falling peaks",
        || params(json!({ "decay": 0.95, "palette": "ocean" })),
        || Box::new(SpectrumGravity::default()),
    ));
    registry.register(EffectDescriptor::new(
        "beat_wave",
        "Beat Wave",
        "music",
        "Wave rolling out from the center on each beat",
        || params(json!({ "color": [180, 120, 255], "speed": 1.8, "decay": 0.92 })),
        || Box::new(BeatWave::default()),
    ));
}

/// Color of band `i` across a palette
fn band_color(palette: Palette, band: usize) -> Rgb {
    palette.sample(band as f32 / (BAND_COUNT - 1) as f32)
}

struct AudioBars;

impl Effect for AudioBars {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let palette = ctx.palette_param("palette", Palette::Neon);
        let mirror = ctx.bool_param("mirror", true);
        let len = ctx.length;
        let span = match ctx.usize_param("span", 0, 0) {
            0 => len,
            s => s.clamp(1, len),
        };
        let boosted = ctx.audio.bands.map(|b| (b.max(0.0).powf(0.85) * 1.6).min(1.0));

        let draw = |target: &mut [Rgb], width: usize| {
            let seg_len = (width / BAND_COUNT).max(1);
            for (i, level) in boosted.iter().enumerate() {
                let height = ((level * seg_len as f32) as usize).max(1);
                let color = band_color(palette, i);
                for k in 0..height {
                    if let Some(px) = target.get_mut(i * seg_len + k) {
                        *px = color;
                    }
                }
            }
        };

        let mut out = ctx.black();
        if mirror {
            let half_len = (span / 2).max(1);
            let mut half = vec![Rgb::BLACK; half_len];
            draw(&mut half, half_len);
            for (i, &color) in half.iter().rev().chain(half.iter()).enumerate().take(len) {
                out[i] = color;
            }
        } else {
            draw(&mut out[..span], span);
        }
        Ok(out)
    }
}

struct EnergyWave;

impl Effect for EnergyWave {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb(0, 255, 200));
        let vol = ctx.audio.vol;
        let len = ctx.length as f64;
        Ok((0..ctx.length)
            .map(|i| {
                let wave = ((i as f64 / len * TAU + ctx.time * 4.0).sin() * 0.5 + 0.5) as f32;
                color.scale((wave * vol * 2.0).clamp(0.0, 1.0))
            })
            .collect())
    }
}

struct BassPulse;

impl Effect for BassPulse {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb(255, 90, 0));
        let level = (ctx.audio.bass * 2.0).clamp(0.0, 1.0);
        Ok(vec![color.scale(level); ctx.length])
    }
}

#[derive(Default)]
struct StrobeOnBeat {
    last_flash: Option<f64>,
}

impl Effect for StrobeOnBeat {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb::WHITE);
        let duration = f64::from(ctx.f32_param("flash_ms", 80.0).max(0.0)) / 1000.0;
        if ctx.audio.beat {
            self.last_flash = Some(ctx.time);
        }
        let lit = self
            .last_flash
            .map(|at| ctx.time - at < duration)
            .unwrap_or(false);
        Ok(vec![if lit { color } else { Rgb::BLACK }; ctx.length])
    }
}

#[derive(Default)]
struct SpectrumGravity {
    peaks: [f32; BAND_COUNT],
}

impl Effect for SpectrumGravity {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let palette = ctx.palette_param("palette", Palette::Ocean);
        let decay = ctx.f32_param("decay", 0.95).clamp(0.0, 0.999);
        let seg_len = (ctx.length / BAND_COUNT).max(1);

        let mut out = ctx.black();
        for (i, &level) in ctx.audio.bands.iter().enumerate() {
            self.peaks[i] = level.clamp(0.0, 1.0).max(self.peaks[i] * decay);
            let height = ((self.peaks[i].powf(0.82) * seg_len as f32 * 1.6) as usize).max(1);
            let color = band_color(palette, i);
            for k in 0..height {
                if let Some(px) = out.get_mut(i * seg_len + k) {
                    *px = color;
                }
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
struct BeatWave {
    last_beat: Option<f64>,
}

impl Effect for BeatWave {
    fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
        let color = ctx.color_param("color", Rgb(180, 120, 255));
        let speed = f64::from(ctx.f32_param("speed", 1.8));
        let decay = ctx.f32_param("decay", 0.92).clamp(0.0, 1.0);
        if ctx.audio.beat {
            self.last_beat = Some(ctx.time);
        }
        let Some(at) = self.last_beat else {
            return Ok(ctx.black());
        };

        let age = (ctx.time - at).max(0.0);
        let radius = age * speed * (ctx.length as f64 / 2.0);
        let mid = ctx.length / 2;
        let fade_out = decay.powf((age * 10.0) as f32);

        Ok((0..ctx.length)
            .map(|i| {
                let dist = i.abs_diff(mid) as f64;
                if dist <= radius {
                    let edge = (1.0 - dist / radius.max(1.0)).max(0.0);
                    color.scale((edge * edge) as f32 * fade_out)
                } else {
                    Rgb::BLACK
                }
            })
            .collect())
    }
}
