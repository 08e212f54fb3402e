//! Post Filters
//!
//! Applied to the finished frame after brightness scaling, in order:
//! temporal blend, gamma, ordered dither, direction.

use crate::state::{Direction, LiveParams};
use lumen_strip::Rgb;

/// Frame counter wraps here so dither phases stay small
const FRAME_WRAP: u32 = 10_000_000;

/// Gamma within this distance of 1 is treated as linear
const GAMMA_EPSILON: f32 = 1e-3;

/// Post filter state carried between frames
#[derive(Debug, Default)]
pub struct PostFilter {
    history: Vec<Rgb>,
    frame: u32,
}

impl PostFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the blend history (next frame is not mixed with anything)
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Frames processed since creation, modulo the wrap point
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Run every filter over `buf` in place
    pub fn apply(&mut self, buf: &mut Vec<Rgb>, live: &LiveParams) {
        self.blend(buf, live.frame_blend);
        if (live.gamma - 1.0).abs() > GAMMA_EPSILON {
            apply_gamma(buf, live.gamma);
        }
        if live.dither && live.dither_strength > 0.0 {
            apply_dither(buf, self.frame, live.dither_strength);
        }
        *buf = apply_direction(buf, live.direction);
        self.frame = (self.frame + 1) % FRAME_WRAP;
    }

    fn blend(&mut self, buf: &mut [Rgb], frame_blend: f32) {
        if self.history.len() != buf.len() {
            self.history = buf.to_vec();
            return;
        }
        if frame_blend > 0.0 {
            let mix = 1.0 - frame_blend.clamp(0.0, 0.98);
            for (px, prev) in buf.iter_mut().zip(&self.history) {
                let [r, g, b] = px.to_f32();
                let [pr, pg, pb] = prev.to_f32();
                *px = Rgb::from_f32(pr + (r - pr) * mix, pg + (g - pg) * mix, pb + (b - pb) * mix);
            }
        }
        self.history.copy_from_slice(buf);
    }
}

fn apply_gamma(buf: &mut [Rgb], gamma: f32) {
    let inv = 1.0 / gamma;
    let curve = |c: u8| (c as f32 / 255.0).powf(inv) * 255.0;
    for px in buf.iter_mut() {
        *px = Rgb::from_f32(curve(px.0), curve(px.1), curve(px.2));
    }
}

fn apply_dither(buf: &mut [Rgb], frame: u32, strength: f32) {
    let phase = (frame.wrapping_mul(31) & 0xFF) as usize;
    for (i, px) in buf.iter_mut().enumerate() {
        let noise = ((i.wrapping_mul(73) + phase) % 7) as f32 - 3.0;
        let offset = noise * strength;
        let nudge = |c: u8| if c == 0 { 0.0 } else { c as f32 + offset };
        *px = Rgb::from_f32(nudge(px.0), nudge(px.1), nudge(px.2));
    }
}

fn apply_direction(buf: &[Rgb], direction: Direction) -> Vec<Rgb> {
    match direction {
        Direction::Forward => buf.to_vec(),
        Direction::Reverse => buf.iter().rev().copied().collect(),
        Direction::Center => {
            let mid = (buf.len() as f32 - 1.0) / 2.0;
            (0..buf.len())
                .map(|i| buf[((i as f32 - mid).abs().floor() as usize).min(buf.len() - 1)])
                .collect()
        }
    }
}
