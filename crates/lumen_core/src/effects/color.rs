//! Color math shared by effects

use lumen_strip::Rgb;

/// HSV to RGB; `h` wraps, `s` and `v` are clamped to 0..1
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb {
    let h = if h.is_finite() { h.rem_euclid(1.0) } else { 0.0 };
    let s = if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 };
    let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };

    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match sector as u32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb::from_f32(r * 255.0, g * 255.0, b * 255.0)
}

/// Linear interpolation between two colors; `t` is clamped to 0..1
pub fn lerp_color(a: Rgb, b: Rgb, t: f32) -> Rgb {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let [ar, ag, ab] = a.to_f32();
    let [br, bg, bb] = b.to_f32();
    Rgb::from_f32(ar + (br - ar) * t, ag + (bg - ag) * t, ab + (bb - ab) * t)
}

/// Named four-stop palettes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    Sunset,
    Ocean,
    Fire,
    Pastel,
    Neon,
}

const SUNSET: [Rgb; 4] = [Rgb(255, 94, 19), Rgb(255, 149, 5), Rgb(252, 201, 64), Rgb(255, 235, 191)];
const OCEAN: [Rgb; 4] = [Rgb(0, 78, 146), Rgb(0, 155, 199), Rgb(0, 216, 199), Rgb(160, 255, 255)];
const FIRE: [Rgb; 4] = [Rgb(30, 6, 0), Rgb(180, 40, 0), Rgb(255, 120, 10), Rgb(255, 220, 70)];
const PASTEL: [Rgb; 4] = [Rgb(255, 183, 213), Rgb(202, 236, 255), Rgb(178, 255, 227), Rgb(255, 245, 196)];
const NEON: [Rgb; 4] = [Rgb(41, 255, 229), Rgb(117, 101, 255), Rgb(255, 94, 247), Rgb(255, 255, 255)];

impl Palette {
    /// Look up a palette by name; unknown names give `Neon`
    pub fn from_name(name: &str) -> Self {
        match name {
            "sunset" => Palette::Sunset,
            "ocean" => Palette::Ocean,
            "fire" => Palette::Fire,
            "pastel" => Palette::Pastel,
            _ => Palette::Neon,
        }
    }

    pub fn stops(self) -> &'static [Rgb; 4] {
        match self {
            Palette::Sunset => &SUNSET,
            Palette::Ocean => &OCEAN,
            Palette::Fire => &FIRE,
            Palette::Pastel => &PASTEL,
            Palette::Neon => &NEON,
        }
    }

    /// Color at `pos`, wrapping every 1.0
    pub fn sample(self, pos: f32) -> Rgb {
        let stops = self.stops();
        let pos = if pos.is_finite() { pos.rem_euclid(1.0) } else { 0.0 };
        let scaled = pos * (stops.len() - 1) as f32;
        let i = (scaled.floor() as usize).min(stops.len() - 1);
        let next = (i + 1).min(stops.len() - 1);
        lerp_color(stops[i], stops[next], scaled - i as f32)
    }
}
