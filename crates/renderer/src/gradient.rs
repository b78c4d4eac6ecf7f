//! Colormaps and gradient rendering for gridded model output.

use rayon::prelude::*;

/// Number of colors a colormap is sampled into.
///
/// One short of a full PNG palette so a transparent entry always fits.
pub const LUT_SIZE: usize = 255;

/// Color value in RGBA format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub const fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

/// Linear interpolation between two colors; `t` is clamped to `[0, 1]`.
pub fn interpolate_color(color1: Color, color2: Color, t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    let t_inv = 1.0 - t;

    Color::new(
        ((color1.r as f32 * t_inv) + (color2.r as f32 * t)).round() as u8,
        ((color1.g as f32 * t_inv) + (color2.g as f32 * t)).round() as u8,
        ((color1.b as f32 * t_inv) + (color2.b as f32 * t)).round() as u8,
        ((color1.a as f32 * t_inv) + (color2.a as f32 * t)).round() as u8,
    )
}

// Control points (position, color), positions ascending from 0 to 1
const BINARY: &[(f32, Color)] = &[(0.0, Color::rgb(255, 255, 255)), (1.0, Color::rgb(0, 0, 0))];

const GRAY: &[(f32, Color)] = &[(0.0, Color::rgb(0, 0, 0)), (1.0, Color::rgb(255, 255, 255))];

const JET: &[(f32, Color)] = &[
    (0.0, Color::rgb(0, 0, 128)),
    (0.125, Color::rgb(0, 0, 255)),
    (0.375, Color::rgb(0, 255, 255)),
    (0.625, Color::rgb(255, 255, 0)),
    (0.875, Color::rgb(255, 0, 0)),
    (1.0, Color::rgb(128, 0, 0)),
];

const VIRIDIS: &[(f32, Color)] = &[
    (0.0, Color::rgb(68, 1, 84)),
    (0.25, Color::rgb(59, 82, 139)),
    (0.5, Color::rgb(33, 145, 140)),
    (0.75, Color::rgb(94, 201, 98)),
    (1.0, Color::rgb(253, 231, 37)),
];

const BLUES: &[(f32, Color)] = &[
    (0.0, Color::rgb(247, 251, 255)),
    (0.5, Color::rgb(107, 174, 214)),
    (1.0, Color::rgb(8, 48, 107)),
];

const COOLWARM: &[(f32, Color)] = &[
    (0.0, Color::rgb(59, 76, 192)),
    (0.5, Color::rgb(221, 221, 221)),
    (1.0, Color::rgb(180, 4, 38)),
];

/// A named colormap sampled into [`LUT_SIZE`] colors.
#[derive(Debug, Clone)]
pub struct Colormap {
    name: &'static str,
    lut: Vec<Color>,
}

impl Colormap {
    pub const NAMES: [&'static str; 6] = ["binary", "gray", "jet", "viridis", "blues", "coolwarm"];

    /// Look up a colormap by name (case-insensitive). Unknown names give `binary`.
    pub fn by_name(name: &str) -> Self {
        let (name, stops) = match name.to_ascii_lowercase().as_str() {
            "gray" | "grey" => ("gray", GRAY),
            "jet" => ("jet", JET),
            "viridis" => ("viridis", VIRIDIS),
            "blues" => ("blues", BLUES),
            "coolwarm" => ("coolwarm", COOLWARM),
            _ => ("binary", BINARY),
        };
        Self {
            name,
            lut: sample(stops),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Color for a normalized value. Out-of-range values clamp to the ends.
    pub fn color_at(&self, normalized: f32) -> Color {
        let t = if normalized.is_nan() { 0.0 } else { normalized.clamp(0.0, 1.0) };
        let idx = (t * (LUT_SIZE - 1) as f32).round() as usize;
        self.lut[idx.min(LUT_SIZE - 1)]
    }
}

fn sample(stops: &[(f32, Color)]) -> Vec<Color> {
    (0..LUT_SIZE)
        .map(|i| {
            let t = i as f32 / (LUT_SIZE - 1) as f32;
            let upper = stops
                .iter()
                .position(|(pos, _)| *pos >= t)
                .unwrap_or(stops.len() - 1);
            if upper == 0 {
                return stops[0].1;
            }
            let (p0, c0) = stops[upper - 1];
            let (p1, c1) = stops[upper];
            let span = p1 - p0;
            let local = if span <= f32::EPSILON { 1.0 } else { (t - p0) / span };
            interpolate_color(c0, c1, local)
        })
        .collect()
}

/// Render grid data as RGBA pixels.
///
/// `data` is row-major with `height` rows of `width` values. Row 0 of the
/// data is drawn as the bottom row of the image. Non-finite values are
/// transparent.
pub fn render_grid(
    data: &[f32],
    width: usize,
    height: usize,
    min_val: f32,
    max_val: f32,
    colormap: &Colormap,
) -> Vec<u8> {
    let mut pixels = vec![0u8; width * height * 4];
    if width == 0 || height == 0 {
        return pixels;
    }

    let range = max_val - min_val;
    let range = if range.abs() < f32::EPSILON { 1.0 } else { range };

    pixels
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(out_row, row_pixels)| {
            let src_row = height - 1 - out_row;
            for x in 0..width {
                let value = data.get(src_row * width + x).copied().unwrap_or(f32::NAN);
                let color = if value.is_finite() {
                    colormap.color_at((value - min_val) / range)
                } else {
                    Color::transparent()
                };
                let p = x * 4;
                row_pixels[p] = color.r;
                row_pixels[p + 1] = color.g;
                row_pixels[p + 2] = color.b;
                row_pixels[p + 3] = color.a;
            }
        });

    pixels
}

/// Min and max of the finite values, if any.
pub fn finite_range(data: &[f32]) -> Option<(f32, f32)> {
    data.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_color_midpoint() {
        let c = interpolate_color(Color::rgb(0, 0, 0), Color::rgb(255, 255, 255), 0.5);
        assert_eq!(c, Color::rgb(128, 128, 128));
    }

    #[test]
    fn test_sample_hits_end_stops() {
        let lut = sample(JET);
        assert_eq!(lut.len(), LUT_SIZE);
        assert_eq!(lut[0], Color::rgb(0, 0, 128));
        assert_eq!(lut[LUT_SIZE - 1], Color::rgb(128, 0, 0));
    }
}
