//! Software implementations of the built-in shaders.
//!
//! Each kernel mirrors the WGSL source registered for its shader and works on
//! straight-alpha `Texture`s. Rows are processed in parallel with rayon; the
//! per-pixel math is sequential so results are bit-reproducible regardless of
//! the thread count.

use rayon::prelude::*;
use strata_core::color::luminance;
use strata_core::{Color, ColorProfile, Rect, Texture};

/// Build a texture by evaluating `f` for every pixel, one rayon task per row.
pub fn generate<F>(width: u32, height: u32, f: F) -> Texture
where
    F: Fn(u32, u32) -> [f32; 4] + Sync,
{
    let mut out = Texture::new(width, height);
    let row_len = width as usize;
    if row_len == 0 {
        return out;
    }
    out.pixels
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                *px = f(x as u32, y as u32);
            }
        });
    out
}

/// Per-pixel transform of an input texture.
pub fn map_pixels<F>(input: &Texture, f: F) -> Texture
where
    F: Fn(u32, u32, [f32; 4]) -> [f32; 4] + Sync,
{
    let width = input.width;
    generate(input.width, input.height, |x, y| {
        f(x, y, input.pixels[(y as usize) * (width as usize) + x as usize])
    })
}

fn map_rgb(px: [f32; 4], f: impl Fn(f32) -> f32) -> [f32; 4] {
    [f(px[0]), f(px[1]), f(px[2]), px[3]]
}

fn mix3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

fn splat(v: f32) -> [f32; 3] {
    [v, v, v]
}

pub fn linearize(input: &Texture, profile: ColorProfile) -> Texture {
    map_pixels(input, |_, _, px| map_rgb(px, |v| profile.linearize(v)))
}

pub fn encode(input: &Texture, profile: ColorProfile) -> Texture {
    map_pixels(input, |_, _, px| map_rgb(px, |v| profile.encode(v)))
}

/// Place `input` into `rect` on a transparent canvas, resampling bilinearly.
pub fn copy(input: &Texture, rect: Rect, canvas: (u32, u32)) -> Texture {
    generate(canvas.0, canvas.1, |x, y| {
        if rect.is_empty() || !rect.contains(x as i64, y as i64) {
            return [0.0; 4];
        }
        let (u, v) = rect.local_uv(x, y);
        input.sample_bilinear(u, v)
    })
}

/// Fill `rect` with the color at the center of `input`.
pub fn solid_fill(input: &Texture, rect: Rect, canvas: (u32, u32)) -> Texture {
    let color = input.sample_bilinear(0.5, 0.5);
    generate(canvas.0, canvas.1, |x, y| {
        if rect.contains(x as i64, y as i64) {
            color
        } else {
            [0.0; 4]
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicParams {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for BasicParams {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            hue: 0.0,
            exposure: 0.0,
            gamma: 1.0,
        }
    }
}

fn rotate_hue(c: [f32; 3], degrees: f32) -> [f32; 3] {
    let a = degrees.to_radians();
    let k = 0.577_350_3f32;
    let (sin_a, cos_a) = a.sin_cos();
    let dot = k * (c[0] + c[1] + c[2]);
    let cross = [
        k * (c[2] - c[1]),
        k * (c[0] - c[2]),
        k * (c[1] - c[0]),
    ];
    [
        c[0] * cos_a + cross[0] * sin_a + k * dot * (1.0 - cos_a),
        c[1] * cos_a + cross[1] * sin_a + k * dot * (1.0 - cos_a),
        c[2] * cos_a + cross[2] * sin_a + k * dot * (1.0 - cos_a),
    ]
}

/// Brightness, contrast, saturation, hue, exposure and gamma. Stages at
/// their identity value are skipped so the identity pass is exact.
pub fn basic_adjustments(input: &Texture, p: &BasicParams) -> Texture {
    let p = *p;
    map_pixels(input, move |_, _, px| {
        let mut c = [px[0], px[1], px[2]];
        if p.exposure != 0.0 {
            let k = p.exposure.exp2();
            c = c.map(|v| v * k);
        }
        if p.brightness != 100.0 {
            let k = p.brightness / 100.0;
            c = c.map(|v| v * k);
        }
        if p.contrast != 100.0 {
            let k = p.contrast / 100.0;
            c = c.map(|v| (v - 0.5) * k + 0.5);
        }
        if p.saturation != 100.0 {
            c = mix3(splat(luminance(c)), c, p.saturation / 100.0);
        }
        if p.hue != 0.0 {
            c = rotate_hue(c, p.hue);
        }
        if p.gamma != 1.0 {
            let inv = 1.0 / p.gamma.max(0.01);
            c = c.map(|v| v.max(0.0).powf(inv));
        }
        [c[0], c[1], c[2], px[3]]
    })
}

/// Strengths are in 0..100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StylisticParams {
    pub vintage: f32,
    pub sepia: f32,
    pub grayscale: f32,
    pub invert: f32,
    pub vibrance: f32,
    pub noise: f32,
    pub grain: f32,
    pub recolor: f32,
    pub recolor_color: Color,
}

impl Default for StylisticParams {
    fn default() -> Self {
        Self {
            vintage: 0.0,
            sepia: 0.0,
            grayscale: 0.0,
            invert: 0.0,
            vibrance: 0.0,
            noise: 0.0,
            grain: 0.0,
            recolor: 0.0,
            recolor_color: Color::WHITE,
        }
    }
}

fn hash2(x: f32, y: f32) -> f32 {
    let v = (x * 12.9898 + y * 78.233).sin() * 43_758.547;
    v - v.floor()
}

pub fn stylistic_effects(input: &Texture, p: &StylisticParams) -> Texture {
    let p = *p;
    map_pixels(input, move |x, y, px| {
        let mut c = [px[0], px[1], px[2]];
        let sepia = [
            c[0] * 0.393 + c[1] * 0.769 + c[2] * 0.189,
            c[0] * 0.349 + c[1] * 0.686 + c[2] * 0.168,
            c[0] * 0.272 + c[1] * 0.534 + c[2] * 0.131,
        ];
        if p.sepia != 0.0 {
            c = mix3(c, sepia, p.sepia / 100.0);
        }
        if p.vintage != 0.0 {
            let faded = mix3(sepia, [0.9, 0.8, 0.6], 0.25);
            c = mix3(c, faded, p.vintage / 100.0);
        }
        if p.grayscale != 0.0 {
            c = mix3(c, splat(luminance(c)), p.grayscale / 100.0);
        }
        if p.vibrance != 0.0 {
            let mx = c[0].max(c[1]).max(c[2]);
            let mn = c[0].min(c[1]).min(c[2]);
            let boost = (p.vibrance / 100.0) * (1.0 - (mx - mn));
            c = mix3(splat(luminance(c)), c, 1.0 + boost);
        }
        if p.recolor != 0.0 {
            let l = luminance(c);
            let tint = [
                p.recolor_color.r * l,
                p.recolor_color.g * l,
                p.recolor_color.b * l,
            ];
            c = mix3(c, tint, p.recolor / 100.0);
        }
        if p.invert != 0.0 {
            c = mix3(c, c.map(|v| 1.0 - v), p.invert / 100.0);
        }
        // Pixel centers, matching @builtin(position).
        let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
        if p.noise != 0.0 {
            let n = (hash2(fx, fy) - 0.5) * (p.noise / 100.0) * 0.5;
            c = c.map(|v| v + n);
        }
        if p.grain != 0.0 {
            let g = (hash2(fx + 17.0, fy + 59.0) - 0.5) * (p.grain / 100.0) * 0.25;
            c = c.map(|v| v + g);
        }
        [c[0], c[1], c[2], px[3]]
    })
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Darken towards the corners; `amount` in 0..100.
pub fn vignette(input: &Texture, amount: f32) -> Texture {
    let (w, h) = (input.width.max(1) as f32, input.height.max(1) as f32);
    map_pixels(input, move |x, y, px| {
        let u = (x as f32 + 0.5) / w - 0.5;
        let v = (y as f32 + 0.5) / h - 0.5;
        let d = (u * u + v * v).sqrt() * std::f32::consts::SQRT_2;
        let k = 1.0 - smoothstep(0.4, 1.0, d) * (amount / 100.0);
        [px[0] * k, px[1] * k, px[2] * k, px[3]]
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Horizontal,
    Vertical,
}

/// One separable Gaussian pass with `radius` in pixels.
///
/// Accumulates premultiplied color so transparent neighbours do not bleed
/// black. `stride` > 1 skips taps (interactive quality).
pub fn blur(input: &Texture, radius: f32, stride: u32, direction: Direction) -> Texture {
    if radius.is_nan() || radius <= 0.0 {
        return input.clone();
    }
    // Taps past the far edge only repeat the clamped border.
    let radius = radius.min(input.width.max(input.height).max(1) as f32);
    let taps = radius.ceil() as i64;
    let sigma = (radius / 2.0).max(0.5);
    let stride = stride.max(1) as usize;
    let weights: Vec<(i64, f32)> = (-taps..=taps)
        .step_by(stride)
        .map(|i| (i, (-((i * i) as f32) / (2.0 * sigma * sigma)).exp()))
        .collect();

    map_pixels(input, |x, y, _| {
        let mut acc = [0.0f32; 4];
        let mut total = 0.0f32;
        for &(i, w) in &weights {
            let s = match direction {
                Direction::Horizontal => input.get_clamped(x as i64 + i, y as i64),
                Direction::Vertical => input.get_clamped(x as i64, y as i64 + i),
            };
            acc[0] += s[0] * s[3] * w;
            acc[1] += s[1] * s[3] * w;
            acc[2] += s[2] * s[3] * w;
            acc[3] += s[3] * w;
            total += w;
        }
        let a = acc[3] / total;
        if a <= 0.0 {
            return [0.0; 4];
        }
        [acc[0] / acc[3], acc[1] / acc[3], acc[2] / acc[3], a]
    })
}
