//! Layer blending: the software counterpart of the `blend` shader.

use strata_core::{BlendMode, Texture};

use crate::kernels::generate;

fn overlay_channel(b: f32, s: f32) -> f32 {
    if b <= 0.5 {
        2.0 * b * s
    } else {
        1.0 - 2.0 * (1.0 - b) * (1.0 - s)
    }
}

/// Separable blend of backdrop `b` and source `s`, per channel.
pub fn blend_channel(mode: BlendMode, b: f32, s: f32) -> f32 {
    match mode {
        BlendMode::Normal => s,
        BlendMode::Multiply => b * s,
        BlendMode::Screen => b + s - b * s,
        BlendMode::Overlay => overlay_channel(b, s),
        BlendMode::Darken => b.min(s),
        BlendMode::Lighten => b.max(s),
        BlendMode::Add => (b + s).min(1.0),
    }
}

/// Source-over composite of one straight-alpha pixel.
///
/// `opacity` is the effective opacity at this pixel (layer opacity times
/// mask weight), in 0..1.
pub fn composite_pixel(dst: [f32; 4], src: [f32; 4], mode: BlendMode, opacity: f32) -> [f32; 4] {
    let sa = src[3] * opacity;
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3];
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return [0.0; 4];
    }
    let mut out = [0.0f32; 4];
    for c in 0..3 {
        let blended = blend_channel(mode, dst[c], src[c]);
        // Against a transparent backdrop the mode degenerates to normal.
        let mixed = src[c] + (blended - src[c]) * da;
        out[c] = (mixed * sa + dst[c] * da * (1.0 - sa)) / out_a;
    }
    out[3] = out_a;
    out
}

/// Blend `layer` over `backdrop`. `weights` holds one mask weight per pixel
/// when the layer has masks.
pub fn composite(
    backdrop: &Texture,
    layer: &Texture,
    weights: Option<&[f32]>,
    mode: BlendMode,
    opacity: f32,
) -> Texture {
    let width = backdrop.width as usize;
    generate(backdrop.width, backdrop.height, |x, y| {
        let i = (y as usize) * width + x as usize;
        let dst = backdrop.pixels[i];
        let src = layer.pixels.get(i).copied().unwrap_or([0.0; 4]);
        let w = weights.map_or(1.0, |w| w[i]);
        composite_pixel(dst, src, mode, opacity * w)
    })
}
