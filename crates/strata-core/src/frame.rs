use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::color::Color;

/// An 8-bit RGBA pixel buffer (straight alpha, 4 bytes per pixel).
///
/// This is the presentation format: raster layer images arrive as frame
/// buffers, and finished frames leave the compositor as one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameBuffer {
    /// Raw pixel data, row-major.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer filled with zeros (transparent black).
    pub fn new(width: u32, height: u32) -> Self {
        let size = (width as usize) * (height as usize) * 4;
        Self {
            data: vec![0u8; size],
            width,
            height,
        }
    }

    /// Create a frame buffer filled with a solid color.
    pub fn solid(width: u32, height: u32, color: &Color) -> Self {
        let pixel = color.to_rgba8();
        let pixel_count = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            data.extend_from_slice(&pixel);
        }
        Self {
            data,
            width,
            height,
        }
    }

    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Total byte size of the pixel data.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Get the RGBA value at a pixel coordinate. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Set the RGBA value at a pixel coordinate. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        if let Some(px) = self.data.get_mut(offset..offset + 4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// True when the buffer length agrees with its declared dimensions.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.pixel_count() * 4
    }

    /// SHA-256 over the dimensions and pixel bytes.
    ///
    /// Two renders of the same document must agree on this, whichever worker
    /// produced them. A 4x1 and a 2x2 buffer with equal bytes still differ.
    pub fn content_hash(&self) -> ContentHash {
        let digest = Sha256::new()
            .chain_update(self.width.to_le_bytes())
            .chain_update(self.height.to_le_bytes())
            .chain_update(&self.data)
            .finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        ContentHash(bytes)
    }
}

/// Digest identifying the exact pixels of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Leading four bytes in hex, for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A float RGBA working texture (straight alpha).
///
/// All pass kernels read and write textures; values are not clamped between
/// passes so linear-light intermediates keep their full range.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl Texture {
    /// Fully transparent texture.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0.0; 4])
    }

    pub fn filled(width: u32, height: u32, value: [f32; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; (width as usize) * (height as usize)],
        }
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Pixel at (x, y); coordinates are clamped to the edge.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> [f32; 4] {
        if self.pixels.is_empty() {
            return [0.0; 4];
        }
        let cx = x.clamp(0, self.width as i64 - 1) as u32;
        let cy = y.clamp(0, self.height as i64 - 1) as u32;
        self.pixels[self.index(cx, cy)]
    }

    pub fn get(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(self.index(x, y)).copied()
    }

    /// Sample at normalized coordinates (0..1) with bilinear filtering and
    /// clamp-to-edge addressing.
    pub fn sample_bilinear(&self, u: f32, v: f32) -> [f32; 4] {
        if self.pixels.is_empty() {
            return [0.0; 4];
        }
        let fx = u * self.width as f32 - 0.5;
        let fy = v * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let p00 = self.get_clamped(x0, y0);
        let p10 = self.get_clamped(x0 + 1, y0);
        let p01 = self.get_clamped(x0, y0 + 1);
        let p11 = self.get_clamped(x0 + 1, y0 + 1);

        let mut out = [0.0f32; 4];
        for c in 0..4 {
            let top = p00[c] + (p10[c] - p00[c]) * tx;
            let bottom = p01[c] + (p11[c] - p01[c]) * tx;
            out[c] = top + (bottom - top) * ty;
        }
        out
    }

    pub fn from_frame_buffer(fb: &FrameBuffer) -> Self {
        let pixels = fb
            .data
            .chunks_exact(4)
            .map(|px| {
                [
                    px[0] as f32 / 255.0,
                    px[1] as f32 / 255.0,
                    px[2] as f32 / 255.0,
                    px[3] as f32 / 255.0,
                ]
            })
            .collect();
        Self {
            width: fb.width,
            height: fb.height,
            pixels,
        }
    }

    /// Quantize to 8 bits per channel, clamping out-of-range values.
    pub fn to_frame_buffer(&self) -> FrameBuffer {
        let mut data = Vec::with_capacity(self.pixels.len() * 4);
        for px in &self.pixels {
            for c in px {
                data.push((c.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
        FrameBuffer {
            data,
            width: self.width,
            height: self.height,
        }
    }

    pub fn same_size(&self, other: &Texture) -> bool {
        self.width == other.width && self.height == other.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_buffer_new() {
        let fb = FrameBuffer::new(1920, 1080);
        assert_eq!(fb.width, 1920);
        assert_eq!(fb.height, 1080);
        assert_eq!(fb.byte_size(), 1920 * 1080 * 4);
        assert_eq!(fb.pixel_count(), 1920 * 1080);
        assert!(fb.is_consistent());
    }

    #[test]
    fn test_frame_buffer_solid() {
        let fb = FrameBuffer::solid(2, 2, &Color::RED);
        assert_eq!(fb.get_pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(fb.get_pixel(1, 1), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_content_hash_tracks_pixels_and_shape() {
        let red = FrameBuffer::solid(4, 1, &Color::RED);
        assert_eq!(red.content_hash(), FrameBuffer::solid(4, 1, &Color::RED).content_hash());
        assert_ne!(red.content_hash(), FrameBuffer::solid(4, 1, &Color::BLUE).content_hash());

        let square = FrameBuffer::solid(2, 2, &Color::RED);
        assert_eq!(square.data, red.data);
        assert_ne!(square.content_hash(), red.content_hash());
    }

    #[test]
    fn test_content_hash_hex() {
        let hash = FrameBuffer::new(2, 2).content_hash();
        let hex = hash.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with(&hash.short()));
        assert_eq!(hash.short().len(), 8);
    }

    #[test]
    fn test_frame_buffer_get_set_pixel() {
        let mut fb = FrameBuffer::new(10, 10);
        fb.set_pixel(5, 5, [128, 64, 32, 255]);
        assert_eq!(fb.get_pixel(5, 5), Some([128, 64, 32, 255]));
        fb.set_pixel(50, 5, [1, 1, 1, 1]);
        assert_eq!(fb.get_pixel(10, 0), None);
    }

    #[test]
    fn test_texture_quantize_round_trip() {
        let mut fb = FrameBuffer::new(3, 2);
        fb.set_pixel(2, 1, [10, 200, 255, 77]);
        let tex = Texture::from_frame_buffer(&fb);
        assert_eq!(tex.to_frame_buffer(), fb);
    }

    #[test]
    fn test_texture_quantize_clamps() {
        let tex = Texture::filled(1, 1, [1.7, -0.2, 0.5, 1.0]);
        assert_eq!(tex.to_frame_buffer().get_pixel(0, 0), Some([255, 0, 128, 255]));
    }

    #[test]
    fn test_sample_bilinear_center_and_edges() {
        let mut tex = Texture::new(2, 1);
        tex.pixels[0] = [0.0, 0.0, 0.0, 1.0];
        tex.pixels[1] = [1.0, 1.0, 1.0, 1.0];
        // Texel centers reproduce exact values.
        assert_eq!(tex.sample_bilinear(0.25, 0.5)[0], 0.0);
        assert_eq!(tex.sample_bilinear(0.75, 0.5)[0], 1.0);
        // Halfway between centers.
        assert!((tex.sample_bilinear(0.5, 0.5)[0] - 0.5).abs() < 1e-6);
        // Clamp to edge.
        assert_eq!(tex.sample_bilinear(1.5, 0.5)[0], 1.0);
    }
}
