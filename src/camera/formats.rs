// SPDX-License-Identifier: GPL-3.0-only
//! Preview pixel formats and conversion to RGBA
//!
//! Preview buffers arrive in the device's native layout. Conversion uses the
//! BT.601 coefficients; planes are assumed to be tightly packed
//! (stride == width).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Layout of the bytes a device delivers in a preview callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreviewFormat {
    /// Y plane followed by interleaved V/U at quarter resolution
    #[default]
    Nv21,
    /// Y plane, then V plane, then U plane, chroma at quarter resolution
    Yv12,
    /// Packed 8-bit RGBA, top row first
    Rgba,
}

impl PreviewFormat {
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PreviewFormat::Nv21 | PreviewFormat::Yv12 => 12,
            PreviewFormat::Rgba => 32,
        }
    }

    /// Bytes in one callback buffer for a `width` x `height` preview
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bits_per_pixel() as usize / 8
    }

    /// Convert one frame to top-down RGBA
    ///
    /// Returns `None` when `data` is shorter than [`PreviewFormat::buffer_size`].
    pub fn to_rgba(self, data: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
        if width == 0 || height == 0 || data.len() < self.buffer_size(width, height) {
            return None;
        }
        Some(match self {
            PreviewFormat::Nv21 => nv21_to_rgba(data, width, height),
            PreviewFormat::Yv12 => yv12_to_rgba(data, width, height),
            PreviewFormat::Rgba => data[..self.buffer_size(width, height)].to_vec(),
        })
    }

    /// Encode top-down RGBA into this layout
    pub fn encode_rgba(self, rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
        match self {
            PreviewFormat::Nv21 => rgba_to_nv21(rgba, width, height),
            PreviewFormat::Yv12 => rgba_to_yv12(rgba, width, height),
            PreviewFormat::Rgba => rgba.to_vec(),
        }
    }
}

impl fmt::Display for PreviewFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PreviewFormat::Nv21 => "NV21",
            PreviewFormat::Yv12 => "YV12",
            PreviewFormat::Rgba => "RGBA",
        };
        write!(f, "{name}")
    }
}

/// Convert one YUV sample to RGB (BT.601, full range)
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        (y + 1.402 * v).round().clamp(0.0, 255.0) as u8,
        (y - 0.344 * u - 0.714 * v).round().clamp(0.0, 255.0) as u8,
        (y + 1.772 * u).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Convert RGB to YUV (BT.601, full range)
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
    [
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Convert NV21 (Y plane + interleaved VU) to RGBA
pub fn nv21_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let chroma = &data[w * h..];
    let chroma_stride = w.div_ceil(2) * 2;
    let mut rgba = Vec::with_capacity(w * h * 4);

    for row in 0..h {
        for col in 0..w {
            let y = data[row * w + col];
            let offset = (row / 2) * chroma_stride + (col / 2) * 2;
            let v = chroma.get(offset).copied().unwrap_or(128);
            let u = chroma.get(offset + 1).copied().unwrap_or(128);
            let [r, g, b] = yuv_to_rgb(y, u, v);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }

    rgba
}

/// Convert YV12 (Y plane, V plane, U plane) to RGBA
pub fn yv12_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let v_plane = &data[w * h..];
    let u_plane = v_plane.get(cw * ch..).unwrap_or(&[]);
    let mut rgba = Vec::with_capacity(w * h * 4);

    for row in 0..h {
        for col in 0..w {
            let y = data[row * w + col];
            let offset = (row / 2) * cw + col / 2;
            let v = v_plane.get(offset).copied().unwrap_or(128);
            let u = u_plane.get(offset).copied().unwrap_or(128);
            let [r, g, b] = yuv_to_rgb(y, u, v);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }

    rgba
}

/// Average U and V over each 2x2 block, row-major at quarter resolution
fn subsampled_chroma(rgba: &[u8], width: u32, height: u32) -> Vec<(u8, u8)> {
    let w = width as usize;
    let h = height as usize;
    let mut chroma = Vec::with_capacity(w.div_ceil(2) * h.div_ceil(2));

    for block_row in 0..h.div_ceil(2) {
        for block_col in 0..w.div_ceil(2) {
            let (mut u_sum, mut v_sum, mut n) = (0u32, 0u32, 0u32);
            for row in (block_row * 2)..(block_row * 2 + 2).min(h) {
                for col in (block_col * 2)..(block_col * 2 + 2).min(w) {
                    let i = (row * w + col) * 4;
                    let [_, u, v] = rgb_to_yuv(rgba[i], rgba[i + 1], rgba[i + 2]);
                    u_sum += u as u32;
                    v_sum += v as u32;
                    n += 1;
                }
            }
            chroma.push(((u_sum / n) as u8, (v_sum / n) as u8));
        }
    }

    chroma
}

fn luma_plane(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    rgba.chunks_exact(4)
        .take(width as usize * height as usize)
        .map(|px| rgb_to_yuv(px[0], px[1], px[2])[0])
        .collect()
}

/// Encode top-down RGBA as YV12
pub fn rgba_to_yv12(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let chroma = subsampled_chroma(rgba, width, height);
    let mut out = luma_plane(rgba, width, height);
    out.extend(chroma.iter().map(|&(_, v)| v));
    out.extend(chroma.iter().map(|&(u, _)| u));
    out
}

/// Encode top-down RGBA as NV21, averaging chroma over each 2x2 block
pub fn rgba_to_nv21(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = luma_plane(rgba, width, height);
    for (u, v) in subsampled_chroma(rgba, width, height) {
        out.push(v);
        out.push(u);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes() {
        assert_eq!(PreviewFormat::Nv21.buffer_size(640, 480), 640 * 480 * 3 / 2);
        assert_eq!(PreviewFormat::Yv12.buffer_size(4, 4), 24);
        assert_eq!(PreviewFormat::Rgba.buffer_size(2, 3), 24);
    }

    #[test]
    fn grey_survives_nv21() {
        let rgba: Vec<u8> = [128, 128, 128, 255].repeat(16);
        let nv21 = rgba_to_nv21(&rgba, 4, 4);
        let back = PreviewFormat::Nv21.to_rgba(&nv21, 4, 4).unwrap();
        for px in back.chunks_exact(4) {
            assert!(px[..3].iter().all(|c| c.abs_diff(128) <= 1), "{px:?}");
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn red_is_recovered_from_nv21() {
        let rgba: Vec<u8> = [255, 0, 0, 255].repeat(4);
        let back = nv21_to_rgba(&rgba_to_nv21(&rgba, 2, 2), 2, 2);
        assert!(back[0] >= 250 && back[1] <= 5 && back[2] <= 5, "{back:?}");
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(PreviewFormat::Nv21.to_rgba(&[0; 5], 2, 2).is_none());
        assert!(PreviewFormat::Rgba.to_rgba(&[], 0, 0).is_none());
    }

    #[test]
    fn yv12_uses_planar_chroma() {
        // 2x2 luma, then one V and one U sample
        let data = [100, 100, 100, 100, 128, 128];
        let rgba = yv12_to_rgba(&data, 2, 2);
        assert_eq!(&rgba[..4], &[100, 100, 100, 255]);
    }
}
