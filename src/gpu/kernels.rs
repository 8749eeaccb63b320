// SPDX-License-Identifier: GPL-3.0-only

//! CPU fragment kernels for the software context
//!
//! The software context does not interpret GLSL. Each linked program is
//! matched to a kernel by its fragment source; the built-in shaders in
//! [`crate::shaders`] have kernels that compute the same result per fragment.
//! Other sources need a kernel registered with
//! [`super::SoftwareGpu::with_kernel`] or they fail to link.

use crate::constants::shader_names;
use crate::shaders;
use std::f32::consts::PI;
use std::sync::Arc;

/// Per-fragment shading function
pub type FragmentKernel = Arc<dyn Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync>;

/// Current value of a uniform in a linked program
#[derive(Debug, Clone, PartialEq)]
pub struct UniformValue {
    pub name: String,
    pub components: usize,
    pub value: [f32; 4],
}

/// Read-only view of a bound texture's storage
#[derive(Debug, Clone, Copy)]
pub struct Sampler<'a> {
    pub width: u32,
    pub height: u32,
    /// RGBA8, bottom row first
    pub pixels: &'a [u8],
}

impl Sampler<'_> {
    /// Nearest-neighbour sample with clamp-to-edge
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let x = ((u * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1) as usize;
        let y = ((v * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1) as usize;
        let i = (y * self.width as usize + x) * 4;
        match self.pixels.get(i..i + 4) {
            Some(p) => [
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
                p[3] as f32 / 255.0,
            ],
            None => [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Inputs to a fragment kernel
pub struct Fragment<'a> {
    /// Interpolated `a_TexCoord`, zero when the program has none
    pub tex_coord: [f32; 2],
    /// Texture bound to unit 0 for the program's sampler type
    pub sampler: Option<Sampler<'a>>,
    pub uniforms: &'a [UniformValue],
}

impl Fragment<'_> {
    pub fn uniform(&self, name: &str) -> Option<[f32; 4]> {
        self.uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| u.value)
    }

    pub fn float(&self, name: &str) -> f32 {
        self.uniform(name).map(|v| v[0]).unwrap_or(0.0)
    }

    /// Sample at an offset given in texels
    pub fn texel(&self, dx: f32, dy: f32) -> [f32; 4] {
        let tw = self.float(shader_names::TEXEL_WIDTH);
        let th = self.float(shader_names::TEXEL_HEIGHT);
        match &self.sampler {
            Some(s) => s.sample(self.tex_coord[0] + dx * tw, self.tex_coord[1] + dy * th),
            None => [0.0, 0.0, 0.0, 1.0],
        }
    }
}

fn luma(c: [f32; 4]) -> f32 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

fn sobel(f: &Fragment<'_>) -> (f32, f32) {
    let l = |dx: f32, dy: f32| luma(f.texel(dx, dy));
    let (tl, t, tr) = (l(-1.0, 1.0), l(0.0, 1.0), l(1.0, 1.0));
    let (ml, mr) = (l(-1.0, 0.0), l(1.0, 0.0));
    let (bl, b, br) = (l(-1.0, -1.0), l(0.0, -1.0), l(1.0, -1.0));
    let gx = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
    let gy = (tl + 2.0 * t + tr) - (bl + 2.0 * b + br);
    (gx, gy)
}

pub fn color(f: &Fragment<'_>) -> [f32; 4] {
    f.uniform(shader_names::COLOR)
        .unwrap_or([0.0, 0.0, 0.0, 1.0])
}

pub fn texture(f: &Fragment<'_>) -> [f32; 4] {
    f.texel(0.0, 0.0)
}

pub fn blur(f: &Fragment<'_>) -> [f32; 4] {
    let mut sum = [0.0f32; 3];
    for dy in -1..=1 {
        for dx in -1..=1 {
            let c = f.texel(dx as f32, dy as f32);
            sum[0] += c[0];
            sum[1] += c[1];
            sum[2] += c[2];
        }
    }
    [sum[0] / 9.0, sum[1] / 9.0, sum[2] / 9.0, 1.0]
}

pub fn edge_magnitude(f: &Fragment<'_>) -> [f32; 4] {
    let (gx, gy) = sobel(f);
    let mag = (gx * gx + gy * gy).sqrt().clamp(0.0, 1.0);
    [mag, mag, mag, 1.0]
}

pub fn edge_direction(f: &Fragment<'_>) -> [f32; 4] {
    let (gx, gy) = sobel(f);
    let mag = (gx * gx + gy * gy).sqrt().clamp(0.0, 1.0);
    let direction = (gy.atan2(gx) / PI + 1.0) / 2.0;
    [mag, direction, 0.0, 1.0]
}

/// Kernels for every built-in fragment shader
pub fn builtin() -> Vec<(&'static str, FragmentKernel)> {
    vec![
        (shaders::FRAGMENT_COLOR, Arc::new(color) as FragmentKernel),
        (shaders::FRAGMENT_TEXTURE, Arc::new(texture) as FragmentKernel),
        (shaders::FRAGMENT_EXTERNAL_TEXTURE, Arc::new(texture) as FragmentKernel),
        (shaders::FRAGMENT_BLUR, Arc::new(blur) as FragmentKernel),
        (shaders::FRAGMENT_SOBEL, Arc::new(edge_magnitude) as FragmentKernel),
        (shaders::FRAGMENT_EDGE_DIRECTION, Arc::new(edge_direction) as FragmentKernel),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniforms(tw: f32, th: f32) -> Vec<UniformValue> {
        vec![
            UniformValue {
                name: shader_names::TEXEL_WIDTH.into(),
                components: 1,
                value: [tw, 0.0, 0.0, 0.0],
            },
            UniformValue {
                name: shader_names::TEXEL_HEIGHT.into(),
                components: 1,
                value: [th, 0.0, 0.0, 0.0],
            },
        ]
    }

    #[test]
    fn sampler_clamps_to_edge() {
        let pixels = [255, 0, 0, 255, 0, 255, 0, 255];
        let s = Sampler {
            width: 2,
            height: 1,
            pixels: &pixels,
        };
        assert_eq!(s.sample(-3.0, 0.5), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(s.sample(7.0, 0.5), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn flat_image_has_no_edges() {
        let pixels = vec![128u8; 4 * 4 * 4];
        let u = uniforms(0.25, 0.25);
        let f = Fragment {
            tex_coord: [0.5, 0.5],
            sampler: Some(Sampler {
                width: 4,
                height: 4,
                pixels: &pixels,
            }),
            uniforms: &u,
        };
        assert_eq!(edge_magnitude(&f)[0], 0.0);
        let b = blur(&f);
        assert!((b[0] - 128.0 / 255.0).abs() < 1e-5);
    }

    #[test]
    fn vertical_edge_points_along_x() {
        // left half black, right half white
        let mut pixels = vec![0u8; 4 * 4 * 4];
        for y in 0..4 {
            for x in 2..4 {
                let i = (y * 4 + x) * 4;
                pixels[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let u = uniforms(0.25, 0.25);
        let f = Fragment {
            tex_coord: [0.375, 0.375],
            sampler: Some(Sampler {
                width: 4,
                height: 4,
                pixels: &pixels,
            }),
            uniforms: &u,
        };
        let out = edge_direction(&f);
        assert_eq!(out[0], 1.0);
        // atan2(0, +gx) = 0 maps to the middle of the range
        assert!((out[1] - 0.5).abs() < 1e-5);
    }
}
