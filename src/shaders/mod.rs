// SPDX-License-Identifier: GPL-3.0-only
//! Built-in GLSL ES 1.00 shader sources
//!
//! Vertex shaders write `gl_Position`, fragment shaders write `gl_FragColor`;
//! that is how [`crate::scene::ShaderProgram`] tells them apart. Filter
//! shaders declare `u_TexelWidth`/`u_TexelHeight` and receive the reciprocal
//! size of their render target.

/// Pass-through position, no texture coordinates
pub const VERTEX: &str = include_str!("glsl/vertex.glsl");

/// Solid `u_Color` fill
pub const FRAGMENT_COLOR: &str = include_str!("glsl/fragment.glsl");

/// Pass-through position with `a_TexCoord` forwarded as a varying
pub const VERTEX_TEXTURE: &str = include_str!("glsl/vertex_texture.glsl");

/// Samples the camera's external texture
pub const FRAGMENT_EXTERNAL_TEXTURE: &str = include_str!("glsl/fragment_texture.glsl");

/// Samples a regular 2D texture
pub const FRAGMENT_TEXTURE: &str = include_str!("glsl/fragment_texture_2d.glsl");

/// 3x3 box blur
pub const FRAGMENT_BLUR: &str = include_str!("glsl/fragment_blur.glsl");

/// Sobel edge magnitude
pub const FRAGMENT_SOBEL: &str = include_str!("glsl/fragment_sobel.glsl");

/// Sobel edge magnitude and direction
pub const FRAGMENT_EDGE_DIRECTION: &str = include_str!("glsl/fragment_direct.glsl");

/// The post-processing chain in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Blur,
    Sobel,
    EdgeDirection,
}

impl FilterKind {
    /// Chain order used by the camera view
    pub const CHAIN: [FilterKind; 3] = [
        FilterKind::Blur,
        FilterKind::Sobel,
        FilterKind::EdgeDirection,
    ];

    pub fn fragment_source(&self) -> &'static str {
        match self {
            FilterKind::Blur => FRAGMENT_BLUR,
            FilterKind::Sobel => FRAGMENT_SOBEL,
            FilterKind::EdgeDirection => FRAGMENT_EDGE_DIRECTION,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FilterKind::Blur => "blur",
            FilterKind::Sobel => "sobel",
            FilterKind::EdgeDirection => "edge-direction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::shader_names;

    #[test]
    fn vertex_sources_write_position() {
        for source in [VERTEX, VERTEX_TEXTURE] {
            assert!(source.contains(shader_names::VERTEX_OUTPUT));
            assert!(!source.contains(shader_names::FRAGMENT_OUTPUT));
        }
    }

    #[test]
    fn filter_sources_declare_texels() {
        for kind in FilterKind::CHAIN {
            let source = kind.fragment_source();
            assert!(source.contains(shader_names::TEXEL_WIDTH), "{}", kind.display_name());
            assert!(source.contains(shader_names::TEXEL_HEIGHT), "{}", kind.display_name());
        }
        assert!(!FRAGMENT_TEXTURE.contains(shader_names::TEXEL_WIDTH));
    }
}
