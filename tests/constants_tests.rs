// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use glcamera::constants::{camera, capture, geometry, shader_names};

#[test]
fn test_quad_geometry_matches_tex_coords() {
    // Four vertices, each with a matching texture coordinate
    assert_eq!(geometry::DEFAULT_COORDS.len() / geometry::COORDS_PER_VERTEX, 4);
    assert_eq!(
        geometry::DEFAULT_TEX_COORDS.len() / geometry::COORDS_PER_TEX_COORD,
        4
    );
}

#[test]
fn test_shader_names_follow_prefix_convention() {
    for uniform in [
        shader_names::COLOR,
        shader_names::TEXEL_WIDTH,
        shader_names::TEXEL_HEIGHT,
    ] {
        assert!(uniform.starts_with(shader_names::UNIFORM_PREFIX));
    }
    assert!(!shader_names::POSITION.starts_with(shader_names::UNIFORM_PREFIX));
}

#[test]
fn test_camera_timing() {
    assert_eq!(camera::AUTO_FOCUS_INTERVAL.as_millis(), 5000);
    assert_eq!(camera::CALLBACK_BUFFER_COUNT, 4);
}

#[test]
fn test_capture_settings() {
    assert_eq!(capture::JPEG_QUALITY, 90);
    assert_ne!(capture::LOSSY_EXTENSION, capture::LOSSLESS_EXTENSION);
    assert_eq!(capture::UNIQUE_SUFFIX_WIDTH, 4);
}
