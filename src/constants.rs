// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// Shader naming conventions
pub mod shader_names {
    /// Built-in written by every vertex shader
    pub const VERTEX_OUTPUT: &str = "gl_Position";
    /// Built-in written by every fragment shader
    pub const FRAGMENT_OUTPUT: &str = "gl_FragColor";
    /// Vertex position attribute
    pub const POSITION: &str = "a_Position";
    /// Texture coordinate attribute
    pub const TEX_COORD: &str = "a_TexCoord";
    /// Solid color uniform
    pub const COLOR: &str = "u_Color";
    /// Reciprocal texel width uniform
    pub const TEXEL_WIDTH: &str = "u_TexelWidth";
    /// Reciprocal texel height uniform
    pub const TEXEL_HEIGHT: &str = "u_TexelHeight";
    /// Prefix selecting the uniform lookup path
    pub const UNIFORM_PREFIX: char = 'u';
}

/// Geometry constants
pub mod geometry {
    /// Components per position vertex
    pub const COORDS_PER_VERTEX: usize = 3;
    /// Components per texture coordinate
    pub const COORDS_PER_TEX_COORD: usize = 2;

    /// Full-screen quad in clip space, wound for a triangle fan
    pub const DEFAULT_COORDS: [f32; 12] = [
        -1.0, 1.0, 0.0, //
        1.0, 1.0, 0.0, //
        1.0, -1.0, 0.0, //
        -1.0, -1.0, 0.0,
    ];

    /// Texture coordinates matching [`DEFAULT_COORDS`] vertex for vertex
    pub const DEFAULT_TEX_COORDS: [f32; 8] = [
        0.0, 1.0, //
        1.0, 1.0, //
        1.0, 0.0, //
        0.0, 0.0,
    ];
}

/// Camera timing and buffering
pub mod camera {
    use super::Duration;

    /// Interval between periodic auto-focus passes
    pub const AUTO_FOCUS_INTERVAL: Duration = Duration::from_millis(5000);
    /// Callback buffers handed to the device when a preview callback is first set
    pub const CALLBACK_BUFFER_COUNT: usize = 4;
    /// How long `open` waits for the session thread before giving up on readiness reports
    pub const READY_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Capture persistence
pub mod capture {
    /// JPEG quality used for raw preview captures
    pub const JPEG_QUALITY: u8 = 90;
    /// Extension for lossy captures
    pub const LOSSY_EXTENSION: &str = "jpg";
    /// Extension for lossless captures
    pub const LOSSLESS_EXTENSION: &str = "png";
    /// Digits used for unique filename suffixes
    pub const UNIQUE_SUFFIX_WIDTH: usize = 4;
    /// Default folder under the capture root
    pub const DEFAULT_FOLDER: &str = "glcamera";
}

/// Application identifier used for config paths
pub const APP_ID: &str = "glcamera";
