// SPDX-License-Identifier: GPL-3.0-only

//! GPU context abstraction
//!
//! The pipeline talks to the GPU through [`GpuContext`], a thin trait over the
//! primitive GL ES 2.0 style operations it needs: object creation and
//! deletion, shader compilation and linking, uniform and attribute wiring,
//! binding, drawing, clearing and pixel readback.
//!
//! A context is only valid on the thread it was created on. All resource
//! types in [`crate::scene`] take the context as an explicit `&dyn GpuContext`
//! argument instead of holding it, which keeps them plain owned data that the
//! render thread can move around freely.
//!
//! [`gl::GlowGpu`] drives a real OpenGL ES 2.0 driver and is what the binary
//! renders with. [`software::SoftwareGpu`] is a CPU rasterizer with GL
//! semantics, used as the test double.

pub mod egl;
pub mod gl;
pub mod kernels;
pub mod software;

use crate::errors::GlError;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub use gl::GlowGpu;
pub use software::{GpuStats, SoftwareGpu, StatsSnapshot};

/// Object name returned by the context. `0` is the null object.
pub type Handle = u32;

/// Location of a uniform or attribute, `-1` when absent
pub type Location = i32;

/// Stage of a shader object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ShaderKind::Vertex => "vertex",
            ShaderKind::Fragment => "fragment",
        }
    }
}

/// Texture binding point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureTarget {
    /// Regular 2D texture with uploaded or rendered contents
    Texture2D,
    /// Texture whose contents are supplied by a video surface
    External,
}

/// Primitive assembly mode for [`GpuContext::draw_arrays`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    TriangleFan,
    Triangles,
}

/// Texture minification/magnification filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerFilter {
    Nearest,
    Linear,
}

/// Texture wrap mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    ClampToEdge,
    Repeat,
}

/// Result of the framebuffer completeness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    IncompleteDimensions,
    MissingAttachment,
    Unsupported,
}

impl FramebufferStatus {
    /// Describe a non-complete status, `None` when complete
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            FramebufferStatus::Complete => None,
            FramebufferStatus::IncompleteAttachment => {
                Some("an attachment is missing storage or has an invalid format")
            }
            FramebufferStatus::IncompleteDimensions => {
                Some("attachments do not share the same dimensions")
            }
            FramebufferStatus::MissingAttachment => Some("no image is attached"),
            FramebufferStatus::Unsupported => {
                Some("the combination of attachment formats is unsupported")
            }
        }
    }
}

/// Buffers affected by [`GpuContext::clear`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: ClearMask = ClearMask {
        color: true,
        depth: false,
    };
    pub const COLOR_DEPTH: ClearMask = ClearMask {
        color: true,
        depth: true,
    };
}

/// Primitive GPU operations used by the rendering pipeline
///
/// Methods mirror their GL ES 2.0 counterparts. Errors are not returned
/// per call; they are latched and reported by [`GpuContext::get_error`].
pub trait GpuContext {
    // Shaders
    fn create_shader(&self, kind: ShaderKind) -> Handle;
    fn shader_source(&self, shader: Handle, source: &str);
    fn compile_shader(&self, shader: Handle);
    fn shader_compile_status(&self, shader: Handle) -> bool;
    fn shader_info_log(&self, shader: Handle) -> String;
    fn delete_shader(&self, shader: Handle);

    // Programs
    fn create_program(&self) -> Handle;
    fn attach_shader(&self, program: Handle, shader: Handle);
    fn link_program(&self, program: Handle);
    fn program_link_status(&self, program: Handle) -> bool;
    fn program_info_log(&self, program: Handle) -> String;
    /// Make `program` current, `0` to clear
    fn use_program(&self, program: Handle);
    fn delete_program(&self, program: Handle);

    // Uniforms and attributes
    fn uniform_location(&self, program: Handle, name: &str) -> Location;
    fn attrib_location(&self, program: Handle, name: &str) -> Location;
    fn uniform_1f(&self, location: Location, value: f32);
    fn uniform_4f(&self, location: Location, value: [f32; 4]);
    /// Read back a uniform of `program`; returns the number of components written
    fn get_uniform(&self, program: Handle, location: Location, out: &mut [f32]) -> usize;
    /// Point attribute `index` at client-side float data, `components` per vertex
    fn vertex_attrib_pointer(&self, index: u32, components: usize, data: &[f32]);
    fn enable_vertex_attrib_array(&self, index: u32);
    fn disable_vertex_attrib_array(&self, index: u32);
    fn draw_arrays(&self, mode: Primitive, first: usize, count: usize);

    // Textures
    fn gen_texture(&self) -> Handle;
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: TextureTarget, texture: Handle);
    /// Allocate RGBA8 storage for the bound texture; rows start at the bottom
    fn tex_image_2d(&self, target: TextureTarget, width: u32, height: u32, pixels: Option<&[u8]>);
    fn tex_parameters(&self, target: TextureTarget, filter: SamplerFilter, wrap: WrapMode);
    fn delete_texture(&self, texture: Handle);

    // Framebuffers and renderbuffers
    fn gen_framebuffer(&self) -> Handle;
    /// Bind `framebuffer`, `0` for the display
    fn bind_framebuffer(&self, framebuffer: Handle);
    fn framebuffer_texture_2d(&self, texture: Handle);
    fn framebuffer_renderbuffer(&self, renderbuffer: Handle);
    fn check_framebuffer_status(&self) -> FramebufferStatus;
    fn delete_framebuffer(&self, framebuffer: Handle);
    fn gen_renderbuffer(&self) -> Handle;
    fn bind_renderbuffer(&self, renderbuffer: Handle);
    /// Allocate 16-bit depth storage for the bound renderbuffer
    fn renderbuffer_storage(&self, width: u32, height: u32);
    fn delete_renderbuffer(&self, renderbuffer: Handle);

    // Frame operations
    fn viewport(&self, x: i32, y: i32, width: u32, height: u32);
    fn clear_color(&self, rgba: [f32; 4]);
    fn clear(&self, mask: ClearMask);
    /// Read RGBA8 pixels from the bound framebuffer, bottom row first
    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32, out: &mut [u8]);

    // Queries
    /// Take the oldest latched error
    fn get_error(&self) -> Option<GlError>;
    fn shading_language_version(&self) -> String;
    fn max_texture_size(&self) -> u32;
}

/// Drain the context's error queue and report the first one for `op`
pub fn check_error(gl: &dyn GpuContext, op: &'static str) -> crate::errors::GpuResult<()> {
    let mut first = None;
    while let Some(error) = gl.get_error() {
        tracing::error!(op, error = %error, "GPU error");
        first.get_or_insert(error);
    }
    match first {
        Some(error) => Err(crate::errors::GpuError::Gl { op, error }),
        None => Ok(()),
    }
}

/// Allocator for texture slot indices and video surface ids
///
/// Each texture takes the next index at construction and each external
/// texture the next surface id. One allocator is owned per rendering context
/// so independent contexts (and tests) never share a counter.
#[derive(Debug, Default)]
pub struct TextureSlots {
    next: AtomicU32,
    surfaces: AtomicU64,
}

impl TextureSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next slot index
    pub fn next_slot(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of slots handed out so far
    pub fn allocated(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    /// Hand out the next video surface id, starting at 1
    pub fn next_surface_id(&self) -> u64 {
        self.surfaces.fetch_add(1, Ordering::Relaxed) + 1
    }
}
