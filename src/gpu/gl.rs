// SPDX-License-Identifier: GPL-3.0-only

//! OpenGL ES 2.0 implementation of [`GpuContext`] on top of `glow`
//!
//! Handles are the raw GL object names. Client-side vertex arrays are not
//! available through `glow`, so every attribute index streams its data into
//! a buffer object owned by the context.
//!
//! Camera frames reach the GPU as CPU memory uploaded with `tex_image_2d`,
//! which the external texture target does not accept. External textures are
//! therefore plain 2D textures here, and fragment sources declaring
//! `samplerExternalOES` are rewritten to `sampler2D` before compilation.

use super::egl::HeadlessEgl;
use super::{
    ClearMask, FramebufferStatus, GpuContext, Handle, Location, Primitive, SamplerFilter,
    ShaderKind, TextureTarget, WrapMode,
};
use crate::errors::{GlError, GpuResult};
use glow::HasContext;
use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroU32;
use tracing::{debug, info, warn};

const EXTERNAL_SAMPLER: &str = "samplerExternalOES";
const EXTERNAL_EXTENSION: &str = "GL_OES_EGL_image_external";
/// `GL_FRAMEBUFFER_INCOMPLETE_DIMENSIONS`, ES 2.0 only
const FRAMEBUFFER_INCOMPLETE_DIMENSIONS: u32 = 0x8CD9;

/// Rewrite an external-texture fragment source to sample a 2D texture
pub fn external_to_2d(source: &str) -> String {
    if !source.contains(EXTERNAL_SAMPLER) {
        return source.to_string();
    }
    source
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            !(line.starts_with("#extension") && line.contains(EXTERNAL_EXTENSION))
        })
        .map(|line| line.replace(EXTERNAL_SAMPLER, "sampler2D"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn texture_target(_target: TextureTarget) -> u32 {
    glow::TEXTURE_2D
}

fn shader(handle: Handle) -> Option<glow::NativeShader> {
    NonZeroU32::new(handle).map(glow::NativeShader)
}

fn program(handle: Handle) -> Option<glow::NativeProgram> {
    NonZeroU32::new(handle).map(glow::NativeProgram)
}

fn texture(handle: Handle) -> Option<glow::NativeTexture> {
    NonZeroU32::new(handle).map(glow::NativeTexture)
}

fn framebuffer(handle: Handle) -> Option<glow::NativeFramebuffer> {
    NonZeroU32::new(handle).map(glow::NativeFramebuffer)
}

fn renderbuffer(handle: Handle) -> Option<glow::NativeRenderbuffer> {
    NonZeroU32::new(handle).map(glow::NativeRenderbuffer)
}

fn uniform(location: Location) -> Option<glow::NativeUniformLocation> {
    (location >= 0).then_some(glow::NativeUniformLocation(location as u32))
}

fn components_of(uniform_type: u32) -> usize {
    match uniform_type {
        glow::FLOAT_VEC2 | glow::INT_VEC2 => 2,
        glow::FLOAT_VEC3 | glow::INT_VEC3 => 3,
        glow::FLOAT_VEC4 | glow::INT_VEC4 => 4,
        _ => 1,
    }
}

/// GPU context backed by a real OpenGL ES 2.0 driver
pub struct GlowGpu {
    gl: glow::Context,
    attrib_buffers: RefCell<HashMap<u32, glow::NativeBuffer>>,
    vertex_array: Option<glow::NativeVertexArray>,
    /// Dropped after `gl`
    headless: Option<HeadlessEgl>,
}

impl std::fmt::Debug for GlowGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowGpu")
            .field("headless", &self.headless)
            .field("attrib_buffers", &self.attrib_buffers.borrow().len())
            .finish()
    }
}

impl GlowGpu {
    /// Create an offscreen ES 2.0 context whose display is a `width` x
    /// `height` pbuffer
    ///
    /// Must be called on the thread that will render.
    pub fn headless(width: u32, height: u32) -> GpuResult<Self> {
        let egl = HeadlessEgl::new(width, height)?;
        let gl = unsafe { glow::Context::from_loader_function(|name| egl.proc_address(name)) };
        Ok(Self::with_context(gl, Some(egl)))
    }

    /// Wrap a context that is already current on this thread
    ///
    /// # Safety
    ///
    /// `gl` must stay current on the calling thread for the lifetime of the
    /// returned value.
    pub unsafe fn from_glow(gl: glow::Context) -> Self {
        Self::with_context(gl, None)
    }

    fn with_context(gl: glow::Context, headless: Option<HeadlessEgl>) -> Self {
        let version = gl.version();
        // Desktop core profiles refuse attribute pointers without a vertex array
        let vertex_array = if version.is_embedded {
            None
        } else {
            match unsafe { gl.create_vertex_array() } {
                Ok(vao) => {
                    unsafe { gl.bind_vertex_array(Some(vao)) };
                    Some(vao)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to create vertex array");
                    None
                }
            }
        };
        unsafe { gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1) };
        unsafe { gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1) };
        info!(
            major = version.major,
            minor = version.minor,
            embedded = version.is_embedded,
            vendor = %version.vendor_info,
            "GL context wrapped"
        );
        Self {
            gl,
            attrib_buffers: RefCell::new(HashMap::new()),
            vertex_array,
            headless,
        }
    }

    pub fn glow(&self) -> &glow::Context {
        &self.gl
    }

    fn attrib_buffer(&self, index: u32) -> Option<glow::NativeBuffer> {
        let mut buffers = self.attrib_buffers.borrow_mut();
        if let Some(buffer) = buffers.get(&index) {
            return Some(*buffer);
        }
        match unsafe { self.gl.create_buffer() } {
            Ok(buffer) => {
                buffers.insert(index, buffer);
                Some(buffer)
            }
            Err(e) => {
                warn!(index, error = %e, "Failed to create attribute buffer");
                None
            }
        }
    }
}

impl Drop for GlowGpu {
    fn drop(&mut self) {
        unsafe {
            for (_, buffer) in self.attrib_buffers.get_mut().drain() {
                self.gl.delete_buffer(buffer);
            }
            if let Some(vao) = self.vertex_array.take() {
                self.gl.delete_vertex_array(vao);
            }
        }
        debug!("GL context released");
    }
}

impl GpuContext for GlowGpu {
    fn create_shader(&self, kind: ShaderKind) -> Handle {
        let kind = match kind {
            ShaderKind::Vertex => glow::VERTEX_SHADER,
            ShaderKind::Fragment => glow::FRAGMENT_SHADER,
        };
        unsafe { self.gl.create_shader(kind) }.map_or(0, |s| s.0.get())
    }

    fn shader_source(&self, handle: Handle, source: &str) {
        if let Some(s) = shader(handle) {
            unsafe { self.gl.shader_source(s, &external_to_2d(source)) };
        }
    }

    fn compile_shader(&self, handle: Handle) {
        if let Some(s) = shader(handle) {
            unsafe { self.gl.compile_shader(s) };
        }
    }

    fn shader_compile_status(&self, handle: Handle) -> bool {
        shader(handle).is_some_and(|s| unsafe { self.gl.get_shader_compile_status(s) })
    }

    fn shader_info_log(&self, handle: Handle) -> String {
        shader(handle)
            .map(|s| unsafe { self.gl.get_shader_info_log(s) })
            .unwrap_or_default()
    }

    fn delete_shader(&self, handle: Handle) {
        if let Some(s) = shader(handle) {
            unsafe { self.gl.delete_shader(s) };
        }
    }

    fn create_program(&self) -> Handle {
        unsafe { self.gl.create_program() }.map_or(0, |p| p.0.get())
    }

    fn attach_shader(&self, program_handle: Handle, shader_handle: Handle) {
        if let (Some(p), Some(s)) = (program(program_handle), shader(shader_handle)) {
            unsafe { self.gl.attach_shader(p, s) };
        }
    }

    fn link_program(&self, handle: Handle) {
        if let Some(p) = program(handle) {
            unsafe { self.gl.link_program(p) };
        }
    }

    fn program_link_status(&self, handle: Handle) -> bool {
        program(handle).is_some_and(|p| unsafe { self.gl.get_program_link_status(p) })
    }

    fn program_info_log(&self, handle: Handle) -> String {
        program(handle)
            .map(|p| unsafe { self.gl.get_program_info_log(p) })
            .unwrap_or_default()
    }

    fn use_program(&self, handle: Handle) {
        unsafe { self.gl.use_program(program(handle)) };
    }

    fn delete_program(&self, handle: Handle) {
        if let Some(p) = program(handle) {
            unsafe { self.gl.delete_program(p) };
        }
    }

    fn uniform_location(&self, handle: Handle, name: &str) -> Location {
        program(handle)
            .and_then(|p| unsafe { self.gl.get_uniform_location(p, name) })
            .map_or(-1, |location| location.0 as Location)
    }

    fn attrib_location(&self, handle: Handle, name: &str) -> Location {
        program(handle)
            .and_then(|p| unsafe { self.gl.get_attrib_location(p, name) })
            .map_or(-1, |location| location as Location)
    }

    fn uniform_1f(&self, location: Location, value: f32) {
        if let Some(location) = uniform(location) {
            unsafe { self.gl.uniform_1_f32(Some(&location), value) };
        }
    }

    fn uniform_4f(&self, location: Location, [x, y, z, w]: [f32; 4]) {
        if let Some(location) = uniform(location) {
            unsafe { self.gl.uniform_4_f32(Some(&location), x, y, z, w) };
        }
    }

    fn get_uniform(&self, handle: Handle, location: Location, out: &mut [f32]) -> usize {
        let (Some(p), Some(target)) = (program(handle), uniform(location)) else {
            return 0;
        };
        let count = unsafe { self.gl.get_active_uniforms(p) };
        let components = (0..count)
            .filter_map(|index| unsafe { self.gl.get_active_uniform(p, index) })
            .find(|active| {
                unsafe { self.gl.get_uniform_location(p, &active.name) }
                    .is_some_and(|found| found.0 == target.0)
            })
            .map(|active| components_of(active.utype));
        let Some(components) = components else {
            return 0;
        };
        let mut value = [0.0f32; 4];
        unsafe { self.gl.get_uniform_f32(p, &target, &mut value[..components]) };
        let n = components.min(out.len());
        out[..n].copy_from_slice(&value[..n]);
        n
    }

    fn vertex_attrib_pointer(&self, index: u32, components: usize, data: &[f32]) {
        let Some(buffer) = self.attrib_buffer(index) else {
            return;
        };
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(data),
                glow::STREAM_DRAW,
            );
            self.gl
                .vertex_attrib_pointer_f32(index, components as i32, glow::FLOAT, false, 0, 0);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) };
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) };
    }

    fn draw_arrays(&self, mode: Primitive, first: usize, count: usize) {
        let mode = match mode {
            Primitive::TriangleFan => glow::TRIANGLE_FAN,
            Primitive::Triangles => glow::TRIANGLES,
        };
        unsafe { self.gl.draw_arrays(mode, first as i32, count as i32) };
    }

    fn gen_texture(&self) -> Handle {
        unsafe { self.gl.create_texture() }.map_or(0, |t| t.0.get())
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
    }

    fn bind_texture(&self, target: TextureTarget, handle: Handle) {
        unsafe { self.gl.bind_texture(texture_target(target), texture(handle)) };
    }

    fn tex_image_2d(&self, target: TextureTarget, width: u32, height: u32, pixels: Option<&[u8]>) {
        unsafe {
            self.gl.tex_image_2d(
                texture_target(target),
                0,
                glow::RGBA as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                pixels,
            )
        };
    }

    fn tex_parameters(&self, target: TextureTarget, filter: SamplerFilter, wrap: WrapMode) {
        let target = texture_target(target);
        let filter = match filter {
            SamplerFilter::Nearest => glow::NEAREST,
            SamplerFilter::Linear => glow::LINEAR,
        } as i32;
        let wrap = match wrap {
            WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
            WrapMode::Repeat => glow::REPEAT,
        } as i32;
        unsafe {
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, wrap);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, wrap);
        }
    }

    fn delete_texture(&self, handle: Handle) {
        if let Some(t) = texture(handle) {
            unsafe { self.gl.delete_texture(t) };
        }
    }

    fn gen_framebuffer(&self) -> Handle {
        unsafe { self.gl.create_framebuffer() }.map_or(0, |f| f.0.get())
    }

    fn bind_framebuffer(&self, handle: Handle) {
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer(handle)) };
    }

    fn framebuffer_texture_2d(&self, handle: Handle) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                texture(handle),
                0,
            )
        };
    }

    fn framebuffer_renderbuffer(&self, handle: Handle) {
        unsafe {
            self.gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                renderbuffer(handle),
            )
        };
    }

    fn check_framebuffer_status(&self) -> FramebufferStatus {
        match unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) } {
            glow::FRAMEBUFFER_COMPLETE => FramebufferStatus::Complete,
            glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => FramebufferStatus::IncompleteAttachment,
            FRAMEBUFFER_INCOMPLETE_DIMENSIONS => FramebufferStatus::IncompleteDimensions,
            glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => FramebufferStatus::MissingAttachment,
            _ => FramebufferStatus::Unsupported,
        }
    }

    fn delete_framebuffer(&self, handle: Handle) {
        if let Some(f) = framebuffer(handle) {
            unsafe { self.gl.delete_framebuffer(f) };
        }
    }

    fn gen_renderbuffer(&self) -> Handle {
        unsafe { self.gl.create_renderbuffer() }.map_or(0, |r| r.0.get())
    }

    fn bind_renderbuffer(&self, handle: Handle) {
        unsafe { self.gl.bind_renderbuffer(glow::RENDERBUFFER, renderbuffer(handle)) };
    }

    fn renderbuffer_storage(&self, width: u32, height: u32) {
        unsafe {
            self.gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT16,
                width as i32,
                height as i32,
            )
        };
    }

    fn delete_renderbuffer(&self, handle: Handle) {
        if let Some(r) = renderbuffer(handle) {
            unsafe { self.gl.delete_renderbuffer(r) };
        }
    }

    fn viewport(&self, x: i32, y: i32, width: u32, height: u32) {
        unsafe { self.gl.viewport(x, y, width as i32, height as i32) };
    }

    fn clear_color(&self, [r, g, b, a]: [f32; 4]) {
        unsafe { self.gl.clear_color(r, g, b, a) };
    }

    fn clear(&self, mask: ClearMask) {
        let mut bits = 0;
        if mask.color {
            bits |= glow::COLOR_BUFFER_BIT;
        }
        if mask.depth {
            bits |= glow::DEPTH_BUFFER_BIT;
        }
        unsafe { self.gl.clear(bits) };
    }

    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32, out: &mut [u8]) {
        unsafe {
            self.gl.read_pixels(
                x,
                y,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(out),
            )
        };
    }

    fn get_error(&self) -> Option<GlError> {
        match unsafe { self.gl.get_error() } {
            glow::NO_ERROR => None,
            glow::INVALID_ENUM => Some(GlError::InvalidEnum),
            glow::INVALID_VALUE => Some(GlError::InvalidValue),
            glow::INVALID_OPERATION => Some(GlError::InvalidOperation),
            glow::INVALID_FRAMEBUFFER_OPERATION => Some(GlError::InvalidFramebufferOperation),
            glow::OUT_OF_MEMORY => Some(GlError::OutOfMemory),
            other => {
                warn!(code = other, "Unknown GL error code");
                Some(GlError::InvalidOperation)
            }
        }
    }

    fn shading_language_version(&self) -> String {
        unsafe { self.gl.get_parameter_string(glow::SHADING_LANGUAGE_VERSION) }
    }

    fn max_texture_size(&self) -> u32 {
        unsafe { self.gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE) }.max(0) as u32
    }
}
