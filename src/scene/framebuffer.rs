// SPDX-License-Identifier: GPL-3.0-only

//! Off-screen render targets

use super::texture::Texture;
use crate::errors::{GpuError, GpuResult};
use crate::gpu::{self, ClearMask, GpuContext, Handle, TextureSlots};
use tracing::{debug, error};

/// Size of the depth attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthAttachment {
    /// Same size as the color texture
    #[default]
    Matching,
    /// Explicit size, which must match the color texture to be complete
    Sized(u32, u32),
    /// No depth buffer
    None,
}

/// Construction parameters for a [`FrameBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferDesc {
    pub width: u32,
    pub height: u32,
    pub depth: DepthAttachment,
}

impl FrameBufferDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: DepthAttachment::Matching,
        }
    }

    pub fn with_depth(mut self, depth: DepthAttachment) -> Self {
        self.depth = depth;
        self
    }
}

/// A color texture plus depth renderbuffer usable as a render target
#[derive(Debug)]
pub struct FrameBuffer {
    handle: Handle,
    texture: Texture,
    depth: Handle,
    width: u32,
    height: u32,
    bound: bool,
    disposed: bool,
}

impl FrameBuffer {
    pub fn new(
        gl: &dyn GpuContext,
        slots: &TextureSlots,
        width: u32,
        height: u32,
    ) -> GpuResult<Self> {
        Self::with_desc(gl, slots, FrameBufferDesc::new(width, height))
    }

    /// Allocate, attach and validate; every handle is released on failure
    pub fn with_desc(
        gl: &dyn GpuContext,
        slots: &TextureSlots,
        desc: FrameBufferDesc,
    ) -> GpuResult<Self> {
        let handle = gl.gen_framebuffer();
        if handle == 0 {
            return Err(GpuError::HandleAllocation("framebuffer"));
        }
        let depth = match desc.depth {
            DepthAttachment::None => 0,
            _ => {
                let depth = gl.gen_renderbuffer();
                if depth == 0 {
                    gl.delete_framebuffer(handle);
                    return Err(GpuError::HandleAllocation("renderbuffer"));
                }
                depth
            }
        };

        gl.bind_framebuffer(handle);

        let mut texture = match Texture::empty(gl, slots, desc.width, desc.height) {
            Ok(texture) => texture,
            Err(e) => {
                gl.bind_framebuffer(0);
                gl.delete_renderbuffer(depth);
                gl.delete_framebuffer(handle);
                return Err(e);
            }
        };
        gl.framebuffer_texture_2d(texture.handle());

        if depth != 0 {
            let (dw, dh) = match desc.depth {
                DepthAttachment::Sized(w, h) => (w, h),
                _ => (desc.width, desc.height),
            };
            gl.bind_renderbuffer(depth);
            gl.renderbuffer_storage(dw, dh);
            gl.framebuffer_renderbuffer(depth);
            gl.bind_renderbuffer(0);
        }

        let status = gl.check_framebuffer_status();
        gl.bind_framebuffer(0);

        let failure = match status.failure_reason() {
            Some(reason) => Some(GpuError::FramebufferIncomplete(reason)),
            None => gpu::check_error(gl, "create framebuffer").err(),
        };
        if let Some(e) = failure {
            error!(?status, width = desc.width, height = desc.height, "Framebuffer rejected");
            gl.delete_framebuffer(handle);
            gl.delete_renderbuffer(depth);
            texture.dispose(gl);
            return Err(e);
        }

        debug!(handle, width = desc.width, height = desc.height, "Created framebuffer");
        Ok(Self {
            handle,
            texture,
            depth,
            width: desc.width,
            height: desc.height,
            bound: false,
            disposed: false,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The color target
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn texture_mut(&mut self) -> &mut Texture {
        &mut self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn bind(&mut self, gl: &dyn GpuContext) {
        if !self.bound {
            gl.bind_framebuffer(self.handle);
            self.bound = true;
        }
    }

    pub fn unbind(&mut self, gl: &dyn GpuContext) {
        if self.bound {
            gl.bind_framebuffer(0);
            self.bound = false;
        }
    }

    /// Clear to opaque black over this buffer's own viewport; no-op while unbound
    pub fn clear(&self, gl: &dyn GpuContext) {
        if self.bound {
            gl.viewport(0, 0, self.width, self.height);
            gl.clear_color([0.0, 0.0, 0.0, 1.0]);
            gl.clear(ClearMask::COLOR_DEPTH);
        }
    }

    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        if self.disposed {
            return;
        }
        self.unbind(gl);
        gl.delete_framebuffer(self.handle);
        gl.delete_renderbuffer(self.depth);
        self.texture.dispose(gl);
        self.disposed = true;
    }
}
