// SPDX-License-Identifier: GPL-3.0-only

//! GPU resources and the render loop built on [`crate::gpu::GpuContext`]
//!
//! Every type here owns plain handles and must only be used, and disposed,
//! on the thread that owns the context. `dispose` is explicit: dropping a
//! resource without disposing it leaks the GPU object.

pub mod filter;
pub mod framebuffer;
pub mod mesh;
pub mod program;
pub mod render_loop;
pub mod renderer;
pub mod surface;
pub mod texture;

pub use filter::FilterStage;
pub use framebuffer::{DepthAttachment, FrameBuffer, FrameBufferDesc};
pub use mesh::{Color, DrawKind, Mesh};
pub use program::{Shader, ShaderProgram};
pub use render_loop::{RenderMode, RenderRequester, RenderThread, Renderer};
pub use renderer::{DrawableId, SceneHandle, SceneItem, SceneRenderer};
pub use surface::{FrameAvailableListener, SurfaceSink, VideoSurface};
pub use texture::{ExternalTexture, Texture};

use crate::errors::GpuResult;
use crate::gpu::GpuContext;

/// Something that can take part in a render pass through a program
pub trait Drawable {
    fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()>;
    fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()>;
}

/// A GPU object with tracked binding state
pub trait Bindable {
    fn bind(&mut self, gl: &dyn GpuContext);
    fn unbind(&mut self, gl: &dyn GpuContext);
    fn dispose(&mut self, gl: &dyn GpuContext);
}

impl Drawable for Mesh {
    fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        Mesh::draw(self, gl, program)
    }

    fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        Mesh::cleanup(self, gl, program)
    }
}

impl Drawable for Color {
    fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        self.apply(gl, program)
    }

    fn cleanup(&mut self, _gl: &dyn GpuContext, _program: &ShaderProgram) -> GpuResult<()> {
        Ok(())
    }
}

impl Drawable for Texture {
    fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        Texture::draw(self, gl, program)
    }

    fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        Texture::cleanup(self, gl, program)
    }
}

impl Drawable for ExternalTexture {
    fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        ExternalTexture::draw(self, gl, program)
    }

    fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        ExternalTexture::cleanup(self, gl, program)
    }
}

impl Bindable for ShaderProgram {
    fn bind(&mut self, gl: &dyn GpuContext) {
        ShaderProgram::bind(self, gl)
    }

    fn unbind(&mut self, gl: &dyn GpuContext) {
        ShaderProgram::unbind(self, gl)
    }

    fn dispose(&mut self, gl: &dyn GpuContext) {
        ShaderProgram::dispose(self, gl)
    }
}

impl Bindable for Texture {
    fn bind(&mut self, gl: &dyn GpuContext) {
        Texture::bind(self, gl)
    }

    fn unbind(&mut self, gl: &dyn GpuContext) {
        Texture::unbind(self, gl)
    }

    fn dispose(&mut self, gl: &dyn GpuContext) {
        Texture::dispose(self, gl)
    }
}

impl Bindable for FrameBuffer {
    fn bind(&mut self, gl: &dyn GpuContext) {
        FrameBuffer::bind(self, gl)
    }

    fn unbind(&mut self, gl: &dyn GpuContext) {
        FrameBuffer::unbind(self, gl)
    }

    fn dispose(&mut self, gl: &dyn GpuContext) {
        FrameBuffer::dispose(self, gl)
    }
}
