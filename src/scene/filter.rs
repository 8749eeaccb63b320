// SPDX-License-Identifier: GPL-3.0-only

//! One pass of the post-processing chain

use super::Drawable;
use super::framebuffer::FrameBuffer;
use super::mesh::Mesh;
use super::program::ShaderProgram;
use super::texture::Texture;
use crate::errors::GpuResult;
use crate::gpu::{GpuContext, TextureSlots};
use crate::shaders::{self, FilterKind};
use tracing::debug;

/// Renders an input texture through a shader into its own framebuffer
///
/// Stages do not know about each other. Chaining is done by the caller,
/// feeding one stage's [`FilterStage::texture`] to the next.
#[derive(Debug)]
pub struct FilterStage {
    name: String,
    target: FrameBuffer,
    program: ShaderProgram,
    mesh: Mesh,
}

impl FilterStage {
    pub fn new(
        gl: &dyn GpuContext,
        slots: &TextureSlots,
        name: &str,
        width: u32,
        height: u32,
        vertex_source: &str,
        fragment_source: &str,
    ) -> GpuResult<Self> {
        let mut program = ShaderProgram::new(gl, &[fragment_source, vertex_source])?;
        let target = match FrameBuffer::new(gl, slots, width, height) {
            Ok(target) => target,
            Err(e) => {
                program.dispose(gl);
                return Err(e);
            }
        };
        debug!(name, width, height, "Created filter stage");
        Ok(Self {
            name: name.to_string(),
            target,
            program,
            mesh: Mesh::quad(),
        })
    }

    /// One of the built-in filters
    pub fn builtin(
        gl: &dyn GpuContext,
        slots: &TextureSlots,
        kind: FilterKind,
        width: u32,
        height: u32,
    ) -> GpuResult<Self> {
        Self::new(
            gl,
            slots,
            kind.display_name(),
            width,
            height,
            shaders::VERTEX_TEXTURE,
            kind.fragment_source(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output of the last [`FilterStage::process_texture`]
    pub fn texture(&self) -> &Texture {
        self.target.texture()
    }

    pub fn target(&self) -> &FrameBuffer {
        &self.target
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    /// Render `input` into this stage's target
    ///
    /// Leaves the program and framebuffer unbound and the viewport set to the
    /// target size, even when a step fails.
    pub fn process_texture(&mut self, gl: &dyn GpuContext, input: &Texture) -> GpuResult<()> {
        let mut input = Texture::view(input, input.tex_coords());
        self.program.bind(gl);
        let result = self.render_pass(gl, &mut input);
        self.program.unbind(gl);
        self.target.unbind(gl);
        result
    }

    fn render_pass(&mut self, gl: &dyn GpuContext, input: &mut Texture) -> GpuResult<()> {
        let (width, height) = self.target.size();
        self.program.set_texels(gl, width, height)?;
        self.target.bind(gl);
        self.target.clear(gl);
        input.draw(gl, &self.program)?;
        self.mesh.draw(gl, &self.program)?;
        self.mesh.cleanup(gl, &self.program)?;
        input.cleanup(gl, &self.program)
    }

    /// Draw an arbitrary drawable through this stage's program into whatever
    /// framebuffer is bound
    ///
    /// Texel uniforms are set for the stage size.
    pub fn draw_to(
        &mut self,
        gl: &dyn GpuContext,
        drawable: &mut dyn Drawable,
        unbind: bool,
    ) -> GpuResult<()> {
        let (width, height) = self.target.size();
        self.program.bind(gl);
        let result = self
            .program
            .set_texels(gl, width, height)
            .and_then(|_| drawable.draw(gl, &self.program))
            .and_then(|_| drawable.cleanup(gl, &self.program));
        if unbind {
            self.program.unbind(gl);
        }
        result
    }

    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        self.program.dispose(gl);
        self.target.dispose(gl);
        self.mesh.dispose(gl);
    }
}
