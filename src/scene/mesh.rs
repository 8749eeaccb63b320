// SPDX-License-Identifier: GPL-3.0-only

//! Geometry drawn as triangle fans

use super::program::ShaderProgram;
use super::texture::{ExternalTexture, Texture};
use crate::constants::{geometry, shader_names};
use crate::errors::GpuResult;
use crate::gpu::{GpuContext, TextureSlots};
use bytemuck::{Pod, Zeroable};

/// An RGBA color with components in `0.0..=1.0`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Color = Color::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Color = Color::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        bytemuck::cast(self)
    }

    /// Send the color to the program's `u_Color`
    pub fn apply(&self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        program.set_vec4(gl, shader_names::COLOR, self.to_array())
    }

    /// Use this color for subsequent clears
    pub fn clear_to(&self, gl: &dyn GpuContext) {
        gl.clear_color(self.to_array());
    }
}

/// How a mesh is textured before its geometry is drawn
#[derive(Debug)]
pub enum DrawKind {
    Plain,
    Textured(Texture),
    ExternalTextured(ExternalTexture),
}

/// Vertex geometry with an optional color and texture
#[derive(Debug)]
pub struct Mesh {
    vertices: Vec<f32>,
    vertex_count: usize,
    color: Option<Color>,
    kind: DrawKind,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::quad()
    }
}

impl Mesh {
    /// Untextured mesh from packed `x, y, z` positions
    pub fn new(vertices: &[f32]) -> Self {
        Self::with_kind(vertices, DrawKind::Plain)
    }

    /// The full-screen quad
    pub fn quad() -> Self {
        Self::new(&geometry::DEFAULT_COORDS)
    }

    pub fn with_kind(vertices: &[f32], kind: DrawKind) -> Self {
        Self {
            vertices: vertices.to_vec(),
            vertex_count: vertices.len() / geometry::COORDS_PER_VERTEX,
            color: None,
            kind,
        }
    }

    pub fn textured(vertices: &[f32], texture: Texture) -> Self {
        Self::with_kind(vertices, DrawKind::Textured(texture))
    }

    /// Full-screen quad fed by a new external texture
    pub fn external(gl: &dyn GpuContext, slots: &TextureSlots) -> GpuResult<Self> {
        let texture = ExternalTexture::new(gl, slots, &geometry::DEFAULT_TEX_COORDS)?;
        Ok(Self::with_kind(
            &geometry::DEFAULT_COORDS,
            DrawKind::ExternalTextured(texture),
        ))
    }

    /// Rebuild a mesh from the native-endian bytes of [`Mesh::vertex_bytes`]
    pub fn from_vertex_bytes(bytes: &[u8]) -> Self {
        let vertices: Vec<f32> = bytes
            .chunks_exact(std::mem::size_of::<f32>())
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();
        Self::new(&vertices)
    }

    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    /// The vertex buffer as uploaded, native byte order
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn color(&self) -> Option<Color> {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = Some(color);
    }

    pub fn kind(&self) -> &DrawKind {
        &self.kind
    }

    pub fn external_texture(&self) -> Option<&ExternalTexture> {
        match &self.kind {
            DrawKind::ExternalTextured(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<&Texture> {
        match &self.kind {
            DrawKind::Plain => None,
            DrawKind::Textured(texture) => Some(texture),
            DrawKind::ExternalTextured(texture) => Some(texture.texture()),
        }
    }

    /// Texture first, then geometry
    pub fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        self.draw_texture(gl, program)?;
        self.draw_geometry(gl, program)
    }

    fn draw_texture(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        match &mut self.kind {
            DrawKind::Plain => Ok(()),
            DrawKind::Textured(texture) => texture.draw(gl, program),
            DrawKind::ExternalTextured(texture) => texture.draw(gl, program),
        }
    }

    fn draw_geometry(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        if let Some(color) = &self.color {
            color.apply(gl, program)?;
        }
        program.draw_arrays(
            gl,
            shader_names::POSITION,
            geometry::COORDS_PER_VERTEX,
            &self.vertices,
            self.vertex_count,
        )
    }

    pub fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        match &mut self.kind {
            DrawKind::Plain => {}
            DrawKind::Textured(texture) => texture.cleanup(gl, program)?,
            DrawKind::ExternalTextured(texture) => texture.cleanup(gl, program)?,
        }
        program.disable_attribute(gl, shader_names::POSITION)
    }

    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        match &mut self.kind {
            DrawKind::Plain => {}
            DrawKind::Textured(texture) => texture.dispose(gl),
            DrawKind::ExternalTextured(texture) => texture.dispose(gl),
        }
        self.vertices.clear();
        self.vertex_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareGpu;
    use crate::shaders;

    #[test]
    fn vertex_bytes_round_trip() {
        let vertices = [0.25f32, -1.5, 3.0, f32::MIN_POSITIVE, 1e9, -0.0];
        let mesh = Mesh::new(&vertices);
        assert_eq!(mesh.vertex_count(), 2);
        let restored = Mesh::from_vertex_bytes(mesh.vertex_bytes());
        assert_eq!(restored.vertices(), &vertices);
    }

    #[test]
    fn colored_quad_draws_its_color() {
        let gl = SoftwareGpu::new(2, 2);
        let mut program = ShaderProgram::new(&gl, &[shaders::VERTEX, shaders::FRAGMENT_COLOR]).unwrap();
        let mut mesh = Mesh::quad();
        mesh.set_color(Color::GREEN);
        program.bind(&gl);
        mesh.draw(&gl, &program).unwrap();
        mesh.cleanup(&gl, &program).unwrap();
        program.unbind(&gl);
        assert!(
            gl.display_pixels()
                .chunks_exact(4)
                .all(|p| p == [0, 255, 0, 255])
        );
    }

    #[test]
    fn textured_mesh_draws_texture_then_geometry() {
        let gl = SoftwareGpu::new(2, 2);
        let slots = TextureSlots::new();
        let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 10, 20, 255]));
        let texture =
            Texture::from_image(&gl, &slots, &image, &geometry::DEFAULT_TEX_COORDS).unwrap();
        let mut program =
            ShaderProgram::new(&gl, &[shaders::VERTEX_TEXTURE, shaders::FRAGMENT_TEXTURE]).unwrap();
        let mut mesh = Mesh::textured(&geometry::DEFAULT_COORDS, texture);
        program.bind(&gl);
        mesh.draw(&gl, &program).unwrap();
        mesh.cleanup(&gl, &program).unwrap();
        assert!(!mesh.texture().unwrap().is_bound());
        assert!(
            gl.display_pixels()
                .chunks_exact(4)
                .all(|p| p == [200, 10, 20, 255])
        );
        mesh.dispose(&gl);
        program.dispose(&gl);
        assert_eq!(gl.live_objects(), 0);
    }
}
