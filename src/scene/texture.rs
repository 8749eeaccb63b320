// SPDX-License-Identifier: GPL-3.0-only

//! GPU textures

use super::program::ShaderProgram;
use super::surface::{FrameAvailableListener, SurfaceSink, VideoSurface};
use crate::constants::{geometry, shader_names};
use crate::errors::{GpuError, GpuResult};
use crate::gpu::{self, GpuContext, Handle, SamplerFilter, TextureSlots, TextureTarget, WrapMode};
use image::RgbaImage;
use tracing::debug;

/// A texture object plus the coordinates used to map it onto geometry
#[derive(Debug)]
pub struct Texture {
    handle: Handle,
    target: TextureTarget,
    tex_coords: Vec<f32>,
    slot: u32,
    width: u32,
    height: u32,
    owned: bool,
    bound: bool,
    disposed: bool,
}

fn create(gl: &dyn GpuContext, target: TextureTarget) -> GpuResult<Handle> {
    let handle = gl.gen_texture();
    if handle == 0 {
        return Err(GpuError::HandleAllocation("texture"));
    }
    gl.bind_texture(target, handle);
    gl.tex_parameters(target, SamplerFilter::Nearest, WrapMode::ClampToEdge);
    Ok(handle)
}

impl Texture {
    /// Allocate empty RGBA8 storage, typically a framebuffer color target
    pub fn empty(
        gl: &dyn GpuContext,
        slots: &TextureSlots,
        width: u32,
        height: u32,
    ) -> GpuResult<Self> {
        let handle = create(gl, TextureTarget::Texture2D)?;
        gl.tex_image_2d(TextureTarget::Texture2D, width, height, None);
        gl.bind_texture(TextureTarget::Texture2D, 0);
        if let Err(e) = gpu::check_error(gl, "allocate texture") {
            gl.delete_texture(handle);
            return Err(e);
        }
        Ok(Self::from_parts(
            handle,
            TextureTarget::Texture2D,
            &geometry::DEFAULT_TEX_COORDS,
            slots.next_slot(),
            (width, height),
            true,
        ))
    }

    /// Adopt an existing texture object; it is deleted on dispose
    pub fn wrap(
        slots: &TextureSlots,
        handle: Handle,
        target: TextureTarget,
        tex_coords: &[f32],
    ) -> Self {
        Self::from_parts(handle, target, tex_coords, slots.next_slot(), (0, 0), true)
    }

    /// Upload a square power-of-two image
    pub fn from_image(
        gl: &dyn GpuContext,
        slots: &TextureSlots,
        image: &RgbaImage,
        tex_coords: &[f32],
    ) -> GpuResult<Self> {
        let (width, height) = image.dimensions();
        if width != height || !width.is_power_of_two() {
            return Err(GpuError::NotPowerOfTwo { width, height });
        }

        // Images are stored top row first, textures bottom row first
        let stride = width as usize * 4;
        let mut rows = Vec::with_capacity(image.as_raw().len());
        for row in image.as_raw().chunks_exact(stride).rev() {
            rows.extend_from_slice(row);
        }

        let handle = create(gl, TextureTarget::Texture2D)?;
        gl.tex_image_2d(TextureTarget::Texture2D, width, height, Some(&rows));
        gl.bind_texture(TextureTarget::Texture2D, 0);
        if let Err(e) = gpu::check_error(gl, "upload texture") {
            gl.delete_texture(handle);
            return Err(e);
        }
        Ok(Self::from_parts(
            handle,
            TextureTarget::Texture2D,
            tex_coords,
            slots.next_slot(),
            (width, height),
            true,
        ))
    }

    /// A non-owning view of another texture's object
    pub fn view(other: &Texture, tex_coords: &[f32]) -> Self {
        Self::from_parts(
            other.handle,
            other.target,
            tex_coords,
            other.slot,
            (other.width, other.height),
            false,
        )
    }

    fn from_parts(
        handle: Handle,
        target: TextureTarget,
        tex_coords: &[f32],
        slot: u32,
        (width, height): (u32, u32),
        owned: bool,
    ) -> Self {
        Self {
            handle,
            target,
            tex_coords: tex_coords.to_vec(),
            slot,
            width,
            height,
            owned,
            bound: false,
            disposed: false,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn tex_coords(&self) -> &[f32] {
        &self.tex_coords
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn bind(&mut self, gl: &dyn GpuContext) {
        if !self.bound {
            gl.bind_texture(self.target, self.handle);
            self.bound = true;
        }
    }

    pub fn unbind(&mut self, gl: &dyn GpuContext) {
        if self.bound {
            gl.bind_texture(self.target, 0);
            self.bound = false;
        }
    }

    /// Bind to unit 0 and feed the texture coordinates to `a_TexCoord`
    pub fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        gl.active_texture(0);
        self.bind(gl);
        program.set_attribute(
            gl,
            shader_names::TEX_COORD,
            geometry::COORDS_PER_TEX_COORD,
            &self.tex_coords,
        )?;
        Ok(())
    }

    pub fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        self.unbind(gl);
        program.disable_attribute(gl, shader_names::TEX_COORD)
    }

    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        if self.disposed {
            return;
        }
        self.unbind(gl);
        if self.owned {
            gl.delete_texture(self.handle);
        }
        self.disposed = true;
    }
}

/// A texture whose contents come from a [`VideoSurface`]
#[derive(Debug)]
pub struct ExternalTexture {
    texture: Texture,
    surface: VideoSurface,
}

impl ExternalTexture {
    pub fn new(gl: &dyn GpuContext, slots: &TextureSlots, tex_coords: &[f32]) -> GpuResult<Self> {
        let handle = create(gl, TextureTarget::External)?;
        gl.bind_texture(TextureTarget::External, 0);
        let surface = VideoSurface::new(slots.next_surface_id());
        debug!(handle, surface = surface.id(), "Created external texture");
        Ok(Self {
            texture: Texture::wrap(slots, handle, TextureTarget::External, tex_coords),
            surface,
        })
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn surface(&self) -> &VideoSurface {
        &self.surface
    }

    /// Producer handle to give to a camera device
    pub fn sink(&self) -> SurfaceSink {
        self.surface.sink()
    }

    pub fn set_on_frame_available(&self, listener: Option<FrameAvailableListener>) {
        self.surface.set_on_frame_available(listener);
    }

    /// Latch the newest surface frame, then draw as a regular texture
    pub fn draw(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        gl.active_texture(0);
        if self.surface.update_tex_image(gl, self.texture.handle) {
            // Latching binds the texture behind our back
            self.texture.bound = true;
        }
        self.texture.draw(gl, program)
    }

    pub fn cleanup(&mut self, gl: &dyn GpuContext, program: &ShaderProgram) -> GpuResult<()> {
        self.texture.cleanup(gl, program)
    }

    /// Release the surface, then the texture
    pub fn dispose(&mut self, gl: &dyn GpuContext) {
        self.surface.release();
        self.texture.dispose(gl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareGpu;

    #[test]
    fn empty_texture_has_storage_and_slot() {
        let gl = SoftwareGpu::new(1, 1);
        let slots = TextureSlots::new();
        let a = Texture::empty(&gl, &slots, 8, 4).unwrap();
        let b = Texture::empty(&gl, &slots, 8, 4).unwrap();
        assert_eq!(a.size(), (8, 4));
        assert_eq!((a.slot(), b.slot()), (0, 1));
        assert_eq!(gl.texture_pixels(a.handle()).unwrap().len(), 8 * 4 * 4);
    }

    #[test]
    fn non_square_image_is_rejected() {
        let gl = SoftwareGpu::new(1, 1);
        let slots = TextureSlots::new();
        for (w, h) in [(4, 2), (6, 6)] {
            let image = RgbaImage::new(w, h);
            let err =
                Texture::from_image(&gl, &slots, &image, &geometry::DEFAULT_TEX_COORDS).unwrap_err();
            assert!(matches!(err, GpuError::NotPowerOfTwo { .. }));
        }
        assert_eq!(gl.live_objects(), 0);
        assert_eq!(slots.allocated(), 0);
    }

    #[test]
    fn image_rows_are_stored_bottom_up() {
        let gl = SoftwareGpu::new(1, 1);
        let slots = TextureSlots::new();
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(0, 0, image::Rgba([9, 9, 9, 255]));
        let texture = Texture::from_image(&gl, &slots, &image, &geometry::DEFAULT_TEX_COORDS).unwrap();
        let pixels = gl.texture_pixels(texture.handle()).unwrap();
        // top-left of the image is the first pixel of the last row
        assert_eq!(&pixels[8..12], &[9, 9, 9, 255]);
    }

    #[test]
    fn bind_and_unbind_are_idempotent() {
        let gl = SoftwareGpu::new(1, 1);
        let slots = TextureSlots::new();
        let mut texture = Texture::empty(&gl, &slots, 2, 2).unwrap();
        let before = gl.stats().bind_texture;
        texture.bind(&gl);
        texture.bind(&gl);
        assert_eq!(gl.stats().bind_texture, before + 1);
        texture.unbind(&gl);
        texture.unbind(&gl);
        assert_eq!(gl.stats().bind_texture, before + 2);
    }

    #[test]
    fn views_never_delete() {
        let gl = SoftwareGpu::new(1, 1);
        let slots = TextureSlots::new();
        let mut texture = Texture::empty(&gl, &slots, 2, 2).unwrap();
        let mut view = Texture::view(&texture, &geometry::DEFAULT_TEX_COORDS);
        view.dispose(&gl);
        assert_eq!(gl.live_objects(), 1);
        texture.dispose(&gl);
        texture.dispose(&gl);
        assert_eq!(gl.live_objects(), 0);
        assert_eq!(gl.stats().invalid_deletes, 0);
    }

    #[test]
    fn external_dispose_releases_surface() {
        let gl = SoftwareGpu::new(1, 1);
        let slots = TextureSlots::new();
        let mut external = ExternalTexture::new(&gl, &slots, &geometry::DEFAULT_TEX_COORDS).unwrap();
        let sink = external.sink();
        external.dispose(&gl);
        assert!(sink.is_released());
        assert_eq!(gl.live_objects(), 0);
    }

    #[test]
    fn external_surface_ids_come_from_the_allocator() {
        let gl = SoftwareGpu::new(1, 1);
        let slots = TextureSlots::new();
        let other = TextureSlots::new();
        let tex_coords = &geometry::DEFAULT_TEX_COORDS;
        let mut a = ExternalTexture::new(&gl, &slots, tex_coords).unwrap();
        let mut b = ExternalTexture::new(&gl, &slots, tex_coords).unwrap();
        let mut c = ExternalTexture::new(&gl, &other, tex_coords).unwrap();
        assert_eq!((a.sink().id(), b.sink().id()), (1, 2));
        assert_eq!(c.surface().id(), 1);
        for external in [&mut a, &mut b, &mut c] {
            external.dispose(&gl);
        }
    }
}
