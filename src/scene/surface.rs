// SPDX-License-Identifier: GPL-3.0-only

//! Video surfaces feeding external textures
//!
//! A [`VideoSurface`] is the render-thread end of a single-slot frame queue;
//! the matching [`SurfaceSink`] is handed to a camera device which pushes
//! preview frames into it from its own thread. Newer frames replace a frame
//! that has not been latched yet.

use crate::gpu::{GpuContext, Handle, TextureTarget};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Called from the producer thread whenever a new frame is queued
pub type FrameAvailableListener = Box<dyn Fn() + Send + Sync>;

struct PendingFrame {
    width: u32,
    height: u32,
    /// RGBA8, top row first
    rgba: Vec<u8>,
}

struct SurfaceShared {
    id: u64,
    pending: Mutex<Option<PendingFrame>>,
    listener: Mutex<Option<FrameAvailableListener>>,
    released: AtomicBool,
    frames_queued: AtomicU64,
}

/// Consumer side of a frame queue, owned by an external texture
pub struct VideoSurface {
    shared: Arc<SurfaceShared>,
    latched: Option<(u32, u32)>,
}

/// Producer side of a frame queue
#[derive(Clone)]
pub struct SurfaceSink {
    shared: Arc<SurfaceShared>,
}

impl std::fmt::Debug for VideoSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSurface")
            .field("id", &self.shared.id)
            .field("latched", &self.latched)
            .finish()
    }
}

impl std::fmt::Debug for SurfaceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceSink")
            .field("id", &self.shared.id)
            .finish()
    }
}

impl VideoSurface {
    /// `id` identifies the surface to camera devices; see
    /// [`TextureSlots::next_surface_id`](crate::gpu::TextureSlots::next_surface_id)
    pub fn new(id: u64) -> Self {
        Self {
            shared: Arc::new(SurfaceShared {
                id,
                pending: Mutex::new(None),
                listener: Mutex::new(None),
                released: AtomicBool::new(false),
                frames_queued: AtomicU64::new(0),
            }),
            latched: None,
        }
    }

    /// Identifier shared with every sink of this surface
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Producer handle for a camera device
    pub fn sink(&self) -> SurfaceSink {
        SurfaceSink {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_on_frame_available(&self, listener: Option<FrameAvailableListener>) {
        if let Ok(mut slot) = self.shared.listener.lock() {
            *slot = listener;
        }
    }

    /// Size of the most recently latched frame
    pub fn latched_size(&self) -> Option<(u32, u32)> {
        self.latched
    }

    /// Latch the queued frame into `texture`, if any
    ///
    /// Binds `texture` to the external target of the active unit. Returns
    /// whether a new frame was uploaded.
    pub fn update_tex_image(&mut self, gl: &dyn GpuContext, texture: Handle) -> bool {
        let frame = match self.shared.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(_) => None,
        };
        let Some(frame) = frame else {
            return false;
        };

        // Texture storage starts at the bottom row
        let stride = frame.width as usize * 4;
        let mut flipped = Vec::with_capacity(frame.rgba.len());
        for row in frame.rgba.chunks_exact(stride).rev() {
            flipped.extend_from_slice(row);
        }

        gl.bind_texture(TextureTarget::External, texture);
        gl.tex_image_2d(
            TextureTarget::External,
            frame.width,
            frame.height,
            Some(&flipped),
        );
        self.latched = Some((frame.width, frame.height));
        trace!(surface = self.shared.id, "Latched surface frame");
        true
    }

    /// Detach listeners and refuse further frames
    pub fn release(&mut self) {
        if self.shared.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.take();
        }
        if let Ok(mut listener) = self.shared.listener.lock() {
            listener.take();
        }
        debug!(surface = self.shared.id, "Released video surface");
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }
}

impl SurfaceSink {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Number of frames accepted so far
    pub fn frames_queued(&self) -> u64 {
        self.shared.frames_queued.load(Ordering::Relaxed)
    }

    /// Queue a top-down RGBA frame and notify the listener
    ///
    /// Returns `false` if the surface was released or the frame is malformed.
    pub fn push_frame(&self, width: u32, height: u32, rgba: Vec<u8>) -> bool {
        if self.is_released() {
            return false;
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4));
        if width == 0 || height == 0 || expected != Some(rgba.len()) {
            warn!(
                width,
                height,
                len = rgba.len(),
                "Dropping malformed surface frame"
            );
            return false;
        }
        match self.shared.pending.lock() {
            Ok(mut pending) => {
                *pending = Some(PendingFrame {
                    width,
                    height,
                    rgba,
                })
            }
            Err(_) => return false,
        }
        self.shared.frames_queued.fetch_add(1, Ordering::Relaxed);
        if let Ok(listener) = self.shared.listener.lock()
            && let Some(listener) = listener.as_ref()
        {
            listener();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareGpu;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn push_notifies_and_latch_flips_rows() {
        let gl = SoftwareGpu::new(1, 1);
        let mut surface = VideoSurface::new(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        surface.set_on_frame_available(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let sink = surface.sink();
        assert_eq!(sink.id(), surface.id());
        let top = [1u8, 2, 3, 4];
        let bottom = [5u8, 6, 7, 8];
        assert!(sink.push_frame(1, 2, [top, bottom].concat()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let texture = gl.gen_texture();
        assert!(surface.update_tex_image(&gl, texture));
        assert!(!surface.update_tex_image(&gl, texture));
        assert_eq!(gl.texture_pixels(texture).unwrap(), [bottom, top].concat());
        assert_eq!(surface.latched_size(), Some((1, 2)));
    }

    #[test]
    fn released_surface_rejects_frames() {
        let mut surface = VideoSurface::new(1);
        let sink = surface.sink();
        surface.release();
        assert!(sink.is_released());
        assert!(!sink.push_frame(1, 1, vec![0; 4]));
        assert_eq!(sink.frames_queued(), 0);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let surface = VideoSurface::new(1);
        let sink = surface.sink();
        assert!(!sink.push_frame(2, 2, vec![0; 4]));
        // Would wrap to 0 in u32 arithmetic
        assert!(!sink.push_frame(65536, 16384, Vec::new()));
        assert!(!sink.push_frame(u32::MAX, u32::MAX, vec![0; 4]));
        assert_eq!(sink.frames_queued(), 0);
    }
}
