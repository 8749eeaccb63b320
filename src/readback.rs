// SPDX-License-Identifier: GPL-3.0-only

//! Rendered-frame readback on a worker thread
//!
//! The render thread reads the just-drawn frame (the context is only current
//! there) and hands the raw bytes over a single-slot channel. The worker
//! turns them into top-down ARGB pixels and calls the consumer. A frame that
//! arrives while the slot is still full is dropped.
//!
//! Raw readback rows are bottom-up and each little-endian word is
//! `0xAABBGGRR`; the consumer sees `0xAARRGGBB`, top row first.

use crate::errors::{CaptureError, CaptureResult, GpuResult};
use crate::gpu::{self, GpuContext};
use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Receives corrected `width * height` ARGB pixels
pub type FrameConsumer = Box<dyn FnMut(&[u32], u32, u32) + Send>;

/// Shared, replaceable consumer
#[derive(Clone, Default)]
pub struct ConsumerSlot {
    inner: Arc<Mutex<Option<FrameConsumer>>>,
}

impl std::fmt::Debug for ConsumerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

impl ConsumerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, consumer: Option<FrameConsumer>) {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = consumer;
    }

    pub fn is_set(&self) -> bool {
        self.inner
            .lock()
            .map(|consumer| consumer.is_some())
            .unwrap_or(false)
    }

    /// Call the consumer if one is set; true when it ran
    fn deliver(&self, pixels: &[u32], width: u32, height: u32) -> bool {
        let mut consumer = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match consumer.as_mut() {
            Some(consumer) => {
                consumer(pixels, width, height);
                true
            }
            None => false,
        }
    }
}

enum ReadbackMessage {
    Frame(Vec<u8>),
    Stop,
}

/// Swap the red and blue bytes of a packed pixel
pub fn swap_rb(pixel: u32) -> u32 {
    (pixel & 0xFF00_FF00) | ((pixel & 0xFF) << 16) | ((pixel >> 16) & 0xFF)
}

/// Pack raw RGBA bytes into little-endian words
pub fn pack_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]]))
        .collect()
}

/// Flip rows and swap red/blue: `out[x, y] = swap_rb(raw[x, height - 1 - y])`
pub fn correct_readback(raw: &[u32], width: u32, height: u32, out: &mut [u32]) {
    let w = width as usize;
    let h = height as usize;
    for (y, row) in out.chunks_exact_mut(w).take(h).enumerate() {
        let source = &raw[(h - 1 - y) * w..(h - y) * w];
        for (dst, &src) in row.iter_mut().zip(source) {
            *dst = swap_rb(src);
        }
    }
}

/// Unpack top-down ARGB pixels into an image
pub fn argb_to_image(pixels: &[u32], width: u32, height: u32) -> Option<RgbaImage> {
    let bytes = pixels
        .iter()
        .flat_map(|&p| {
            [
                (p >> 16) as u8,
                (p >> 8) as u8,
                p as u8,
                (p >> 24) as u8,
            ]
        })
        .collect();
    RgbaImage::from_raw(width, height, bytes)
}

/// Read the bound framebuffer and return it as a top-down image
///
/// Must run on the render thread.
pub fn read_image(gl: &dyn GpuContext, width: u32, height: u32) -> GpuResult<Option<RgbaImage>> {
    let mut raw = vec![0u8; width as usize * height as usize * 4];
    gl.read_pixels(0, 0, width, height, &mut raw);
    gpu::check_error(gl, "read_pixels")?;
    let mut pixels = vec![0u32; width as usize * height as usize];
    correct_readback(&pack_words(&raw), width, height, &mut pixels);
    Ok(argb_to_image(&pixels, width, height))
}

/// Worker turning rendered frames into consumer callbacks
pub struct FrameReadback {
    width: u32,
    height: u32,
    sender: SyncSender<ReadbackMessage>,
    handle: Option<JoinHandle<()>>,
    delivered: Arc<AtomicU64>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for FrameReadback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReadback")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("delivered", &self.frames_delivered())
            .finish()
    }
}

impl FrameReadback {
    pub fn start(width: u32, height: u32, consumer: ConsumerSlot) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidRequest(format!(
                "readback size {width}x{height}"
            )));
        }
        let (sender, receiver) = mpsc::sync_channel(1);
        let delivered = Arc::new(AtomicU64::new(0));
        let thread_delivered = Arc::clone(&delivered);

        let handle = thread::Builder::new()
            .name("frame-readback".to_string())
            .spawn(move || {
                let mut pixels = vec![0u32; width as usize * height as usize];
                debug!(width, height, "Readback thread started");
                for message in receiver.iter() {
                    let ReadbackMessage::Frame(raw) = message else {
                        break;
                    };
                    if !consumer.is_set() {
                        continue;
                    }
                    correct_readback(&pack_words(&raw), width, height, &mut pixels);
                    if consumer.deliver(&pixels, width, height) {
                        thread_delivered.fetch_add(1, Ordering::SeqCst);
                    }
                }
                debug!("Readback thread exiting");
            })?;

        info!(width, height, "Frame readback started");

        Ok(Self {
            width,
            height,
            sender,
            handle: Some(handle),
            delivered,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Read the current framebuffer and queue it for the worker
    ///
    /// Must run on the render thread right after a frame is drawn. Returns
    /// false when the frame was dropped.
    pub fn capture(&self, gl: &dyn GpuContext) -> GpuResult<bool> {
        if self.handle.is_none() {
            return Ok(false);
        }
        let mut raw = vec![0u8; self.width as usize * self.height as usize * 4];
        gl.read_pixels(0, 0, self.width, self.height, &mut raw);
        gpu::check_error(gl, "read_pixels")?;
        match self.sender.try_send(ReadbackMessage::Frame(raw)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Ok(false),
        }
    }

    pub fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the worker; always wakes it even when no frame is pending
    pub fn dispose(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.sender.send(ReadbackMessage::Stop);
        if handle.join().is_err() {
            warn!("Readback thread panicked");
        }
        info!(
            delivered = self.frames_delivered(),
            dropped = self.frames_dropped(),
            "Frame readback stopped"
        );
    }
}

impl Drop for FrameReadback {
    fn drop(&mut self) {
        self.dispose();
    }
}
