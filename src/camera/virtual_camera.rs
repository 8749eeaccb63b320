// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic cameras producing a moving test pattern
//!
//! Each open device runs a producer thread while previewing. Every frame is
//! pushed to the attached preview surface as RGBA and, when buffered
//! callbacks are enabled and the pool has a free buffer, encoded in the
//! preview format and handed to the [`FrameSink`].

use super::{
    CameraDevice, CameraInfo, CameraParameters, CameraProvider, Face, FaceDetectionListener,
    Facing, FocusControl, FrameSink, PreviewFormat,
};
use crate::errors::{CameraError, CameraResult};
use crate::scene::SurfaceSink;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings shared by every virtual camera of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualCameraConfig {
    /// Number of cameras; even indices face back, odd indices face front
    pub count: usize,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PreviewFormat,
}

impl Default for VirtualCameraConfig {
    fn default() -> Self {
        Self {
            count: 2,
            width: 640,
            height: 480,
            fps: 30,
            format: PreviewFormat::Nv21,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RGBA test frame: horizontal hue ramp scrolling with `frame`, vertical
/// brightness ramp
pub fn test_pattern(width: u32, height: u32, frame: u64) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    let shift = (frame * 4 % 256) as u32;
    for y in 0..height {
        let level = 64 + y * 191 / height.max(1);
        for x in 0..width {
            let ramp = (x * 255 / width.max(1) + shift) % 256;
            rgba.extend_from_slice(&[
                (ramp * level / 255) as u8,
                ((255 - ramp) * level / 255) as u8,
                (level / 2) as u8,
                255,
            ]);
        }
    }
    rgba
}

/// Provides `config.count` virtual cameras
#[derive(Debug, Default)]
pub struct VirtualCameraProvider {
    config: VirtualCameraConfig,
    open: Arc<Mutex<HashSet<usize>>>,
}

impl VirtualCameraProvider {
    pub fn new(config: VirtualCameraConfig) -> Self {
        Self {
            config,
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &VirtualCameraConfig {
        &self.config
    }

    pub fn is_open(&self, index: usize) -> bool {
        lock(&self.open).contains(&index)
    }
}

impl CameraProvider for VirtualCameraProvider {
    fn camera_count(&self) -> usize {
        self.config.count
    }

    fn camera_info(&self, index: usize) -> Option<CameraInfo> {
        (index < self.config.count).then(|| {
            let facing = if index % 2 == 0 {
                Facing::Back
            } else {
                Facing::Front
            };
            CameraInfo {
                index,
                name: format!("Virtual Camera {index}"),
                facing,
                orientation: if facing == Facing::Front { 270 } else { 90 },
            }
        })
    }

    fn open(&self, index: usize, frames: FrameSink) -> CameraResult<Box<dyn CameraDevice>> {
        if index >= self.config.count {
            return Err(CameraError::InvalidIndex {
                index: index as i32,
                count: self.config.count,
            });
        }
        if !lock(&self.open).insert(index) {
            return Err(CameraError::Busy);
        }
        info!(index, "Opened virtual camera");
        Ok(Box::new(VirtualCamera::new(
            index,
            &self.config,
            frames,
            Arc::clone(&self.open),
        )))
    }
}

/// Focus that always succeeds immediately
#[derive(Debug, Default)]
pub struct VirtualFocus {
    attempts: AtomicU64,
    cancels: AtomicU64,
}

impl VirtualFocus {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> u64 {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl FocusControl for VirtualFocus {
    fn auto_focus(&self, done: Box<dyn FnOnce(bool) + Send>) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        done(true);
    }

    fn cancel_auto_focus(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// State the producer thread reads every frame
#[derive(Default)]
struct Outputs {
    surface: Mutex<Option<SurfaceSink>>,
    callback_enabled: AtomicBool,
    pool: Mutex<Vec<Vec<u8>>>,
    faces: Mutex<Option<FaceDetectionListener>>,
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// One opened virtual camera
pub struct VirtualCamera {
    index: usize,
    fps: u32,
    parameters: CameraParameters,
    frames: FrameSink,
    outputs: Arc<Outputs>,
    focus: Arc<VirtualFocus>,
    producer: Option<Producer>,
    open: Arc<Mutex<HashSet<usize>>>,
    released: bool,
}

impl VirtualCamera {
    fn new(
        index: usize,
        config: &VirtualCameraConfig,
        frames: FrameSink,
        open: Arc<Mutex<HashSet<usize>>>,
    ) -> Self {
        Self {
            index,
            fps: config.fps.max(1),
            parameters: CameraParameters {
                preview_width: config.width,
                preview_height: config.height,
                preview_format: config.format,
                recording_hint: false,
            },
            frames,
            outputs: Arc::new(Outputs::default()),
            focus: Arc::new(VirtualFocus::default()),
            producer: None,
            open,
            released: false,
        }
    }

    fn ensure_open(&self) -> CameraResult<()> {
        if self.released {
            Err(CameraError::Disposed)
        } else {
            Ok(())
        }
    }
}

fn produce(
    parameters: CameraParameters,
    interval: Duration,
    frames: FrameSink,
    outputs: Arc<Outputs>,
    stop: Arc<AtomicBool>,
) {
    let (width, height) = (parameters.preview_width, parameters.preview_height);
    let size = parameters.preview_buffer_size();
    let face = Face {
        left: width as i32 / 4,
        top: height as i32 / 4,
        right: width as i32 * 3 / 4,
        bottom: height as i32 * 3 / 4,
        score: 90,
    };
    let mut frame = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let rgba = test_pattern(width, height, frame);

        if outputs.callback_enabled.load(Ordering::SeqCst) {
            let buffer = lock(&outputs.pool).pop();
            match buffer {
                Some(mut buffer) => {
                    buffer.clear();
                    buffer.extend_from_slice(
                        &parameters.preview_format.encode_rgba(&rgba, width, height),
                    );
                    buffer.resize(size, 0);
                    frames.deliver(Some(buffer));
                }
                None => debug!(frame, "No free preview buffer, frame dropped"),
            }
        }

        if let Some(surface) = lock(&outputs.surface).as_ref() {
            surface.push_frame(width, height, rgba);
        }

        let listener = lock(&outputs.faces).clone();
        if let Some(listener) = listener {
            listener(&[face]);
        }

        frame += 1;
        thread::sleep(interval);
    }
}

impl CameraDevice for VirtualCamera {
    fn parameters(&self) -> CameraParameters {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: &CameraParameters) -> CameraResult<()> {
        self.ensure_open()?;
        if parameters.preview_width == 0 || parameters.preview_height == 0 {
            return Err(CameraError::Parameters(format!(
                "preview size {}x{}",
                parameters.preview_width, parameters.preview_height
            )));
        }
        self.parameters = parameters.clone();
        Ok(())
    }

    fn set_preview_texture(&mut self, surface: Option<SurfaceSink>) -> CameraResult<()> {
        if surface.as_ref().is_some_and(SurfaceSink::is_released) {
            return Err(CameraError::PreviewTexture(
                "surface already released".to_string(),
            ));
        }
        *lock(&self.outputs.surface) = surface;
        Ok(())
    }

    fn set_preview_callback_with_buffer(&mut self, enabled: bool) {
        self.outputs.callback_enabled.store(enabled, Ordering::SeqCst);
    }

    fn add_callback_buffer(&mut self, buffer: Vec<u8>) {
        lock(&self.outputs.pool).push(buffer);
    }

    fn start_preview(&mut self) -> CameraResult<()> {
        self.ensure_open()?;
        if self.producer.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs(1) / self.fps;
        let parameters = self.parameters.clone();
        let frames = self.frames.clone();
        let outputs = Arc::clone(&self.outputs);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("virtual-camera-{}", self.index))
            .spawn(move || produce(parameters, interval, frames, outputs, thread_stop))
            .map_err(|e| CameraError::BackendError(e.to_string()))?;
        self.producer = Some(Producer { stop, handle });
        debug!(index = self.index, fps = self.fps, "Virtual preview started");
        Ok(())
    }

    fn stop_preview(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.stop.store(true, Ordering::SeqCst);
            if producer.handle.join().is_err() {
                warn!(index = self.index, "Virtual camera producer panicked");
            }
            debug!(index = self.index, "Virtual preview stopped");
        }
    }

    fn focus_control(&self) -> Arc<dyn FocusControl> {
        self.focus.clone()
    }

    fn start_face_detection(&mut self, listener: FaceDetectionListener) -> CameraResult<()> {
        self.ensure_open()?;
        *lock(&self.outputs.faces) = Some(listener);
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.stop_preview();
        *lock(&self.outputs.surface) = None;
        *lock(&self.outputs.faces) = None;
        lock(&self.outputs.pool).clear();
        lock(&self.open).remove(&self.index);
        self.released = true;
        info!(index = self.index, "Released virtual camera");
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn small() -> VirtualCameraConfig {
        VirtualCameraConfig {
            count: 1,
            width: 4,
            height: 2,
            fps: 200,
            format: PreviewFormat::Nv21,
        }
    }

    #[test]
    fn second_open_is_busy_until_released() {
        let provider = VirtualCameraProvider::new(small());
        let sink = FrameSink::new(|_| true);
        let mut device = provider.open(0, sink.clone()).unwrap();
        assert!(matches!(provider.open(0, sink.clone()), Err(CameraError::Busy)));
        device.release();
        assert!(!provider.is_open(0));
        assert!(provider.open(0, sink).is_ok());
    }

    #[test]
    fn delivers_buffers_from_the_pool() {
        let provider = VirtualCameraProvider::new(small());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sink = FrameSink::new(move |buffer| lock(&tx).send(buffer).is_ok());
        let mut device = provider.open(0, sink).unwrap();
        device.add_callback_buffer(Vec::new());
        device.set_preview_callback_with_buffer(true);
        device.start_preview().unwrap();
        let buffer = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(buffer.len(), PreviewFormat::Nv21.buffer_size(4, 2));
        device.release();
    }

    #[test]
    fn pattern_scrolls() {
        assert_eq!(test_pattern(8, 4, 0).len(), 8 * 4 * 4);
        assert_ne!(test_pattern(8, 4, 0), test_pattern(8, 4, 1));
    }
}
