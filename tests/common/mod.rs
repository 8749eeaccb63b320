// SPDX-License-Identifier: GPL-3.0-only

//! Shared helpers for integration tests

#![allow(dead_code)]

use glcamera::camera::{
    CameraDevice, CameraInfo, CameraParameters, CameraProvider, Face, FaceDetectionListener,
    Facing, FocusControl, FrameSink, PreviewFormat,
};
use glcamera::errors::{CameraError, CameraResult};
use glcamera::scene::SurfaceSink;
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

pub const PREVIEW_WIDTH: u32 = 4;
pub const PREVIEW_HEIGHT: u32 = 4;

/// A device call seen by [`RecordingProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(usize),
    SetParameters { recording_hint: bool },
    SetPreviewTexture(Option<u64>),
    SetCallbackWithBuffer(bool),
    AddCallbackBuffer(usize),
    StartPreview,
    StopPreview,
    AutoFocus,
    CancelAutoFocus,
    StartFaceDetection,
    Release,
}

#[derive(Default)]
struct DeviceState {
    calls: Vec<Call>,
    sink: Option<FrameSink>,
    pool: Vec<Vec<u8>>,
    callback_enabled: bool,
    face_listener: Option<FaceDetectionListener>,
    focus_threads: HashSet<ThreadId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Camera double that records every call it receives
///
/// With [`RecordingProvider::gated`], `open` blocks until [`Gate::release`]
/// so requests can be queued while the session is still configuring.
pub struct RecordingProvider {
    count: usize,
    format: PreviewFormat,
    state: Arc<Mutex<DeviceState>>,
    gate: Mutex<Option<Receiver<()>>>,
}

pub struct Gate(Sender<()>);

impl Gate {
    pub fn release(&self) {
        let _ = self.0.send(());
    }
}

impl RecordingProvider {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self::build(count, None))
    }

    pub fn gated(count: usize) -> (Arc<Self>, Gate) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self::build(count, Some(rx))), Gate(tx))
    }

    fn build(count: usize, gate: Option<Receiver<()>>) -> Self {
        Self {
            count,
            format: PreviewFormat::Rgba,
            state: Arc::new(Mutex::new(DeviceState::default())),
            gate: Mutex::new(gate),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state).calls.clone()
    }

    pub fn count_of(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn count_matching(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| f(c)).count()
    }

    /// Deliver one preview buffer filled with `value`, if the callback is
    /// enabled and the pool has a buffer
    pub fn emit_frame(&self, value: u8) -> bool {
        let mut state = lock(&self.state);
        if !state.callback_enabled {
            return false;
        }
        let (Some(sink), Some(mut buffer)) = (state.sink.clone(), state.pool.pop()) else {
            return false;
        };
        drop(state);
        buffer.iter_mut().for_each(|b| *b = value);
        sink.deliver(Some(buffer))
    }

    pub fn emit_faces(&self, faces: &[Face]) -> bool {
        let listener = lock(&self.state).face_listener.clone();
        match listener {
            Some(listener) => {
                listener(faces);
                true
            }
            None => false,
        }
    }

    /// Distinct threads that issued focus attempts
    pub fn focus_threads(&self) -> usize {
        lock(&self.state).focus_threads.len()
    }

    pub fn pool_size(&self) -> usize {
        lock(&self.state).pool.len()
    }
}

impl CameraProvider for RecordingProvider {
    fn camera_count(&self) -> usize {
        self.count
    }

    fn camera_info(&self, index: usize) -> Option<CameraInfo> {
        (index < self.count).then(|| CameraInfo {
            index,
            name: format!("Recording Camera {index}"),
            facing: Facing::Back,
            orientation: 0,
        })
    }

    fn open(&self, index: usize, frames: FrameSink) -> CameraResult<Box<dyn CameraDevice>> {
        if let Some(gate) = lock(&self.gate).take() {
            gate.recv()
                .map_err(|_| CameraError::OpenFailed("gate dropped".to_string()))?;
        }
        let mut state = lock(&self.state);
        state.calls.push(Call::Open(index));
        state.sink = Some(frames);
        drop(state);
        Ok(Box::new(RecordingDevice {
            format: self.format,
            state: Arc::clone(&self.state),
        }))
    }
}

struct RecordingDevice {
    format: PreviewFormat,
    state: Arc<Mutex<DeviceState>>,
}

impl RecordingDevice {
    fn record(&self, call: Call) {
        lock(&self.state).calls.push(call);
    }
}

struct RecordingFocus {
    state: Arc<Mutex<DeviceState>>,
}

impl FocusControl for RecordingFocus {
    fn auto_focus(&self, done: Box<dyn FnOnce(bool) + Send>) {
        let mut state = lock(&self.state);
        state.calls.push(Call::AutoFocus);
        state.focus_threads.insert(std::thread::current().id());
        drop(state);
        done(true);
    }

    fn cancel_auto_focus(&self) {
        lock(&self.state).calls.push(Call::CancelAutoFocus);
    }
}

impl CameraDevice for RecordingDevice {
    fn parameters(&self) -> CameraParameters {
        CameraParameters {
            preview_width: PREVIEW_WIDTH,
            preview_height: PREVIEW_HEIGHT,
            preview_format: self.format,
            recording_hint: false,
        }
    }

    fn set_parameters(&mut self, parameters: &CameraParameters) -> CameraResult<()> {
        self.record(Call::SetParameters {
            recording_hint: parameters.recording_hint,
        });
        Ok(())
    }

    fn set_preview_texture(&mut self, surface: Option<SurfaceSink>) -> CameraResult<()> {
        self.record(Call::SetPreviewTexture(surface.as_ref().map(SurfaceSink::id)));
        Ok(())
    }

    fn set_preview_callback_with_buffer(&mut self, enabled: bool) {
        let mut state = lock(&self.state);
        state.calls.push(Call::SetCallbackWithBuffer(enabled));
        state.callback_enabled = enabled;
    }

    fn add_callback_buffer(&mut self, buffer: Vec<u8>) {
        let mut state = lock(&self.state);
        state.calls.push(Call::AddCallbackBuffer(buffer.len()));
        state.pool.push(buffer);
    }

    fn start_preview(&mut self) -> CameraResult<()> {
        self.record(Call::StartPreview);
        Ok(())
    }

    fn stop_preview(&mut self) {
        self.record(Call::StopPreview);
    }

    fn focus_control(&self) -> Arc<dyn FocusControl> {
        Arc::new(RecordingFocus {
            state: Arc::clone(&self.state),
        })
    }

    fn start_face_detection(&mut self, listener: FaceDetectionListener) -> CameraResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(Call::StartFaceDetection);
        state.face_listener = Some(listener);
        Ok(())
    }

    fn release(&mut self) {
        let mut state = lock(&self.state);
        state.calls.push(Call::Release);
        state.sink = None;
        state.callback_enabled = false;
    }
}

/// Poll `condition` until it holds or five seconds pass
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
