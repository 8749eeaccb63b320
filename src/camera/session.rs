// SPDX-License-Identifier: GPL-3.0-only
//! A camera device owned by its own thread
//!
//! Every request and every preview buffer reaches the session thread through
//! one channel, so the device is only ever called from that thread.
//!
//! # Startup
//!
//! ```text
//! Unopened ─▶ Configuring ─▶ open device ─▶ read preview size/format
//!                                        ─▶ recording hint
//!                                        ─▶ replay pending requests
//!                                        ─▶ Running
//! ```
//!
//! Requests issued before the device is open are collapsed into pending
//! fields (the last request of each kind wins) and replayed exactly once.
//! Requests that are already satisfied produce no further device call.

use super::autofocus::AutoFocusLoop;
use super::{
    AutoFocusCallback, AvailabilityListener, CameraDevice, CameraInfo, CameraProvider,
    FaceDetectionListener, FrameSink, PreviewCallback, PreviewFormat,
};
use crate::constants::camera;
use crate::errors::{CameraError, CameraResult};
use crate::scene::SurfaceSink;
use crate::storage::FrameWriter;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`CameraSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Configuring,
    Running,
    Disposed,
    /// The device could not be opened or started
    Failed,
}

/// Geometry and layout of preview buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewInfo {
    pub width: u32,
    pub height: u32,
    pub format: PreviewFormat,
}

impl PreviewInfo {
    pub fn buffer_size(&self) -> usize {
        self.format.buffer_size(self.width, self.height)
    }
}

/// Tunables for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub auto_focus_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_focus_interval: camera::AUTO_FOCUS_INTERVAL,
        }
    }
}

enum SessionMessage {
    PreviewTexture(Option<SurfaceSink>),
    PreviewCallback(Option<PreviewCallback>),
    AutoFocus(bool),
    AutoFocusCallback(Option<AutoFocusCallback>),
    FaceDetection(FaceDetectionListener),
    FrameCapture { folder: String, filename: String },
    AvailabilityListener(AvailabilityListener),
    Frame(Option<Vec<u8>>),
    Dispose,
}

struct Shared {
    state: Mutex<SessionState>,
    changed: Condvar,
    preview: Mutex<Option<PreviewInfo>>,
    error: Mutex<Option<CameraError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
        self.changed.notify_all();
        debug!(?state, "Camera session state changed");
    }

    fn fail(&self, error: CameraError) {
        error!(error = %error, "Camera session failed");
        *lock(&self.error) = Some(error);
        self.set_state(SessionState::Failed);
    }
}

/// Handle to a camera running on its own thread
pub struct CameraSession {
    sender: Sender<SessionMessage>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    info: CameraInfo,
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("camera", &self.info.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CameraSession {
    /// Validate `index` and start opening the camera in the background
    pub fn open(
        provider: Arc<dyn CameraProvider>,
        index: i32,
        writer: Arc<dyn FrameWriter>,
    ) -> CameraResult<Self> {
        Self::open_with(provider, index, writer, SessionOptions::default())
    }

    pub fn open_with(
        provider: Arc<dyn CameraProvider>,
        index: i32,
        writer: Arc<dyn FrameWriter>,
        options: SessionOptions,
    ) -> CameraResult<Self> {
        let count = provider.camera_count();
        if count == 0 {
            return Err(CameraError::NoCameraFound);
        }
        let invalid = CameraError::InvalidIndex { index, count };
        let slot = usize::try_from(index).map_err(|_| invalid.clone())?;
        let info = provider
            .camera_info(slot)
            .filter(|_| slot < count)
            .ok_or(invalid)?;

        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Unopened),
            changed: Condvar::new(),
            preview: Mutex::new(None),
            error: Mutex::new(None),
        });

        let frame_sender = sender.clone();
        let frames = FrameSink::new(move |buffer| {
            frame_sender.send(SessionMessage::Frame(buffer)).is_ok()
        });

        let thread_shared = Arc::clone(&shared);
        let thread_info = info.clone();
        let handle = thread::Builder::new()
            .name("camera-session".to_string())
            .spawn(move || {
                session_main(
                    provider,
                    thread_info,
                    writer,
                    options,
                    frames,
                    receiver,
                    thread_shared,
                );
            })
            .map_err(|e| CameraError::BackendError(format!("camera thread: {e}")))?;

        info!(index, camera = %info.name, facing = %info.facing, "Camera session started");

        Ok(Self {
            sender,
            handle: Some(handle),
            shared,
            info,
        })
    }

    fn send(&self, message: SessionMessage) {
        if self.sender.send(message).is_err() {
            debug!("Camera session thread gone, request dropped");
        }
    }

    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.shared.state)
    }

    /// Preview geometry, known once the device is open
    pub fn preview_info(&self) -> Option<PreviewInfo> {
        *lock(&self.shared.preview)
    }

    /// Block until the session is running, failed or disposed
    pub fn wait_until_running(&self, timeout: Duration) -> CameraResult<PreviewInfo> {
        let guard = lock(&self.shared.state);
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(guard, timeout, |state| {
                matches!(state, SessionState::Unopened | SessionState::Configuring)
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *state {
            SessionState::Running => self
                .preview_info()
                .ok_or_else(|| CameraError::BackendError("preview size unknown".to_string())),
            SessionState::Failed => Err(lock(&self.shared.error)
                .clone()
                .unwrap_or_else(|| CameraError::OpenFailed("unknown error".to_string()))),
            SessionState::Disposed => Err(CameraError::Disposed),
            SessionState::Unopened | SessionState::Configuring => Err(CameraError::BackendError(
                format!("camera not ready after {} ms", timeout.as_millis()),
            )),
        }
    }

    /// Route preview frames to a surface; `None` detaches
    pub fn set_preview_texture(&self, surface: Option<SurfaceSink>) {
        self.send(SessionMessage::PreviewTexture(surface));
    }

    /// Receive every raw preview buffer; `None` removes the callback
    pub fn set_preview_callback(&self, callback: Option<PreviewCallback>) {
        self.send(SessionMessage::PreviewCallback(callback));
    }

    /// Start periodic auto-focus
    pub fn request_auto_focus(&self) {
        self.send(SessionMessage::AutoFocus(true));
    }

    pub fn stop_auto_focus(&self) {
        self.send(SessionMessage::AutoFocus(false));
    }

    pub fn set_auto_focus_callback(&self, callback: Option<AutoFocusCallback>) {
        self.send(SessionMessage::AutoFocusCallback(callback));
    }

    pub fn start_face_detection(&self, listener: FaceDetectionListener) {
        self.send(SessionMessage::FaceDetection(listener));
    }

    /// Save the next raw preview frame as `<folder>/<filename>.jpg`
    pub fn request_frame_capture(&self, folder: &str, filename: &str) {
        self.send(SessionMessage::FrameCapture {
            folder: folder.to_string(),
            filename: filename.to_string(),
        });
    }

    /// Called once previewing; immediately if already running
    pub fn set_availability_listener(&self, listener: AvailabilityListener) {
        self.send(SessionMessage::AvailabilityListener(listener));
    }

    /// Release the device and join the session thread
    pub fn dispose(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.sender.send(SessionMessage::Dispose);
        if handle.join().is_err() {
            warn!("Camera session thread panicked");
        }
        if self.state() != SessionState::Failed {
            self.shared.set_state(SessionState::Disposed);
        }
        info!(camera = %self.info.name, "Camera session disposed");
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Default)]
struct Pending {
    texture: Option<Option<SurfaceSink>>,
    callback: Option<Option<PreviewCallback>>,
    auto_focus: Option<bool>,
    auto_focus_callback: Option<Option<AutoFocusCallback>>,
    face_detection: Option<FaceDetectionListener>,
    capture: Option<(String, String)>,
    availability: Option<AvailabilityListener>,
    dispose: bool,
}

impl Pending {
    fn absorb(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::PreviewTexture(surface) => self.texture = Some(surface),
            SessionMessage::PreviewCallback(callback) => self.callback = Some(callback),
            SessionMessage::AutoFocus(enabled) => self.auto_focus = Some(enabled),
            SessionMessage::AutoFocusCallback(callback) => {
                self.auto_focus_callback = Some(callback)
            }
            SessionMessage::FaceDetection(listener) => self.face_detection = Some(listener),
            SessionMessage::FrameCapture { folder, filename } => {
                self.capture = Some((folder, filename))
            }
            SessionMessage::AvailabilityListener(listener) => self.availability = Some(listener),
            SessionMessage::Frame(_) => {}
            SessionMessage::Dispose => self.dispose = true,
        }
    }
}

fn session_main(
    provider: Arc<dyn CameraProvider>,
    info: CameraInfo,
    writer: Arc<dyn FrameWriter>,
    options: SessionOptions,
    frames: FrameSink,
    receiver: Receiver<SessionMessage>,
    shared: Arc<Shared>,
) {
    shared.set_state(SessionState::Configuring);

    let device = match provider.open(info.index, frames) {
        Ok(device) => device,
        Err(e) => {
            shared.fail(e);
            return;
        }
    };

    let mut parameters = device.parameters();
    let preview = PreviewInfo {
        width: parameters.preview_width,
        height: parameters.preview_height,
        format: parameters.preview_format,
    };
    *lock(&shared.preview) = Some(preview);

    let mut worker = Worker::new(device, info, preview, writer, options);
    parameters.recording_hint = true;
    if let Err(e) = worker.device.set_parameters(&parameters) {
        warn!(error = %e, "Could not set recording hint");
    }

    let mut pending = Pending::default();
    while let Ok(message) = receiver.try_recv() {
        pending.absorb(message);
    }

    if pending.dispose {
        worker.shutdown();
        shared.set_state(SessionState::Disposed);
        return;
    }

    if let Err(e) = worker.replay(pending, &shared) {
        worker.device.release();
        shared.fail(e);
        return;
    }

    for message in receiver.iter() {
        match message {
            SessionMessage::Dispose => break,
            message => worker.handle(message),
        }
    }

    worker.shutdown();
    shared.set_state(SessionState::Disposed);
}

/// Session-thread state wrapped around the open device
struct Worker {
    device: Box<dyn CameraDevice>,
    info: CameraInfo,
    preview: PreviewInfo,
    writer: Arc<dyn FrameWriter>,
    options: SessionOptions,
    surface_id: Option<u64>,
    active_callback: Option<PreviewCallback>,
    callback_enabled: bool,
    buffers_generated: bool,
    single_callback: bool,
    capture: Option<(String, String)>,
    auto_focus: Option<AutoFocusLoop>,
    auto_focus_callback: Option<AutoFocusCallback>,
    face_detection: bool,
}

impl Worker {
    fn new(
        device: Box<dyn CameraDevice>,
        info: CameraInfo,
        preview: PreviewInfo,
        writer: Arc<dyn FrameWriter>,
        options: SessionOptions,
    ) -> Self {
        Self {
            device,
            info,
            preview,
            writer,
            options,
            surface_id: None,
            active_callback: None,
            callback_enabled: false,
            buffers_generated: false,
            single_callback: false,
            capture: None,
            auto_focus: None,
            auto_focus_callback: None,
            face_detection: false,
        }
    }

    fn replay(&mut self, pending: Pending, shared: &Shared) -> CameraResult<()> {
        if let Some(surface) = pending.texture {
            self.set_preview_texture(surface);
        }
        if let Some(callback) = pending.callback {
            self.set_preview_callback(callback);
        }

        self.device.start_preview()?;
        shared.set_state(SessionState::Running);
        info!(
            camera = %self.info.name,
            width = self.preview.width,
            height = self.preview.height,
            format = %self.preview.format,
            "Camera preview running"
        );

        if let Some(callback) = pending.auto_focus_callback {
            self.auto_focus_callback = callback;
        }
        match pending.auto_focus {
            Some(true) => self.start_auto_focus(),
            Some(false) => self.stop_auto_focus(),
            None => {}
        }
        if let Some(listener) = pending.availability {
            listener(&self.info);
        }
        if let Some(listener) = pending.face_detection {
            self.start_face_detection(listener);
        }
        if let Some((folder, filename)) = pending.capture {
            self.request_frame_capture(folder, filename);
        }
        Ok(())
    }

    fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::PreviewTexture(surface) => self.set_preview_texture(surface),
            SessionMessage::PreviewCallback(callback) => self.set_preview_callback(callback),
            SessionMessage::AutoFocus(true) => self.start_auto_focus(),
            SessionMessage::AutoFocus(false) => self.stop_auto_focus(),
            SessionMessage::AutoFocusCallback(callback) => {
                if let Some(auto_focus) = &self.auto_focus {
                    auto_focus.set_callback(callback.clone());
                }
                self.auto_focus_callback = callback;
            }
            SessionMessage::FaceDetection(listener) => self.start_face_detection(listener),
            SessionMessage::FrameCapture { folder, filename } => {
                self.request_frame_capture(folder, filename)
            }
            SessionMessage::AvailabilityListener(listener) => listener(&self.info),
            SessionMessage::Frame(buffer) => self.on_preview_frame(buffer),
            SessionMessage::Dispose => {}
        }
    }

    fn set_preview_texture(&mut self, surface: Option<SurfaceSink>) {
        let id = surface.as_ref().map(SurfaceSink::id);
        if id == self.surface_id {
            debug!(?id, "Preview surface already attached");
            return;
        }
        match self.device.set_preview_texture(surface) {
            Ok(()) => self.surface_id = id,
            Err(e) => warn!(error = %e, "Could not set preview texture"),
        }
    }

    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) {
        let Some(callback) = callback else {
            self.active_callback = None;
            self.single_callback = false;
            if self.callback_enabled {
                self.device.set_preview_callback_with_buffer(false);
                self.callback_enabled = false;
            }
            return;
        };

        if !self.single_callback
            && self
                .active_callback
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active, &callback))
        {
            debug!("Preview callback already installed");
            return;
        }

        self.active_callback = Some(callback);
        self.single_callback = false;

        if !self.buffers_generated {
            let size = self.preview.buffer_size();
            for _ in 0..camera::CALLBACK_BUFFER_COUNT {
                self.device.add_callback_buffer(vec![0; size]);
            }
            self.buffers_generated = true;
            debug!(
                count = camera::CALLBACK_BUFFER_COUNT,
                size, "Allocated preview callback buffers"
            );
        }

        if !self.callback_enabled {
            self.device.set_preview_callback_with_buffer(true);
            self.callback_enabled = true;
        }
    }

    fn start_auto_focus(&mut self) {
        if self.auto_focus.as_ref().is_some_and(AutoFocusLoop::is_running) {
            debug!("Auto-focus already running");
            return;
        }
        match AutoFocusLoop::start(
            self.device.focus_control(),
            self.options.auto_focus_interval,
        ) {
            Ok(auto_focus) => {
                auto_focus.set_callback(self.auto_focus_callback.clone());
                self.auto_focus = Some(auto_focus);
            }
            Err(e) => warn!(error = %e, "Could not start auto-focus"),
        }
    }

    fn stop_auto_focus(&mut self) {
        if let Some(mut auto_focus) = self.auto_focus.take() {
            auto_focus.stop();
        }
    }

    fn start_face_detection(&mut self, listener: FaceDetectionListener) {
        if self.face_detection {
            debug!("Face detection already started");
            return;
        }
        match self.device.start_face_detection(listener) {
            Ok(()) => {
                self.face_detection = true;
                info!("Face detection started");
            }
            Err(e) => warn!(error = %e, "Could not start face detection"),
        }
    }

    fn request_frame_capture(&mut self, folder: String, filename: String) {
        debug!(%folder, %filename, "Frame capture requested");
        self.capture = Some((folder, filename));
        if self.active_callback.is_none() {
            self.set_preview_callback(Some(Arc::new(|_, _| {})));
            self.single_callback = true;
        }
    }

    fn on_preview_frame(&mut self, buffer: Option<Vec<u8>>) {
        let Some(data) = buffer else {
            return;
        };

        if let Some((folder, filename)) = self.capture.take() {
            match self.writer.save_preview_frame(
                &data,
                self.preview.width,
                self.preview.height,
                self.preview.format,
                &folder,
                &filename,
            ) {
                Ok(path) => info!(path = %path.display(), "Saved preview frame"),
                Err(e) => warn!(error = %e, "Could not save preview frame"),
            }
        }

        if let Some(callback) = &self.active_callback {
            callback(&data, &self.preview);
        }

        if self.single_callback {
            self.set_preview_callback(None);
        }

        self.device.add_callback_buffer(data);
    }

    /// Stop focus, stop preview, detach surface, clear callback, release
    fn shutdown(&mut self) {
        self.stop_auto_focus();
        self.device.stop_preview();
        if let Err(e) = self.device.set_preview_texture(None) {
            debug!(error = %e, "Detaching preview texture failed");
        }
        self.surface_id = None;
        self.device.set_preview_callback_with_buffer(false);
        self.callback_enabled = false;
        self.active_callback = None;
        self.device.release();
        info!(camera = %self.info.name, "Camera released");
    }
}
