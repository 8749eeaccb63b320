// SPDX-License-Identifier: GPL-3.0-only

//! Live camera view with an optional edge-detection filter chain
//!
//! # Frame flow
//!
//! ```text
//! camera ─▶ VideoSurface ─▶ external texture mesh ─┬─▶ display
//!                                                  │  (filters off)
//!                                                  ▼  (filters on)
//!                                         capture FrameBuffer
//!                                                  │
//!                                   blur ─▶ sobel
//!                                                  │
//!                                                  ▼
//!                                      edge direction ─▶ display
//! ```
//!
//! After each frame the display can be saved to disk (display capture) and
//! handed to a readback consumer. A new camera frame requests a render, so
//! the view works with [`RenderMode::WhenDirty`](crate::scene::RenderMode).

use crate::camera::session::SessionOptions;
use crate::camera::{
    CameraProvider, CameraSession, FaceDetectionListener, PreviewInfo, SessionState,
};
use crate::constants::geometry;
use crate::errors::{CameraResult, GpuResult};
use crate::gpu::{GpuContext, TextureSlots};
use crate::readback::{self, ConsumerSlot, FrameConsumer, FrameReadback};
use crate::scene::{
    DrawableId, FilterStage, FrameBuffer, Mesh, RenderRequester, Renderer, SceneItem,
    SceneRenderer, Texture,
};
use crate::shaders::{self, FilterKind};
use crate::storage::{self, FrameWriter};
use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a [`CameraView`] starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    pub camera_index: i32,
    pub filters_enabled: bool,
    pub auto_focus: bool,
    /// Hand every rendered frame to the frame consumer
    pub frame_readback: bool,
    pub session: SessionOptions,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            camera_index: 0,
            filters_enabled: false,
            auto_focus: false,
            frame_readback: true,
            session: SessionOptions::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ViewShared {
    filters_enabled: AtomicBool,
    display_capture: Mutex<Option<(String, String)>>,
    session: Mutex<Option<CameraSession>>,
    requester: Mutex<Option<RenderRequester>>,
    consumer: ConsumerSlot,
    saved: Mutex<Vec<PathBuf>>,
}

impl ViewShared {
    fn request_render(&self) {
        if let Some(requester) = lock(&self.requester).as_ref() {
            requester.request_render();
        }
    }
}

/// Application-side control of a [`CameraView`]
#[derive(Clone)]
pub struct CameraViewHandle {
    shared: Arc<ViewShared>,
}

impl std::fmt::Debug for CameraViewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraViewHandle")
            .field("filters_enabled", &self.filters_enabled())
            .field("camera_state", &self.camera_state())
            .finish()
    }
}

impl CameraViewHandle {
    /// Effective from the next frame
    pub fn enable_filters(&self) {
        self.shared.filters_enabled.store(true, Ordering::Relaxed);
        self.shared.request_render();
    }

    pub fn disable_filters(&self) {
        self.shared.filters_enabled.store(false, Ordering::Relaxed);
        self.shared.request_render();
    }

    /// Returns the new state
    pub fn toggle_filters(&self) -> bool {
        let enabled = !self.shared.filters_enabled.fetch_xor(true, Ordering::Relaxed);
        self.shared.request_render();
        enabled
    }

    pub fn filters_enabled(&self) -> bool {
        self.shared.filters_enabled.load(Ordering::Relaxed)
    }

    /// Save the next raw camera frame as `<folder>/<filename>.jpg`
    pub fn request_frame_capture(&self, folder: &str, filename: &str) {
        if let Some(session) = lock(&self.shared.session).as_ref() {
            session.request_frame_capture(folder, filename);
        }
    }

    /// Save the next rendered frame as a timestamped PNG
    pub fn request_display_capture(&self, folder: &str, prefix: &str) {
        *lock(&self.shared.display_capture) = Some((folder.to_string(), prefix.to_string()));
        self.shared.request_render();
    }

    pub fn request_auto_focus(&self) {
        if let Some(session) = lock(&self.shared.session).as_ref() {
            session.request_auto_focus();
        }
    }

    pub fn request_face_detection(&self, listener: FaceDetectionListener) {
        if let Some(session) = lock(&self.shared.session).as_ref() {
            session.start_face_detection(listener);
        }
    }

    /// Receive every rendered frame as top-down ARGB pixels
    pub fn set_frame_consumer(&self, consumer: Option<FrameConsumer>) {
        self.shared.consumer.set(consumer);
    }

    pub fn camera_state(&self) -> Option<SessionState> {
        lock(&self.shared.session).as_ref().map(CameraSession::state)
    }

    pub fn wait_for_camera(&self, timeout: Duration) -> CameraResult<PreviewInfo> {
        match lock(&self.shared.session).as_ref() {
            Some(session) => session.wait_until_running(timeout),
            None => Err(crate::errors::CameraError::Disposed),
        }
    }

    /// Paths written by display captures so far
    pub fn saved_captures(&self) -> Vec<PathBuf> {
        lock(&self.shared.saved).clone()
    }
}

/// Size-dependent render targets
struct Targets {
    size: (u32, u32),
    capture: FrameBuffer,
    filters: Vec<FilterStage>,
    readback: Option<FrameReadback>,
}

impl Targets {
    fn create(
        gl: &dyn GpuContext,
        slots: &TextureSlots,
        width: u32,
        height: u32,
        consumer: Option<ConsumerSlot>,
    ) -> GpuResult<Self> {
        let mut capture = FrameBuffer::new(gl, slots, width, height)?;
        let mut filters = Vec::with_capacity(FilterKind::CHAIN.len());
        for kind in FilterKind::CHAIN {
            match FilterStage::builtin(gl, slots, kind, width, height) {
                Ok(stage) => filters.push(stage),
                Err(e) => {
                    filters.iter_mut().for_each(|stage| stage.dispose(gl));
                    capture.dispose(gl);
                    return Err(e);
                }
            }
        }
        let readback = consumer.and_then(|consumer| {
            FrameReadback::start(width, height, consumer)
                .inspect_err(|e| warn!(error = %e, "Frame readback unavailable"))
                .ok()
        });
        debug!(width, height, stages = filters.len(), "Created view targets");
        Ok(Self {
            size: (width, height),
            capture,
            filters,
            readback,
        })
    }

    fn dispose(&mut self, gl: &dyn GpuContext) {
        if let Some(mut readback) = self.readback.take() {
            readback.dispose();
        }
        for stage in &mut self.filters {
            stage.dispose(gl);
        }
        self.filters.clear();
        self.capture.dispose(gl);
    }
}

/// Renders the camera feed; runs on the render thread
pub struct CameraView {
    options: ViewOptions,
    shared: Arc<ViewShared>,
    writer: Arc<dyn FrameWriter>,
    slots: TextureSlots,
    scene: SceneRenderer,
    camera_item: Option<DrawableId>,
    targets: Option<Targets>,
    viewport: (u32, u32),
}

impl CameraView {
    /// Open the camera and build a view for it
    ///
    /// Fails immediately when the camera index is invalid. GPU resources are
    /// created later, in [`Renderer::on_context_created`].
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        writer: Arc<dyn FrameWriter>,
        options: ViewOptions,
    ) -> CameraResult<(Self, CameraViewHandle)> {
        let session = CameraSession::open_with(
            provider,
            options.camera_index,
            Arc::clone(&writer),
            options.session,
        )?;
        if options.auto_focus {
            session.request_auto_focus();
        }

        let shared = Arc::new(ViewShared {
            filters_enabled: AtomicBool::new(options.filters_enabled),
            display_capture: Mutex::new(None),
            session: Mutex::new(Some(session)),
            requester: Mutex::new(None),
            consumer: ConsumerSlot::new(),
            saved: Mutex::new(Vec::new()),
        });

        let view = Self {
            options,
            shared: Arc::clone(&shared),
            writer,
            slots: TextureSlots::new(),
            scene: SceneRenderer::new(&[shaders::FRAGMENT_EXTERNAL_TEXTURE, shaders::VERTEX_TEXTURE]),
            camera_item: None,
            targets: None,
            viewport: (0, 0),
        };
        Ok((view, CameraViewHandle { shared }))
    }

    /// Run the captured frame through every stage but the last, which draws
    /// straight to the display
    fn render_filters(&mut self, gl: &dyn GpuContext) -> GpuResult<()> {
        let Some(targets) = self.targets.as_mut() else {
            return Ok(());
        };
        // Ends the capture pass; stages unbind their own targets
        targets.capture.unbind(gl);
        let Some((last, rest)) = targets.filters.split_last_mut() else {
            return Ok(());
        };
        let mut input = targets.capture.texture();
        for stage in rest {
            stage.process_texture(gl, input)?;
            input = stage.texture();
        }

        let (width, height) = self.viewport;
        gl.viewport(0, 0, width, height);
        let mut quad = Mesh::textured(
            &geometry::DEFAULT_COORDS,
            Texture::view(input, &geometry::DEFAULT_TEX_COORDS),
        );
        last.draw_to(gl, &mut quad, true)
    }

    fn save_display_capture(&self, gl: &dyn GpuContext) {
        let Some((folder, prefix)) = lock(&self.shared.display_capture).take() else {
            return;
        };
        let (width, height) = self.viewport;
        let image = match readback::read_image(gl, width, height) {
            Ok(Some(image)) => image,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Display capture read failed");
                return;
            }
        };
        let filename = format!("{prefix}{}", storage::timestamp_suffix(Local::now()));
        match self
            .writer
            .save_rendered_frame(&image, &folder, &filename, true)
        {
            Ok(path) => {
                info!(path = %path.display(), "Saved display capture");
                lock(&self.shared.saved).push(path);
            }
            Err(e) => warn!(error = %e, "Display capture failed"),
        }
    }
}

impl Renderer for CameraView {
    fn on_context_created(
        &mut self,
        gl: &dyn GpuContext,
        requester: &RenderRequester,
    ) -> GpuResult<()> {
        self.scene.on_context_created(gl)?;

        let mesh = Mesh::external(gl, &self.slots)?;
        if let Some(texture) = mesh.external_texture() {
            let frame_requester = requester.clone();
            texture.set_on_frame_available(Some(Box::new(move || {
                frame_requester.request_render()
            })));
            if let Some(session) = lock(&self.shared.session).as_ref() {
                session.set_preview_texture(Some(texture.sink()));
            }
        }
        match self.scene.handle().add(SceneItem::Mesh(mesh)) {
            Ok(id) => self.camera_item = Some(id),
            Err(mut item) => item.dispose(gl),
        }

        *lock(&self.shared.requester) = Some(requester.clone());
        info!("Camera view ready");
        Ok(())
    }

    fn on_surface_changed(&mut self, gl: &dyn GpuContext, width: u32, height: u32) {
        self.viewport = (width, height);
        self.scene.on_surface_changed(gl, width, height);
        if self.targets.as_ref().is_some_and(|t| t.size == (width, height)) {
            return;
        }
        if let Some(mut old) = self.targets.take() {
            old.dispose(gl);
        }
        if width == 0 || height == 0 {
            return;
        }
        let consumer = self
            .options
            .frame_readback
            .then(|| self.shared.consumer.clone());
        match Targets::create(gl, &self.slots, width, height, consumer) {
            Ok(targets) => self.targets = Some(targets),
            Err(e) => warn!(error = %e, width, height, "Filters unavailable at this size"),
        }
    }

    fn on_draw_frame(&mut self, gl: &dyn GpuContext) -> GpuResult<()> {
        if self.scene.handle().is_disposing() {
            return Ok(());
        }
        let filters = self.shared.filters_enabled.load(Ordering::Relaxed) && self.targets.is_some();
        let (width, height) = self.viewport;
        gl.viewport(0, 0, width, height);

        if filters && let Some(targets) = self.targets.as_mut() {
            targets.capture.bind(gl);
            targets.capture.clear(gl);
        }

        let drawn = self.scene.on_draw_frame(gl);
        let filtered = if filters {
            self.render_filters(gl)
        } else {
            Ok(())
        };
        if let Some(targets) = self.targets.as_mut() {
            targets.capture.unbind(gl);
        }
        drawn?;
        filtered?;

        self.save_display_capture(gl);
        if let Some(readback) = self.targets.as_ref().and_then(|t| t.readback.as_ref()) {
            readback.capture(gl)?;
        }
        Ok(())
    }

    fn on_dispose(&mut self, gl: &dyn GpuContext) {
        self.scene.dispose(gl);
        self.camera_item = None;
        *lock(&self.shared.requester) = None;

        if let Some(mut session) = lock(&self.shared.session).take() {
            session.dispose();
        }

        if let Some(mut targets) = self.targets.take() {
            targets.dispose(gl);
        }
        info!("Camera view disposed");
    }
}
