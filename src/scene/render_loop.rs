// SPDX-License-Identifier: GPL-3.0-only
//! Render thread hosting a GPU context
//!
//! The context is created by a factory closure on the render thread itself
//! and never leaves it. The thread owns the [`Renderer`] as well: context
//! creation, resizes, frames and final disposal all run there, so every GPU
//! handle is created and deleted on the thread its context is current on.
//!
//! Initialization is reported back through a sync channel before
//! [`RenderThread::spawn`] returns, the same way the camera capture thread
//! reports device setup.

use crate::errors::{GpuError, GpuResult};
use crate::gpu::GpuContext;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Frame period used in [`RenderMode::Continuously`]
const CONTINUOUS_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// When the render thread draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Draw at a fixed cadence
    Continuously,
    /// Draw only after [`RenderRequester::request_render`]
    WhenDirty,
}

/// Callbacks invoked on the render thread
pub trait Renderer: Send + 'static {
    /// The context is current; create GPU resources here
    fn on_context_created(
        &mut self,
        gl: &dyn GpuContext,
        requester: &RenderRequester,
    ) -> GpuResult<()>;

    fn on_surface_changed(&mut self, gl: &dyn GpuContext, width: u32, height: u32);

    fn on_draw_frame(&mut self, gl: &dyn GpuContext) -> GpuResult<()>;

    /// Last call before the context is destroyed
    fn on_dispose(&mut self, gl: &dyn GpuContext);
}

type GpuTask = Box<dyn FnOnce(&dyn GpuContext) + Send>;

enum RenderMessage {
    Render,
    Resize(u32, u32),
    SetMode(RenderMode),
    Run(GpuTask),
    Exit,
}

/// Cloneable handle for requesting frames from any thread
#[derive(Clone)]
pub struct RenderRequester {
    sender: Sender<RenderMessage>,
}

impl RenderRequester {
    /// Schedule a frame; ignored once the render thread has exited
    pub fn request_render(&self) {
        let _ = self.sender.send(RenderMessage::Render);
    }
}

/// Handle to a running render thread
pub struct RenderThread {
    sender: Sender<RenderMessage>,
    handle: Option<JoinHandle<()>>,
    frames: Arc<AtomicU64>,
}

impl RenderThread {
    /// Start the thread, create the context and run `on_context_created`
    ///
    /// `factory` returns the context and the initial surface size.
    pub fn spawn<G, F, R>(
        name: &str,
        factory: F,
        renderer: R,
        mode: RenderMode,
    ) -> GpuResult<Self>
    where
        G: GpuContext + 'static,
        F: FnOnce() -> GpuResult<(G, (u32, u32))> + Send + 'static,
        R: Renderer,
    {
        let (sender, receiver) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::sync_channel::<GpuResult<()>>(1);
        let frames = Arc::new(AtomicU64::new(0));
        let requester = RenderRequester {
            sender: sender.clone(),
        };
        let frames_thread = Arc::clone(&frames);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                render_thread_main(
                    &thread_name,
                    factory,
                    renderer,
                    mode,
                    requester,
                    receiver,
                    init_tx,
                    frames_thread,
                );
            })
            .map_err(|e| GpuError::ContextCreation(e.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(())) => {
                info!(name, ?mode, "Render thread running");
                Ok(Self {
                    sender,
                    handle: Some(handle),
                    frames,
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(GpuError::ContextCreation(
                    "render thread exited during initialization".to_string(),
                ))
            }
        }
    }

    pub fn requester(&self) -> RenderRequester {
        RenderRequester {
            sender: self.sender.clone(),
        }
    }

    pub fn request_render(&self) {
        let _ = self.sender.send(RenderMessage::Render);
    }

    /// Surface size changed; the renderer sees it before the next frame
    pub fn resize(&self, width: u32, height: u32) {
        let _ = self.sender.send(RenderMessage::Resize(width, height));
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        let _ = self.sender.send(RenderMessage::SetMode(mode));
    }

    /// Run `task` on the render thread between frames
    pub fn queue_event(&self, task: impl FnOnce(&dyn GpuContext) + Send + 'static) {
        let _ = self.sender.send(RenderMessage::Run(Box::new(task)));
    }

    /// Run `f` on the render thread and wait for its result
    pub fn with_context<T: Send + 'static>(
        &self,
        f: impl FnOnce(&dyn GpuContext) -> T + Send + 'static,
    ) -> Option<T> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.queue_event(move |gl| {
            let _ = tx.send(f(gl));
        });
        rx.recv().ok()
    }

    /// Frames drawn so far
    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Dispose the renderer on the render thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(RenderMessage::Exit);
            if handle.join().is_err() {
                warn!("Render thread panicked");
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn render_thread_main<G, F, R>(
    name: &str,
    factory: F,
    mut renderer: R,
    mut mode: RenderMode,
    requester: RenderRequester,
    receiver: Receiver<RenderMessage>,
    init_tx: mpsc::SyncSender<GpuResult<()>>,
    frames: Arc<AtomicU64>,
) where
    G: GpuContext + 'static,
    F: FnOnce() -> GpuResult<(G, (u32, u32))>,
    R: Renderer,
{
    let (gl, (width, height)) = match factory() {
        Ok(created) => created,
        Err(e) => {
            error!(name, error = %e, "GPU context creation failed");
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    let gl: &dyn GpuContext = &gl;

    if let Err(e) = renderer.on_context_created(gl, &requester) {
        error!(name, error = %e, "Renderer initialization failed");
        renderer.on_dispose(gl);
        let _ = init_tx.send(Err(e));
        return;
    }
    renderer.on_surface_changed(gl, width, height);
    drop(requester);
    let _ = init_tx.send(Ok(()));

    debug!(name, width, height, "Render loop started");

    let draw = |renderer: &mut R| {
        if let Err(e) = renderer.on_draw_frame(gl) {
            warn!(name, error = %e, "Frame failed");
        }
        frames.fetch_add(1, Ordering::SeqCst);
    };

    'outer: loop {
        let message = match mode {
            RenderMode::WhenDirty => match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
            RenderMode::Continuously => match receiver.recv_timeout(CONTINUOUS_FRAME_INTERVAL) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => RenderMessage::Render,
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };

        // Coalesce everything already queued into at most one frame
        let mut dirty = false;
        let mut next = Some(message);
        while let Some(message) = next {
            match message {
                RenderMessage::Render => dirty = true,
                RenderMessage::Resize(w, h) => {
                    renderer.on_surface_changed(gl, w, h);
                    dirty = true;
                }
                RenderMessage::SetMode(new_mode) => {
                    debug!(name, ?new_mode, "Render mode changed");
                    mode = new_mode;
                }
                RenderMessage::Run(task) => {
                    // Tasks observe every frame requested before them
                    if dirty {
                        draw(&mut renderer);
                        dirty = false;
                    }
                    task(gl);
                }
                RenderMessage::Exit => break 'outer,
            }
            next = receiver.try_recv().ok();
        }

        if dirty {
            draw(&mut renderer);
        }
    }

    renderer.on_dispose(gl);
    info!(name, frames = frames.load(Ordering::SeqCst), "Render thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareGpu;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Renderer for Log {
        fn on_context_created(&mut self, _: &dyn GpuContext, _: &RenderRequester) -> GpuResult<()> {
            self.0.lock().unwrap().push("created".into());
            Ok(())
        }

        fn on_surface_changed(&mut self, _: &dyn GpuContext, width: u32, height: u32) {
            self.0.lock().unwrap().push(format!("size {width}x{height}"));
        }

        fn on_draw_frame(&mut self, _: &dyn GpuContext) -> GpuResult<()> {
            self.0.lock().unwrap().push("frame".into());
            Ok(())
        }

        fn on_dispose(&mut self, _: &dyn GpuContext) {
            self.0.lock().unwrap().push("dispose".into());
        }
    }

    #[test]
    fn lifecycle_runs_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let thread = RenderThread::spawn(
            "render-test",
            || Ok((SoftwareGpu::new(4, 2), (4, 2))),
            Log(Arc::clone(&events)),
            RenderMode::WhenDirty,
        )
        .unwrap();
        thread.request_render();
        // Runs after the frame above since messages are handled in order
        thread.with_context(|_| ()).unwrap();
        assert_eq!(thread.frames_rendered(), 1);
        thread.shutdown();
        assert_eq!(
            *events.lock().unwrap(),
            ["created", "size 4x2", "frame", "dispose"]
        );
    }

    #[test]
    fn factory_failure_is_reported() {
        let result = RenderThread::spawn(
            "render-test",
            || Err::<(SoftwareGpu, (u32, u32)), _>(GpuError::ContextCreation("no display".into())),
            Log::default(),
            RenderMode::WhenDirty,
        );
        assert!(matches!(result, Err(GpuError::ContextCreation(_))));
    }
}
