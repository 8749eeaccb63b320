// SPDX-License-Identifier: GPL-3.0-only

//! glcamera - camera preview rendered through a GLSL filter pipeline
//!
//! This library provides the pieces of a GPU camera pipeline: GPU resources
//! behind a context trait, a scene renderer, a filter chain, a camera session
//! running on its own thread, frame readback and capture persistence.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`gpu`]: Context abstraction, the glow backend and the software rasterizer
//! - [`scene`]: Programs, textures, framebuffers, meshes, filters, render loop
//! - [`shaders`]: Bundled GLSL sources
//! - [`camera`]: Device abstraction, session thread, auto-focus, virtual camera
//! - [`readback`]: Rendered-frame readback on a worker thread
//! - [`storage`]: Saving captured frames
//! - [`view`]: The camera view tying everything together
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let provider = Arc::new(VirtualCameraProvider::new(Default::default()));
//! let writer = Arc::new(ImageFileWriter::new("/tmp"));
//! let (view, handle) = CameraView::new(provider, writer, ViewOptions::default())?;
//! let thread = RenderThread::spawn(
//!     "render",
//!     || Ok((SoftwareGpu::new(640, 480), (640, 480))),
//!     view,
//!     RenderMode::WhenDirty,
//! )?;
//! handle.enable_filters();
//! ```

pub mod camera;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod readback;
pub mod scene;
pub mod shaders;
pub mod storage;
pub mod view;

// Re-export commonly used types
pub use camera::{CameraSession, SessionState, VirtualCameraProvider};
pub use config::Config;
pub use errors::{AppError, AppResult, CameraError, CaptureError, ConfigError, GpuError};
pub use gpu::{GlowGpu, GpuContext, SoftwareGpu};
pub use scene::{RenderMode, RenderThread, Renderer};
pub use shaders::FilterKind;
pub use storage::{FrameWriter, ImageFileWriter};
pub use view::{CameraView, CameraViewHandle, ViewOptions};
