// SPDX-License-Identifier: GPL-3.0-only

//! Camera device abstraction and the threaded session built on it
//!
//! ```text
//! ┌────────────────┐  open(index, FrameSink)  ┌────────────────┐
//! │ CameraSession  │ ───────────────────────▶ │ CameraProvider │
//! │ (own thread)   │                          └────────────────┘
//! └───────┬────────┘                                  │
//!         │ owns                                      ▼
//!         ▼                                   Box<dyn CameraDevice>
//! ┌────────────────┐  preview buffers  ┌──────────────────────────┐
//! │ AutoFocusLoop  │ ◀── FocusControl  │ FrameSink → session chan │
//! └────────────────┘                   └──────────────────────────┘
//! ```
//!
//! The device is only touched from the session thread. The auto-focus loop
//! goes through the [`FocusControl`] handle, which implementations must make
//! safe to call concurrently with device reconfiguration.

pub mod autofocus;
pub mod formats;
pub mod session;
pub mod virtual_camera;

pub use autofocus::AutoFocusLoop;
pub use formats::PreviewFormat;
pub use session::{CameraSession, PreviewInfo, SessionState};
pub use virtual_camera::{VirtualCameraConfig, VirtualCameraProvider};

use crate::errors::CameraResult;
use crate::scene::SurfaceSink;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Direction a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    Back,
    Front,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

/// Static description of one camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub index: usize,
    pub name: String,
    pub facing: Facing,
    /// Clockwise sensor rotation in degrees (0, 90, 180 or 270)
    pub orientation: u32,
}

/// Mutable device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraParameters {
    pub preview_width: u32,
    pub preview_height: u32,
    pub preview_format: PreviewFormat,
    /// Favor a steady preview frame rate over still quality
    pub recording_hint: bool,
}

impl CameraParameters {
    /// Bytes needed for one preview callback buffer
    pub fn preview_buffer_size(&self) -> usize {
        self.preview_format
            .buffer_size(self.preview_width, self.preview_height)
    }
}

/// A detected face in preview coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    /// Confidence, 1..=100
    pub score: u8,
}

pub type FaceDetectionListener = Arc<dyn Fn(&[Face]) + Send + Sync>;

/// Receives the outcome of each auto-focus attempt
pub type AutoFocusCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Called once per delivered preview buffer with the raw bytes
pub type PreviewCallback = Arc<dyn Fn(&[u8], &PreviewInfo) + Send + Sync>;

/// Called once the device is open and previewing
pub type AvailabilityListener = Box<dyn FnOnce(&CameraInfo) + Send>;

/// Where a device delivers filled preview buffers
///
/// A `None` payload models a callback with no data, which receivers skip.
#[derive(Clone)]
pub struct FrameSink {
    deliver: Arc<dyn Fn(Option<Vec<u8>>) -> bool + Send + Sync>,
}

impl FrameSink {
    pub fn new(deliver: impl Fn(Option<Vec<u8>>) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Hand a buffer to the receiver; false once nobody is listening
    pub fn deliver(&self, buffer: Option<Vec<u8>>) -> bool {
        (self.deliver)(buffer)
    }
}

impl fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSink").finish_non_exhaustive()
    }
}

/// Focus commands that may be issued from outside the session thread
pub trait FocusControl: Send + Sync {
    /// Start one focus attempt; `done` runs with the result, possibly on
    /// another thread
    fn auto_focus(&self, done: Box<dyn FnOnce(bool) + Send>);

    fn cancel_auto_focus(&self);
}

/// An opened camera
pub trait CameraDevice {
    fn parameters(&self) -> CameraParameters;

    fn set_parameters(&mut self, parameters: &CameraParameters) -> CameraResult<()>;

    /// Route preview frames to a surface, or detach with `None`
    fn set_preview_texture(&mut self, surface: Option<SurfaceSink>) -> CameraResult<()>;

    /// Deliver frames to the [`FrameSink`] using buffers from the pool
    fn set_preview_callback_with_buffer(&mut self, enabled: bool);

    /// Return a buffer to the pool
    fn add_callback_buffer(&mut self, buffer: Vec<u8>);

    fn start_preview(&mut self) -> CameraResult<()>;

    fn stop_preview(&mut self);

    fn focus_control(&self) -> Arc<dyn FocusControl>;

    fn start_face_detection(&mut self, listener: FaceDetectionListener) -> CameraResult<()>;

    /// Close the device; nothing may be called afterwards
    fn release(&mut self);
}

/// Enumerates and opens cameras
pub trait CameraProvider: Send + Sync {
    fn camera_count(&self) -> usize;

    fn camera_info(&self, index: usize) -> Option<CameraInfo>;

    /// Open a camera; fails with [`crate::errors::CameraError::Busy`] when it
    /// is already open
    fn open(&self, index: usize, frames: FrameSink) -> CameraResult<Box<dyn CameraDevice>>;
}

/// Info for every camera the provider knows about
pub fn camera_infos(provider: &dyn CameraProvider) -> Vec<CameraInfo> {
    (0..provider.camera_count())
        .filter_map(|index| provider.camera_info(index))
        .collect()
}

/// Index of the first camera facing `facing`, or 0 when there is none
pub fn first_facing(provider: &dyn CameraProvider, facing: Facing) -> usize {
    camera_infos(provider)
        .iter()
        .find(|info| info.facing == facing)
        .map(|info| info.index)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_facing_falls_back_to_zero() {
        let provider = VirtualCameraProvider::new(VirtualCameraConfig {
            count: 2,
            ..Default::default()
        });
        assert_eq!(first_facing(&provider, Facing::Front), 1);
        assert_eq!(first_facing(&provider, Facing::Back), 0);

        let single = VirtualCameraProvider::new(VirtualCameraConfig {
            count: 1,
            ..Default::default()
        });
        assert_eq!(first_facing(&single, Facing::Front), 0);
    }

    #[test]
    fn frame_sink_reports_delivery() {
        let sink = FrameSink::new(|buffer| buffer.is_some());
        assert!(sink.deliver(Some(vec![1])));
        assert!(!sink.deliver(None));
    }
}
