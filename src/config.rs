// SPDX-License-Identifier: GPL-3.0-only

use crate::camera::{Facing, VirtualCameraConfig};
use crate::constants::{self, camera, capture};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// File name inside the configuration directory
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera to open; `None` picks the first camera facing `facing`
    pub camera_index: Option<i32>,
    /// Preferred camera direction
    pub facing: Facing,
    /// Start with the edge-detection filter chain enabled
    pub filters_enabled: bool,
    /// Start periodic auto-focus as soon as the camera runs
    pub auto_focus: bool,
    /// Milliseconds between auto-focus attempts
    pub auto_focus_interval_ms: u64,
    /// Hand rendered frames to the frame consumer
    pub frame_readback: bool,
    /// Root directory for captures; `None` uses the pictures directory
    pub capture_root: Option<PathBuf>,
    /// Folder below the root that captures are written to
    pub capture_folder: String,
    /// Render surface size
    pub display_width: u32,
    pub display_height: u32,
    /// Synthetic cameras used when no hardware backend is present
    pub virtual_camera: VirtualCameraConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_index: None,
            facing: Facing::Back,
            filters_enabled: false,
            auto_focus: true,
            auto_focus_interval_ms: camera::AUTO_FOCUS_INTERVAL.as_millis() as u64,
            frame_readback: true,
            capture_root: None,
            capture_folder: capture::DEFAULT_FOLDER.to_string(),
            display_width: 640,
            display_height: 480,
            virtual_camera: VirtualCameraConfig::default(),
        }
    }
}

impl Config {
    /// `<config dir>/glcamera/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(constants::APP_ID).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn auto_focus_interval(&self) -> Duration {
        Duration::from_millis(self.auto_focus_interval_ms.max(1))
    }

    /// Directory that capture folders are created in
    pub fn capture_root(&self) -> PathBuf {
        self.capture_root.clone().unwrap_or_else(|| {
            dirs::picture_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        })
    }
}
