// SPDX-License-Identifier: MPL-2.0

//! Saving captured frames to disk
//!
//! Raw preview frames are converted from the device's preview format and
//! written as JPEG. Rendered frames are written as PNG or JPEG. Folders are
//! created on demand below a configurable root.

use crate::camera::PreviewFormat;
use crate::constants::capture;
use crate::errors::{CaptureError, CaptureResult};
use chrono::{DateTime, Local};
use image::{DynamicImage, RgbImage, RgbaImage};
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Persists captured frames
pub trait FrameWriter: Send + Sync {
    /// Save one raw preview buffer as a lossy image
    fn save_preview_frame(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        format: PreviewFormat,
        folder: &str,
        filename: &str,
    ) -> CaptureResult<PathBuf>;

    /// Save a rendered frame, PNG when `lossless`, JPEG otherwise
    fn save_rendered_frame(
        &self,
        image: &RgbaImage,
        folder: &str,
        filename: &str,
        lossless: bool,
    ) -> CaptureResult<PathBuf>;
}

/// Writes image files under a root directory
#[derive(Debug, Clone)]
pub struct ImageFileWriter {
    root: PathBuf,
}

impl ImageFileWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_folder(&self, folder: &str) -> CaptureResult<PathBuf> {
        if folder.is_empty() {
            return Err(CaptureError::InvalidRequest("empty folder".to_string()));
        }
        // Captures never leave the root
        if !Path::new(folder)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(CaptureError::InvalidRequest(format!(
                "folder {folder:?} is not a relative path"
            )));
        }
        let path = self.root.join(folder);
        if !path.exists() {
            fs::create_dir_all(&path).map_err(|e| {
                CaptureError::SaveFailed(format!("cannot create {}: {}", path.display(), e))
            })?;
            debug!(path = %path.display(), "Created capture folder");
        }
        Ok(path)
    }

    /// Write `bytes` to `<root>/<folder>/<filename>.<extension>`
    pub fn save_bytes(
        &self,
        bytes: &[u8],
        folder: &str,
        filename: &str,
        extension: &str,
    ) -> CaptureResult<PathBuf> {
        if bytes.is_empty() || filename.is_empty() {
            return Err(CaptureError::InvalidRequest(
                "empty data or filename".to_string(),
            ));
        }
        if Path::new(filename).file_name() != Some(OsStr::new(filename)) {
            return Err(CaptureError::InvalidRequest(format!(
                "filename {filename:?} is not a plain file name"
            )));
        }
        let path = self
            .ensure_folder(folder)?
            .join(format!("{filename}.{extension}"));
        fs::write(&path, bytes)?;
        info!(path = %path.display(), size = bytes.len(), "Saved capture");
        Ok(path)
    }

    /// Save with the local date and time appended to `prefix`
    pub fn save_image_with_timestamp(
        &self,
        image: &RgbaImage,
        folder: &str,
        prefix: &str,
        lossless: bool,
    ) -> CaptureResult<PathBuf> {
        let filename = format!("{prefix}{}", timestamp_suffix(Local::now()));
        self.save_rendered_frame(image, folder, &filename, lossless)
    }

    /// Save with a zero-padded index counting files that share `prefix`
    pub fn save_image_with_unique_suffix(
        &self,
        image: &RgbaImage,
        folder: &str,
        prefix: &str,
        lossless: bool,
    ) -> CaptureResult<PathBuf> {
        let dir = self.ensure_folder(folder)?;
        let index = fs::read_dir(&dir)?
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
            .count();
        let filename = format!("{prefix}{}", pad_index(index));
        self.save_rendered_frame(image, folder, &filename, lossless)
    }
}

impl FrameWriter for ImageFileWriter {
    fn save_preview_frame(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        format: PreviewFormat,
        folder: &str,
        filename: &str,
    ) -> CaptureResult<PathBuf> {
        if bytes.is_empty() || width < 1 || height < 1 {
            return Err(CaptureError::InvalidRequest(format!(
                "preview frame {width}x{height} with {} bytes",
                bytes.len()
            )));
        }
        let rgba = format.to_rgba(bytes, width, height).ok_or_else(|| {
            CaptureError::EncodingFailed(format!(
                "{format} buffer too short for {width}x{height}"
            ))
        })?;
        let image = RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| CaptureError::EncodingFailed("pixel buffer size".to_string()))?;
        let jpeg = encode_jpeg(&DynamicImage::ImageRgba8(image).to_rgb8(), capture::JPEG_QUALITY)?;
        self.save_bytes(&jpeg, folder, filename, capture::LOSSY_EXTENSION)
    }

    fn save_rendered_frame(
        &self,
        image: &RgbaImage,
        folder: &str,
        filename: &str,
        lossless: bool,
    ) -> CaptureResult<PathBuf> {
        if image.width() == 0 || image.height() == 0 {
            return Err(CaptureError::InvalidRequest("empty image".to_string()));
        }
        let (bytes, extension) = if lossless {
            let mut buffer = Vec::new();
            image.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
            (buffer, capture::LOSSLESS_EXTENSION)
        } else {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            (encode_jpeg(&rgb, capture::JPEG_QUALITY)?, capture::LOSSY_EXTENSION)
        };
        self.save_bytes(&bytes, folder, filename, extension)
    }
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> CaptureResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
    encoder.encode(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

/// Filename-safe timestamp, e.g. `20240131_235959`
pub fn timestamp_suffix(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Zero-pad `index` to the unique suffix width
pub fn pad_index(index: usize) -> String {
    format!("{index:0width$}", width = capture::UNIQUE_SUFFIX_WIDTH)
}
