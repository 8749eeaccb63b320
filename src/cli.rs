// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Rendering frames headless, optionally filtered and captured
//! - Printing the configuration

use glcamera::camera::{self, CameraProvider, VirtualCameraProvider};
use glcamera::constants::camera::READY_TIMEOUT;
use clap::ValueEnum;
use glcamera::{
    CameraView, Config, GlowGpu, ImageFileWriter, RenderMode, RenderThread, SoftwareGpu,
    ViewOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How long to wait for the final display capture to land on disk
const CAPTURE_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// GPU context the render thread creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// OpenGL ES 2.0 through a headless EGL context
    Gl,
    /// CPU rasterizer
    Software,
}

/// Arguments of `glcamera run`
pub struct RunOptions {
    pub camera: Option<i32>,
    pub frames: u64,
    pub filters: bool,
    pub capture: Option<String>,
    pub display_capture: bool,
    pub output: Option<PathBuf>,
    pub backend: Backend,
}

pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn provider(config: &Config) -> Arc<VirtualCameraProvider> {
    Arc::new(VirtualCameraProvider::new(config.virtual_camera.clone()))
}

/// List all available cameras
pub fn list_cameras(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let provider = provider(config);
    let cameras = camera::camera_infos(provider.as_ref());

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    let format = &provider.config().format;
    println!("Available cameras:");
    println!();
    for info in &cameras {
        println!("  [{}] {}", info.index, info.name);
        println!(
            "      Facing: {}, orientation {}°, preview {}x{} {}",
            info.facing,
            info.orientation,
            provider.config().width,
            provider.config().height,
            format
        );
        println!();
    }

    Ok(())
}

/// Render `frames` frames through the selected backend
pub fn run(config: &Config, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let provider = provider(config);
    let camera_index = options.camera.or(config.camera_index).unwrap_or_else(|| {
        camera::first_facing(provider.as_ref(), config.facing) as i32
    });
    let root = options.output.unwrap_or_else(|| config.capture_root());
    let writer = Arc::new(ImageFileWriter::new(&root));

    let view_options = ViewOptions {
        camera_index,
        filters_enabled: options.filters || config.filters_enabled,
        auto_focus: config.auto_focus,
        frame_readback: config.frame_readback,
        session: camera::session::SessionOptions {
            auto_focus_interval: config.auto_focus_interval(),
        },
    };
    let (view, handle) = CameraView::new(provider.clone(), writer, view_options)?;

    let readback_frames = Arc::new(AtomicU64::new(0));
    if config.frame_readback {
        let counter = Arc::clone(&readback_frames);
        handle.set_frame_consumer(Some(Box::new(move |_pixels: &[u32], _w, _h| {
            counter.fetch_add(1, Ordering::Relaxed);
        })));
    }

    let (width, height) = (config.display_width, config.display_height);
    let thread = match options.backend {
        Backend::Gl => RenderThread::spawn(
            "render",
            move || Ok((GlowGpu::headless(width, height)?, (width, height))),
            view,
            RenderMode::WhenDirty,
        )?,
        Backend::Software => RenderThread::spawn(
            "render",
            move || Ok((SoftwareGpu::new(width, height), (width, height))),
            view,
            RenderMode::WhenDirty,
        )?,
    };

    let preview = handle.wait_for_camera(READY_TIMEOUT)?;
    if let Some(info) = provider.camera_info(camera_index as usize) {
        println!("Using camera: {}", info.name);
    }
    println!(
        "Preview: {}x{} {}, filters {}",
        preview.width,
        preview.height,
        preview.format,
        if handle.filters_enabled() { "on" } else { "off" }
    );

    if let Some(name) = options.capture.as_deref() {
        handle.request_frame_capture(&config.capture_folder, name);
        println!(
            "Raw capture: {}",
            root.join(&config.capture_folder).join(name).display()
        );
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Rendering {} frames... (press Ctrl+C to stop early)", options.frames);
    let start = Instant::now();
    while thread.frames_rendered() < options.frames {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        print!("\rFrames: {}", thread.frames_rendered());
        std::io::Write::flush(&mut std::io::stdout())?;
        std::thread::sleep(Duration::from_millis(50));
    }
    println!();

    if options.display_capture {
        handle.request_display_capture(&config.capture_folder, "display_");
        let deadline = Instant::now() + CAPTURE_SETTLE_TIMEOUT;
        while handle.saved_captures().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        match handle.saved_captures().last() {
            Some(path) => println!("Display capture saved: {}", path.display()),
            None => println!("Display capture did not complete"),
        }
    }

    let rendered = thread.frames_rendered();
    thread.shutdown();

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "Rendered {} frames in {:.1}s ({:.1} fps), {} read back",
        rendered,
        elapsed,
        rendered as f64 / elapsed.max(f64::EPSILON),
        readback_frames.load(Ordering::Relaxed)
    );

    Ok(())
}

/// Print the effective configuration
pub fn print_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
