// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the render pipeline and the camera view

mod common;

use common::wait_for;
use glcamera::camera::{PreviewFormat, VirtualCameraConfig, VirtualCameraProvider};
use glcamera::constants::geometry;
use glcamera::errors::{CameraError, GpuError};
use glcamera::gpu::kernels::{self, Fragment};
use glcamera::gpu::{GpuStats, TextureSlots};
use glcamera::scene::{
    DepthAttachment, FilterStage, FrameBuffer, FrameBufferDesc, Mesh, SceneItem,
    SceneRenderer, Texture,
};
use glcamera::{
    CameraView, FilterKind, ImageFileWriter, RenderMode, RenderThread, SoftwareGpu, ViewOptions,
    shaders,
};
use image::{Rgba, RgbaImage};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Left half black, right half white
fn step_image(size: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, _| {
        if x < size / 2 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    })
}

fn run_chain(gl: &SoftwareGpu, input: &Texture, kinds: &[FilterKind]) -> Vec<u8> {
    let slots = TextureSlots::new();
    let (w, h) = input.size();
    let mut stages: Vec<FilterStage> = kinds
        .iter()
        .map(|kind| FilterStage::builtin(gl, &slots, *kind, w, h).unwrap())
        .collect();

    let mut source = Texture::view(input, input.tex_coords());
    for stage in &mut stages {
        stage.process_texture(gl, &source).unwrap();
        source = Texture::view(stage.texture(), stage.texture().tex_coords());
    }
    let out = gl.texture_pixels(source.handle()).unwrap();
    stages.iter_mut().for_each(|stage| stage.dispose(gl));
    out
}

#[test]
fn test_filter_chain_order_matters() {
    let gl = SoftwareGpu::new(8, 8);
    let slots = TextureSlots::new();
    let mut input =
        Texture::from_image(&gl, &slots, &step_image(8), &geometry::DEFAULT_TEX_COORDS).unwrap();

    let forward = run_chain(&gl, &input, &FilterKind::CHAIN);
    let mut reversed_kinds = FilterKind::CHAIN;
    reversed_kinds.reverse();
    let reversed = run_chain(&gl, &input, &reversed_kinds);

    assert_ne!(forward, reversed);
    // Edge direction last leaves blue empty; blur last does not
    assert!(forward.chunks_exact(4).all(|p| p[2] == 0));
    assert!(reversed.chunks_exact(4).any(|p| p[2] > 0));

    input.dispose(&gl);
    assert_eq!(gl.live_objects(), 0);
}

#[test]
fn test_flat_input_has_no_edges() {
    let gl = SoftwareGpu::new(4, 4);
    let slots = TextureSlots::new();
    let image = RgbaImage::from_pixel(4, 4, Rgba([90, 90, 90, 255]));
    let mut input =
        Texture::from_image(&gl, &slots, &image, &geometry::DEFAULT_TEX_COORDS).unwrap();
    let out = run_chain(&gl, &input, &[FilterKind::Sobel]);
    assert!(out.chunks_exact(4).all(|p| p[..3] == [0, 0, 0]));
    input.dispose(&gl);
}

#[test]
fn test_incomplete_framebuffer_leaves_nothing_alive() {
    let gl = SoftwareGpu::new(1, 1);
    let slots = TextureSlots::new();
    let desc = FrameBufferDesc::new(32, 32).with_depth(DepthAttachment::Sized(16, 32));
    let err = FrameBuffer::with_desc(&gl, &slots, desc).unwrap_err();
    assert!(matches!(err, GpuError::FramebufferIncomplete(_)));
    assert_eq!(gl.live_objects(), 0);
    assert_eq!(gl.stats().invalid_deletes, 0);
}

#[test]
fn test_handle_exhaustion_is_fatal_for_the_stage() {
    let gl = SoftwareGpu::new(4, 4).with_object_limit(4);
    let slots = TextureSlots::new();
    let err = FilterStage::builtin(&gl, &slots, FilterKind::Blur, 4, 4).unwrap_err();
    assert!(matches!(err, GpuError::HandleAllocation(_)));
    assert_eq!(gl.live_objects(), 0);
}

const INVERT: &str = "precision mediump float;
uniform sampler2D u_Texture;
varying vec2 v_TexCoord;
void main() {
    vec4 c = texture2D(u_Texture, v_TexCoord);
    gl_FragColor = vec4(1.0 - c.rgb, 1.0);
}
";

#[test]
fn test_custom_shader_without_kernel_fails_to_link() {
    let gl = SoftwareGpu::new(2, 2);
    let slots = TextureSlots::new();
    let err = FilterStage::new(&gl, &slots, "invert", 2, 2, shaders::VERTEX_TEXTURE, INVERT)
        .unwrap_err();
    assert!(matches!(err, GpuError::Link { .. }));
    assert_eq!(gl.live_objects(), 0);
}

#[test]
fn test_custom_shader_runs_its_kernel() {
    let gl = SoftwareGpu::new(2, 2).with_kernel(
        INVERT,
        Arc::new(|f: &Fragment<'_>| {
            let c = kernels::texture(f);
            [1.0 - c[0], 1.0 - c[1], 1.0 - c[2], 1.0]
        }),
    );
    let slots = TextureSlots::new();
    let image = RgbaImage::from_pixel(2, 2, Rgba([200, 10, 10, 255]));
    let mut input =
        Texture::from_image(&gl, &slots, &image, &geometry::DEFAULT_TEX_COORDS).unwrap();
    let mut stage =
        FilterStage::new(&gl, &slots, "invert", 2, 2, shaders::VERTEX_TEXTURE, INVERT).unwrap();

    stage.process_texture(&gl, &input).unwrap();
    let out = gl.texture_pixels(stage.texture().handle()).unwrap();
    assert!(out.chunks_exact(4).all(|p| p == [55, 245, 245, 255]), "{out:?}");

    stage.dispose(&gl);
    input.dispose(&gl);
    assert_eq!(gl.live_objects(), 0);
}

#[test]
fn test_scene_dispose_releases_external_surface() {
    let gl = SoftwareGpu::new(2, 2);
    let slots = TextureSlots::new();
    let mut renderer =
        SceneRenderer::new(&[shaders::FRAGMENT_EXTERNAL_TEXTURE, shaders::VERTEX_TEXTURE]);
    renderer.on_context_created(&gl).unwrap();
    renderer.on_surface_changed(&gl, 2, 2);

    let mesh = Mesh::external(&gl, &slots).unwrap();
    let sink = mesh.external_texture().unwrap().sink();
    let scene = renderer.handle();
    scene.add(SceneItem::Mesh(mesh)).unwrap();

    assert!(sink.push_frame(2, 2, [0, 255, 0, 255].repeat(4)));
    renderer.on_draw_frame(&gl).unwrap();
    assert!(gl.display_pixels().chunks_exact(4).all(|p| p == [0, 255, 0, 255]));

    renderer.dispose(&gl);
    assert!(sink.is_released());
    assert!(!sink.push_frame(2, 2, vec![0; 16]));
    assert_eq!(gl.live_objects(), 0);
    assert_eq!(gl.stats().invalid_deletes, 0);
}

fn small_camera() -> Arc<VirtualCameraProvider> {
    Arc::new(VirtualCameraProvider::new(VirtualCameraConfig {
        count: 1,
        width: 8,
        height: 8,
        fps: 120,
        format: PreviewFormat::Nv21,
    }))
}

/// Software GPU on its own render thread; its stats are sent back
fn spawn_view(view: CameraView) -> (RenderThread, Arc<GpuStats>) {
    let (stats_tx, stats_rx) = mpsc::channel();
    let thread = RenderThread::spawn(
        "render-test",
        move || {
            let gl = SoftwareGpu::new(8, 8);
            let _ = stats_tx.send(gl.stats_handle());
            Ok((gl, (8, 8)))
        },
        view,
        RenderMode::WhenDirty,
    )
    .unwrap();
    let stats = stats_rx.recv().unwrap();
    (thread, stats)
}

#[test]
fn test_view_filters_and_captures_end_to_end() {
    let dir = TempDir::new().unwrap();
    let provider = small_camera();
    let writer = Arc::new(ImageFileWriter::new(dir.path()));
    let options = ViewOptions {
        filters_enabled: true,
        ..Default::default()
    };
    let (view, handle) = CameraView::new(provider.clone(), writer, options).unwrap();

    let last_frame: Arc<Mutex<Option<Vec<u32>>>> = Arc::new(Mutex::new(None));
    let consumer_frame = Arc::clone(&last_frame);
    handle.set_frame_consumer(Some(Box::new(move |pixels: &[u32], w, h| {
        assert_eq!(pixels.len(), (w * h) as usize);
        *consumer_frame.lock().unwrap() = Some(pixels.to_vec());
    })));

    let (thread, stats) = spawn_view(view);
    let preview = handle.wait_for_camera(Duration::from_secs(5)).unwrap();
    assert_eq!((preview.width, preview.height), (8, 8));

    // Filtered output ends in the edge-direction pass, which leaves blue empty
    assert!(wait_for(|| thread.frames_rendered() >= 3));
    assert!(wait_for(|| last_frame.lock().unwrap().is_some()));
    let filtered = last_frame.lock().unwrap().clone().unwrap();
    assert!(filtered.iter().all(|p| p & 0xFF == 0));

    // Unfiltered frames show the camera pattern, which has blue everywhere
    handle.disable_filters();
    assert!(!handle.filters_enabled());
    assert!(wait_for(|| {
        last_frame
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|frame| frame.iter().all(|p| p & 0xFF > 0))
    }));

    handle.request_display_capture("display", "view_");
    assert!(wait_for(|| !handle.saved_captures().is_empty()));
    let saved = handle.saved_captures()[0].clone();
    assert!(saved.starts_with(dir.path().join("display")));
    assert_eq!(saved.extension().unwrap(), "png");
    assert_eq!(image::open(&saved).unwrap().to_rgba8().dimensions(), (8, 8));

    handle.request_frame_capture("raw", "shot");
    let raw = dir.path().join("raw").join("shot.jpg");
    assert!(wait_for(|| raw.exists()));

    assert!(handle.toggle_filters());
    thread.shutdown();

    assert!(!provider.is_open(0));
    assert!(handle.camera_state().is_none());
    assert_eq!(stats.snapshot().invalid_deletes, 0);
}

#[test]
fn test_view_rejects_invalid_camera_index() {
    let dir = TempDir::new().unwrap();
    let writer = Arc::new(ImageFileWriter::new(dir.path()));
    let options = ViewOptions {
        camera_index: 3,
        ..Default::default()
    };
    let result = CameraView::new(small_camera(), writer, options);
    assert!(matches!(
        result,
        Err(CameraError::InvalidIndex { index: 3, count: 1 })
    ));
}
