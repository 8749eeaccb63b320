// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the camera session thread

mod common;

use common::{Call, PREVIEW_HEIGHT, PREVIEW_WIDTH, RecordingProvider, wait_for};
use glcamera::camera::session::SessionOptions;
use glcamera::camera::{
    CameraSession, Face, FaceDetectionListener, PreviewCallback, PreviewFormat, SessionState,
    VirtualCameraConfig, VirtualCameraProvider,
};
use glcamera::errors::CameraError;
use glcamera::scene::VideoSurface;
use glcamera::{FrameWriter, ImageFileWriter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn writer(dir: &TempDir) -> Arc<dyn FrameWriter> {
    Arc::new(ImageFileWriter::new(dir.path()))
}

/// Block until every request sent before this call has been handled
fn sync(session: &CameraSession) {
    let (tx, rx) = mpsc::channel();
    session.set_availability_listener(Box::new(move |_| {
        let _ = tx.send(());
    }));
    rx.recv_timeout(TIMEOUT).expect("session did not answer");
}

#[test]
fn test_pending_requests_replay_exactly_once() {
    let dir = TempDir::new().unwrap();
    let (provider, gate) = RecordingProvider::gated(1);
    let session = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();

    let surface = VideoSurface::new(1);
    let callback: PreviewCallback = Arc::new(|_, _| {});
    let faces: FaceDetectionListener = Arc::new(|_| {});

    // Queued while the device is still being opened
    for _ in 0..2 {
        session.set_preview_texture(Some(surface.sink()));
        session.set_preview_callback(Some(Arc::clone(&callback)));
        session.start_face_detection(Arc::clone(&faces));
    }
    assert!(matches!(
        session.state(),
        SessionState::Unopened | SessionState::Configuring
    ));
    gate.release();

    let info = session.wait_until_running(TIMEOUT).unwrap();
    assert_eq!((info.width, info.height), (PREVIEW_WIDTH, PREVIEW_HEIGHT));
    sync(&session);

    let texture = Call::SetPreviewTexture(Some(surface.id()));
    assert_eq!(provider.count_of(&texture), 1);
    assert_eq!(provider.count_of(&Call::SetCallbackWithBuffer(true)), 1);
    assert_eq!(provider.count_of(&Call::StartFaceDetection), 1);
    assert_eq!(
        provider.count_matching(|c| matches!(c, Call::AddCallbackBuffer(_))),
        4
    );

    let calls = provider.calls();
    let position = |call: &Call| calls.iter().position(|c| c == call).unwrap();
    assert!(position(&texture) < position(&Call::StartPreview));
    assert!(position(&Call::SetCallbackWithBuffer(true)) < position(&Call::StartPreview));
    assert!(position(&Call::StartPreview) < position(&Call::StartFaceDetection));

    // Reissuing the same requests is a no-op
    let before = provider.calls().len();
    session.set_preview_texture(Some(surface.sink()));
    session.set_preview_callback(Some(Arc::clone(&callback)));
    session.start_face_detection(faces);
    sync(&session);
    assert_eq!(provider.calls().len(), before);
}

#[test]
fn test_recording_hint_is_set_before_preview() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new(1);
    let session = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    session.wait_until_running(TIMEOUT).unwrap();

    let calls = provider.calls();
    assert_eq!(calls[0], Call::Open(0));
    assert_eq!(calls[1], Call::SetParameters { recording_hint: true });
    assert!(calls.contains(&Call::StartPreview));
}

#[test]
fn test_frame_capture_saves_next_frame_once() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new(1);
    let session = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    session.wait_until_running(TIMEOUT).unwrap();

    session.request_frame_capture("shots", "frame");
    sync(&session);
    assert!(provider.emit_frame(200));

    let path = dir.path().join("shots").join("frame.jpg");
    assert!(wait_for(|| path.exists()), "capture not written");

    // The one-shot callback is removed and the buffer goes back to the pool
    assert!(wait_for(|| provider.count_of(&Call::SetCallbackWithBuffer(false)) == 1));
    assert!(wait_for(|| provider.pool_size() == 4));
    assert!(!provider.emit_frame(10));
}

#[test]
fn test_preview_callback_sees_every_frame() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new(1);
    let session = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    session.wait_until_running(TIMEOUT).unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_cb = Arc::clone(&seen);
    session.set_preview_callback(Some(Arc::new(move |data, info| {
        assert_eq!(data.len(), info.buffer_size());
        assert_eq!(info.format, PreviewFormat::Rgba);
        seen_cb.fetch_add(1, Ordering::SeqCst);
    })));
    sync(&session);

    for value in 0..3 {
        assert!(provider.emit_frame(value));
        assert!(wait_for(|| provider.pool_size() == 4));
    }
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    session.set_preview_callback(None);
    sync(&session);
    assert_eq!(provider.count_of(&Call::SetCallbackWithBuffer(false)), 1);
}

#[test]
fn test_face_detection_listener_is_forwarded() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new(1);
    let session = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    session.wait_until_running(TIMEOUT).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    session.start_face_detection(Arc::new(move |faces: &[Face]| {
        let _ = tx.lock().unwrap().send(faces.len());
    }));
    sync(&session);

    let face = Face {
        left: -10,
        top: -10,
        right: 10,
        bottom: 10,
        score: 90,
    };
    assert!(provider.emit_faces(&[face, face]));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 2);
}

#[test]
fn test_dispose_releases_in_order() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new(1);
    let mut session = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    let surface = VideoSurface::new(1);
    session.set_preview_texture(Some(surface.sink()));
    session.wait_until_running(TIMEOUT).unwrap();

    session.dispose();
    assert_eq!(session.state(), SessionState::Disposed);

    let calls = provider.calls();
    let tail = &calls[calls.len() - 4..];
    assert_eq!(
        tail,
        &[
            Call::StopPreview,
            Call::SetPreviewTexture(None),
            Call::SetCallbackWithBuffer(false),
            Call::Release,
        ]
    );

    // Second dispose does nothing
    session.dispose();
    assert_eq!(provider.count_of(&Call::Release), 1);
}

#[test]
fn test_auto_focus_requested_while_opening_runs_one_loop() {
    let dir = TempDir::new().unwrap();
    let (provider, gate) = RecordingProvider::gated(1);
    let options = SessionOptions {
        auto_focus_interval: Duration::from_millis(10),
    };
    let mut session = CameraSession::open_with(provider.clone(), 0, writer(&dir), options).unwrap();

    session.request_auto_focus();
    session.request_auto_focus();
    gate.release();
    session.wait_until_running(TIMEOUT).unwrap();

    assert!(wait_for(|| provider.count_of(&Call::AutoFocus) >= 2));
    assert_eq!(provider.focus_threads(), 1);

    // Asking again while the loop runs keeps the same loop
    session.request_auto_focus();
    sync(&session);
    let seen = provider.count_of(&Call::AutoFocus);
    assert!(wait_for(|| provider.count_of(&Call::AutoFocus) >= seen + 2));
    assert_eq!(provider.focus_threads(), 1);
    assert_eq!(provider.count_of(&Call::CancelAutoFocus), 0);

    session.dispose();
    let calls = provider.calls();
    let tail = &calls[calls.len() - 5..];
    assert_eq!(
        tail,
        &[
            Call::CancelAutoFocus,
            Call::StopPreview,
            Call::SetPreviewTexture(None),
            Call::SetCallbackWithBuffer(false),
            Call::Release,
        ]
    );
    assert_eq!(provider.count_of(&Call::CancelAutoFocus), 1);
}

#[test]
fn test_dispose_before_open_completes() {
    let dir = TempDir::new().unwrap();
    let (provider, gate) = RecordingProvider::gated(1);
    let mut session = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    session.set_preview_texture(Some(VideoSurface::new(1).sink()));

    // Dispose is queued behind the blocked open
    let dispose = std::thread::spawn(move || {
        session.dispose();
        session.state()
    });
    std::thread::sleep(Duration::from_millis(50));
    gate.release();

    assert_eq!(dispose.join().unwrap(), SessionState::Disposed);
    assert!(!provider.calls().contains(&Call::StartPreview));
    assert_eq!(provider.count_of(&Call::Release), 1);
}

#[test]
fn test_invalid_index_is_reported_synchronously() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new(2);
    let result = CameraSession::open(provider.clone(), 2, writer(&dir));
    assert!(matches!(
        result,
        Err(CameraError::InvalidIndex { index: 2, count: 2 })
    ));
    let result = CameraSession::open(provider.clone(), -1, writer(&dir));
    assert!(matches!(result, Err(CameraError::InvalidIndex { .. })));
    assert!(provider.calls().is_empty());
}

#[test]
fn test_no_cameras() {
    let dir = TempDir::new().unwrap();
    let provider = RecordingProvider::new(0);
    assert!(matches!(
        CameraSession::open(provider, 0, writer(&dir)),
        Err(CameraError::NoCameraFound)
    ));
}

#[test]
fn test_busy_camera_fails_the_second_session() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(VirtualCameraProvider::new(VirtualCameraConfig {
        width: 8,
        height: 8,
        ..Default::default()
    }));
    let first = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    first.wait_until_running(TIMEOUT).unwrap();

    let second = CameraSession::open(provider.clone(), 0, writer(&dir)).unwrap();
    assert!(matches!(
        second.wait_until_running(TIMEOUT),
        Err(CameraError::Busy)
    ));
    assert_eq!(second.state(), SessionState::Failed);
    drop(first);
    assert!(!provider.is_open(0));
}
