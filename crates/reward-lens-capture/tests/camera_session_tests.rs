//! Integration tests for exclusive camera stream handling.

use std::sync::Arc;

use reward_lens_capture::{CameraSession, CaptureError, Facing, SyntheticCamera};

#[test]
fn camera_session_tests_switch_releases_before_reacquiring() {
    let camera = Arc::new(SyntheticCamera::new(8, 4));
    let mut session = CameraSession::new(camera.clone(), Facing::Back);
    session.open().expect("camera should open");
    assert_eq!(camera.open_stream_count(), 1);

    // The synthetic device refuses a second concurrent stream, so this only
    // succeeds when the first stream is released first.
    let facing = session.switch_facing().expect("switch should succeed");
    assert_eq!(facing, Facing::Front);
    assert_eq!(camera.open_stream_count(), 1);
    assert_eq!(camera.acquisition_count(), 2);

    let (_, mirrored) = session.capture(10).expect("frame should be readable");
    assert!(mirrored);
}

#[test]
fn camera_session_tests_drop_releases_stream() {
    let camera = Arc::new(SyntheticCamera::new(8, 4));
    {
        let mut session = CameraSession::new(camera.clone(), Facing::Back);
        session.open().expect("camera should open");
        assert_eq!(camera.open_stream_count(), 1);
    }
    assert_eq!(camera.open_stream_count(), 0);
}

#[test]
fn camera_session_tests_unavailable_camera_surfaces_error() {
    let camera = Arc::new(SyntheticCamera::new(8, 4));
    camera.set_available(false);
    let mut session = CameraSession::new(camera.clone(), Facing::Back);

    assert!(matches!(session.open(), Err(CaptureError::CameraUnavailable(_))));
    assert!(!session.is_open());
    assert!(matches!(session.capture(1), Err(CaptureError::NotAcquired)));
}

#[test]
fn camera_session_tests_warmup_frames_are_empty() {
    let camera = Arc::new(SyntheticCamera::new(8, 4).with_warmup(1));
    let mut session = CameraSession::new(camera, Facing::Back);
    session.open().expect("camera should open");

    let (first, _) = session.capture(1).expect("frame");
    assert!(!first.is_ready());
    let (second, _) = session.capture(2).expect("frame");
    assert!(second.is_ready());
    assert_eq!(second.rgba.len(), 8 * 4 * 4);
}
