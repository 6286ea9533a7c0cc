//! Frame grabber thread lifecycle and bounded acquisition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use titrator_core::FrameGrabber;
use titrator_core::mocks::NoopCamera;
use titrator_traits::{Frame, FrameSource, MonotonicClock, SeamError};
use titrator_hardware::SimulatedCamera;

/// Blocks far longer than any caller is willing to wait.
struct StuckCamera;

impl FrameSource for StuckCamera {
    fn frame(&mut self, _timeout: Duration) -> Result<Frame, SeamError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Frame::new(1, 1))
    }
}

#[test]
fn delivers_frames_from_the_wrapped_source() {
    let cam = SimulatedCamera::new(8, 8, [1, 2, 3], Arc::new(MonotonicClock::new()));
    let mut g = FrameGrabber::spawn(cam, Duration::from_millis(50), Duration::from_millis(5));
    let f = g.frame(Duration::from_secs(1)).unwrap();
    assert_eq!(f.get_pixel(7, 7).0, [1, 2, 3]);
}

#[test]
fn source_errors_are_forwarded() {
    let mut g = FrameGrabber::spawn(NoopCamera, Duration::from_millis(10), Duration::from_millis(5));
    let err = g.frame(Duration::from_secs(1)).unwrap_err();
    assert!(err.to_string().contains("noop camera"));
}

#[test]
fn frame_wait_is_bounded_by_timeout() {
    let mut g = FrameGrabber::spawn(StuckCamera, Duration::from_millis(10), Duration::ZERO);
    let t0 = Instant::now();
    assert!(g.frame(Duration::from_millis(20)).is_err());
    assert!(t0.elapsed() < Duration::from_millis(250));
}

#[test]
fn repeated_spawn_and_drop_does_not_hang() {
    for _ in 0..10 {
        let g = FrameGrabber::spawn(NoopCamera, Duration::from_millis(5), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        drop(g);
    }
}
