//! Camera and pump-link backends.
//!
//! Simulated devices are always available so the controller can be exercised
//! without a bench setup. The `serialport`-backed link needs `--features hardware`
//! and the OpenCV camera needs `--features camera`.
#[cfg(feature = "camera")]
pub mod camera;
pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use titrator_traits::{Clock, Frame, FrameSource, SeamError, SerialLink};

use crate::error::HwError;

#[cfg(feature = "camera")]
pub use camera::VideoCaptureSource;
#[cfg(feature = "hardware")]
pub use serial::SerialPortLink;

/// Camera that renders solid-color frames following a time script.
///
/// The script is a list of `(offset, color)` pairs measured from construction;
/// the last entry whose offset has passed decides the color. An override set
/// through [`CameraHandle`] wins over the script.
pub struct SimulatedCamera {
    width: u32,
    height: u32,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    script: Vec<(Duration, [u8; 3])>,
    override_color: Arc<Mutex<Option<[u8; 3]>>>,
    offline: Arc<AtomicBool>,
}

/// Remote control for a [`SimulatedCamera`] already moved into a controller.
#[derive(Clone)]
pub struct CameraHandle {
    override_color: Arc<Mutex<Option<[u8; 3]>>>,
    offline: Arc<AtomicBool>,
}

impl CameraHandle {
    pub fn set_color(&self, rgb: [u8; 3]) {
        if let Ok(mut c) = self.override_color.lock() {
            *c = Some(rgb);
        }
    }

    pub fn clear_override(&self) {
        if let Ok(mut c) = self.override_color.lock() {
            *c = None;
        }
    }

    /// Make every subsequent capture fail, as an unplugged camera would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }
}

impl SimulatedCamera {
    pub fn new(
        width: u32,
        height: u32,
        initial: [u8; 3],
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            width,
            height,
            clock,
            epoch,
            script: vec![(Duration::ZERO, initial)],
            override_color: Arc::new(Mutex::new(None)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Switch to `rgb` once `after` has elapsed since construction.
    pub fn then_at(mut self, after: Duration, rgb: [u8; 3]) -> Self {
        self.script.push((after, rgb));
        self.script.sort_by_key(|(at, _)| *at);
        self
    }

    pub fn handle(&self) -> CameraHandle {
        CameraHandle {
            override_color: self.override_color.clone(),
            offline: self.offline.clone(),
        }
    }

    fn current_color(&self) -> [u8; 3] {
        if let Ok(c) = self.override_color.lock()
            && let Some(rgb) = *c
        {
            return rgb;
        }
        let elapsed = self.clock.now().saturating_duration_since(self.epoch);
        self.script
            .iter()
            .rev()
            .find(|(at, _)| *at <= elapsed)
            .map(|(_, rgb)| *rgb)
            .unwrap_or([0, 0, 0])
    }
}

impl FrameSource for SimulatedCamera {
    fn frame(&mut self, _timeout: Duration) -> Result<Frame, SeamError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(Box::new(HwError::Capture("simulated camera offline".into())));
        }
        let rgb = self.current_color();
        tracing::trace!(r = rgb[0], g = rgb[1], b = rgb[2], "simulated frame");
        Ok(RgbImage::from_pixel(self.width, self.height, Rgb(rgb)))
    }
}

/// Replays image files from a directory in lexical order, holding the last one.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    idx: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> error::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
                    .unwrap_or(false)
            })
            .collect();
        if paths.is_empty() {
            return Err(HwError::Capture(format!(
                "no image files in {}",
                dir.display()
            )));
        }
        paths.sort();
        tracing::info!(frames = paths.len(), dir = %dir.display(), "image sequence opened");
        Ok(Self { paths, idx: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn frame(&mut self, _timeout: Duration) -> Result<Frame, SeamError> {
        let path = &self.paths[self.idx.min(self.paths.len() - 1)];
        if self.idx + 1 < self.paths.len() {
            self.idx += 1;
        }
        let img = image::open(path).map_err(HwError::from)?;
        Ok(img.to_rgb8())
    }
}

/// Serial link that keeps every written line in memory and logs it.
#[derive(Default)]
pub struct RecordingLink {
    lines: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

/// Inspection side of a [`RecordingLink`].
#[derive(Clone)]
pub struct LinkHandle {
    lines: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl LinkHandle {
    /// Everything written so far, terminators included.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn last_line(&self) -> Option<String> {
        self.lines.lock().ok().and_then(|l| l.last().cloned())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Make subsequent writes fail like a yanked USB adapter.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            lines: self.lines.clone(),
            closed: self.closed.clone(),
            fail_writes: self.fail_writes.clone(),
        }
    }
}

impl SerialLink for RecordingLink {
    fn write_line(&mut self, line: &str) -> Result<(), SeamError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Box::new(HwError::Closed));
        }
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Box::new(HwError::Serial("simulated write failure".into())));
        }
        tracing::info!(command = line.trim_end(), "pump command (simulated)");
        if let Ok(mut l) = self.lines.lock() {
            l.push(line.to_string());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SeamError> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Err(Box::new(HwError::Closed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use titrator_traits::clock::test_clock::TestClock;

    #[test]
    fn simulated_camera_follows_script() {
        let clock = TestClock::new();
        let mut cam = SimulatedCamera::new(4, 4, [10, 20, 30], Arc::new(clock.clone()))
            .then_at(Duration::from_secs(5), [200, 0, 0]);
        let f = cam.frame(Duration::from_millis(10)).unwrap();
        assert_eq!(f.get_pixel(0, 0).0, [10, 20, 30]);
        clock.advance(Duration::from_secs(5));
        let f = cam.frame(Duration::from_millis(10)).unwrap();
        assert_eq!(f.get_pixel(3, 3).0, [200, 0, 0]);
    }

    #[test]
    fn override_and_offline() {
        let clock = TestClock::new();
        let mut cam = SimulatedCamera::new(2, 2, [1, 2, 3], Arc::new(clock));
        let h = cam.handle();
        h.set_color([9, 9, 9]);
        assert_eq!(cam.frame(Duration::ZERO).unwrap().get_pixel(0, 0).0, [9, 9, 9]);
        h.set_offline(true);
        assert!(cam.frame(Duration::ZERO).is_err());
    }

    #[test]
    fn recording_link_rejects_after_close() {
        let mut link = RecordingLink::new();
        let h = link.handle();
        link.write_line("RUN\n").unwrap();
        link.close().unwrap();
        assert!(h.is_closed());
        assert!(link.write_line("STOP\n").is_err());
        assert!(link.close().is_err());
        assert_eq!(h.lines(), vec!["RUN\n".to_string()]);
    }
}
