//! OpenCV `VideoCapture`-backed camera.

use std::time::Duration;

use image::RgbImage;
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::{imgproc, videoio};
use titrator_traits::{Frame, FrameSource, SeamError};

use crate::error::{HwError, Result};

fn cv_err(e: opencv::Error) -> HwError {
    HwError::Capture(e.to_string())
}

pub struct VideoCaptureSource {
    index: i32,
    cap: videoio::VideoCapture,
    bgr: Mat,
}

impl VideoCaptureSource {
    /// Open the camera at `index` with whatever backend OpenCV picks.
    pub fn open(index: u32) -> Result<Self> {
        let index = i32::try_from(index)
            .map_err(|_| HwError::Capture(format!("camera index {index} out of range")))?;
        let cap = videoio::VideoCapture::new(index, videoio::CAP_ANY).map_err(cv_err)?;
        if !cap.is_opened().map_err(cv_err)? {
            return Err(HwError::Capture(format!("camera {index} could not be opened")));
        }
        tracing::info!(index, "camera opened");
        Ok(Self {
            index,
            cap,
            bgr: Mat::default(),
        })
    }
}

impl FrameSource for VideoCaptureSource {
    // VideoCapture::read blocks; wrap the source in a grabber thread to bound it.
    fn frame(&mut self, _timeout: Duration) -> std::result::Result<Frame, SeamError> {
        if !self.cap.read(&mut self.bgr).map_err(cv_err)? || self.bgr.empty() {
            return Err(Box::new(HwError::Capture(format!(
                "camera {} returned no frame",
                self.index
            ))));
        }
        let mut rgb = Mat::default();
        imgproc::cvt_color(&self.bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(cv_err)?;
        let (w, h) = (rgb.cols(), rgb.rows());
        let bytes = rgb.data_bytes().map_err(cv_err)?.to_vec();
        let frame = RgbImage::from_raw(w.unsigned_abs(), h.unsigned_abs(), bytes)
            .ok_or_else(|| HwError::Capture(format!("unexpected frame layout {w}x{h}")))?;
        Ok(frame)
    }
}

impl Drop for VideoCaptureSource {
    fn drop(&mut self) {
        if let Err(e) = self.cap.release() {
            tracing::warn!(index = self.index, error = %e, "camera release failed");
        }
    }
}
