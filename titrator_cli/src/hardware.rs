//! Opening the camera and pump link selected by the config and flags.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use titrator_config::Config;
use titrator_core::TitratorError;
use titrator_core::hw_error::{Seam, map_hw_error};
use titrator_hardware::{ImageSequenceSource, SimulatedCamera};
use titrator_traits::{Clock, FrameSource, SerialLink};

/// Solution color before the endpoint in simulated runs (pale blue).
pub const SIM_BEFORE_RGB: [u8; 3] = [70, 110, 200];
/// Solution color after the endpoint in simulated runs (pink).
pub const SIM_AFTER_RGB: [u8; 3] = [220, 80, 160];
const SIM_WIDTH: u32 = 640;
const SIM_HEIGHT: u32 = 480;

pub enum CameraChoice<'a> {
    /// Scripted solid colors; the color changes for good after the given delay.
    Simulated { change_after: Option<Duration> },
    Frames(&'a Path),
    Live,
}

pub fn open_camera(
    cfg: &Config,
    choice: CameraChoice<'_>,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<Box<dyn FrameSource + Send>> {
    match choice {
        CameraChoice::Simulated { change_after } => {
            let cam = SimulatedCamera::new(SIM_WIDTH, SIM_HEIGHT, SIM_BEFORE_RGB, clock);
            // A transient flash a third of the way in, then the lasting change.
            let cam = match change_after {
                Some(after) => cam
                    .then_at(after / 3, SIM_AFTER_RGB)
                    .then_at(after * 2 / 3, SIM_BEFORE_RGB)
                    .then_at(after, SIM_AFTER_RGB),
                None => cam,
            };
            Ok(Box::new(cam))
        }
        CameraChoice::Frames(dir) => {
            let seq = ImageSequenceSource::open(dir)
                .map_err(|e| eyre::Report::new(map_hw_error(&e, Seam::Camera)))?;
            Ok(Box::new(seq))
        }
        CameraChoice::Live => open_live(cfg),
    }
}

#[cfg(feature = "camera")]
fn open_live(cfg: &Config) -> Result<Box<dyn FrameSource + Send>> {
    let cam = titrator_hardware::VideoCaptureSource::open(cfg.camera.index)
        .map_err(|e| eyre::Report::new(map_hw_error(&e, Seam::Camera)))?;
    Ok(Box::new(cam))
}

#[cfg(not(feature = "camera"))]
fn open_live(cfg: &Config) -> Result<Box<dyn FrameSource + Send>> {
    Err(eyre::Report::new(TitratorError::Capture(format!(
        "camera {} requested but this build has no camera backend (enable the `camera` feature)",
        cfg.camera.index
    ))))
}

/// Real serial port with `--features hardware`, otherwise a link that records commands.
#[cfg(feature = "hardware")]
pub fn open_link(cfg: &Config) -> Result<Box<dyn SerialLink + Send>> {
    let link = titrator_hardware::SerialPortLink::open(
        &cfg.pump.port,
        cfg.pump.baud,
        Duration::from_millis(cfg.pump.open_delay_ms),
    )
    .map_err(|e| eyre::Report::new(map_hw_error(&e, Seam::Serial)))?;
    Ok(Box::new(link))
}

#[cfg(not(feature = "hardware"))]
pub fn open_link(cfg: &Config) -> Result<Box<dyn SerialLink + Send>> {
    tracing::info!(
        port = %cfg.pump.port,
        "built without serial support, pump commands are recorded only"
    );
    Ok(Box::new(titrator_hardware::RecordingLink::new()))
}

/// Simulator delay from a CLI value in seconds.
pub fn change_delay(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        eyre::Report::new(TitratorError::Config(format!(
            "--change-after must be a non-negative number of seconds: {e}"
        )))
    })
}
