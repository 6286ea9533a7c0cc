//! Test and helper mocks for titrator_core

use crate::error::Result;
use crate::pump::{PumpDrive, PumpRate};

/// A camera that always fails; drives the capture-failure paths.
pub struct NoopCamera;

impl titrator_traits::FrameSource for NoopCamera {
    fn frame(
        &mut self,
        _timeout: std::time::Duration,
    ) -> std::result::Result<titrator_traits::Frame, titrator_traits::SeamError> {
        Err(Box::new(std::io::Error::other("noop camera")))
    }
}

/// Pump that records operations instead of sending them. No settle delay.
#[derive(Debug, Default)]
pub struct SpyPump {
    pub ops: Vec<String>,
    pub running: bool,
    pub released: bool,
}

impl SpyPump {
    pub fn count(&self, op: &str) -> usize {
        self.ops.iter().filter(|o| o.as_str() == op).count()
    }
}

impl PumpDrive for SpyPump {
    fn set_rate(&mut self, rate: &PumpRate) -> Result<()> {
        self.ops.push(format!("rate {rate}"));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.ops.push("start".into());
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.ops.push("stop".into());
        self.running = false;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.stop()?;
        self.released = true;
        Ok(())
    }
}
