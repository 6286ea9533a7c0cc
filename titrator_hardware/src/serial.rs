//! `serialport`-backed pump link.

use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;
use titrator_traits::{SeamError, SerialLink};

use crate::error::{HwError, Result};

pub struct SerialPortLink {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortLink {
    /// Open `port_name` at `baud`, then wait `open_delay` for the device to come out of reset.
    pub fn open(port_name: &str, baud: u32, open_delay: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| HwError::Serial(format!("open {port_name} at {baud} baud: {e}")))?;
        tracing::info!(port = port_name, baud, "serial port opened");
        std::thread::sleep(open_delay);
        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(port),
        })
    }
}

impl SerialLink for SerialPortLink {
    fn write_line(&mut self, line: &str) -> std::result::Result<(), SeamError> {
        let port = self.port.as_mut().ok_or(HwError::Closed)?;
        port.write_all(line.as_bytes()).map_err(HwError::from)?;
        port.flush().map_err(HwError::from)?;
        tracing::debug!(port = %self.port_name, command = line.trim_end(), "serial write");
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), SeamError> {
        match self.port.take() {
            Some(_) => {
                tracing::debug!(port = %self.port_name, "serial port closed");
                Ok(())
            }
            None => Err(Box::new(HwError::Closed)),
        }
    }
}
