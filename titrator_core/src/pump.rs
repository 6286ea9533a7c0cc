//! Pump command encoding over a fire-and-forget serial link.
//!
//! Nothing is read back from the device: a pump that silently ignores a
//! command is not detected here. Every command is newline-terminated and
//! followed by a settle delay before the next one may be sent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use titrator_traits::{Clock, SerialLink};

use crate::error::{Result, TitratorError};
use crate::hw_error::{Seam, map_hw_error};

/// Dispensing rate in mL/min as entered by the operator ("D.D" .. "DD.DD").
///
/// The original text is kept because some pump models receive its digits
/// verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpRate {
    whole: String,
    frac: String,
    ml_per_min: f64,
}

impl PumpRate {
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || {
            eyre::Report::new(TitratorError::Config(format!(
                "rate must look like DD.DD, got {s:?}"
            )))
        };
        let (whole, frac) = s.trim().split_once('.').ok_or_else(bad)?;
        let digits = |p: &str| {
            (1..=2).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(whole) || !digits(frac) {
            return Err(bad());
        }
        let ml_per_min: f64 = format!("{whole}.{frac}").parse().map_err(|_| bad())?;
        Ok(Self {
            whole: whole.to_owned(),
            frac: frac.to_owned(),
            ml_per_min,
        })
    }

    /// Build from digit strings already known to be valid.
    pub(crate) fn from_parts(whole: &str, frac: &str, ml_per_min: f64) -> Self {
        Self {
            whole: whole.to_owned(),
            frac: frac.to_owned(),
            ml_per_min,
        }
    }

    pub fn ml_per_min(&self) -> f64 {
        self.ml_per_min
    }

    /// Volume dispensed over `secs` at this rate.
    pub fn volume_ml(&self, secs: f64) -> f64 {
        self.ml_per_min / 60.0 * secs
    }
}

impl Default for PumpRate {
    fn default() -> Self {
        Self::from_parts("05", "00", 5.0)
    }
}

impl fmt::Display for PumpRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.whole, self.frac)
    }
}

impl std::str::FromStr for PumpRate {
    type Err = eyre::Report;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Command vocabulary of a pump model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PumpModel {
    /// Two rate fragments followed by an activation command.
    Qhzs,
    /// One floating-point rate command.
    Harvard,
    /// One fixed-width, zero-padded rate command.
    #[default]
    Arduino,
}

impl PumpModel {
    pub fn set_rate_commands(self, rate: &PumpRate) -> Vec<String> {
        match self {
            Self::Qhzs => vec![
                format!("Q1H{}D", rate.whole),
                format!("Q2H{}D", rate.frac),
                "Q6H1D".to_owned(),
            ],
            Self::Harvard => {
                let v = rate.ml_per_min;
                let num = if v.fract() == 0.0 {
                    format!("{v:.1}")
                } else {
                    format!("{v}")
                };
                vec![format!("MLM {num}")]
            }
            Self::Arduino => vec![format!(
                "SETRATE {:0>2}{:0<2}",
                rate.whole, rate.frac
            )],
        }
    }

    pub fn start_command(self) -> &'static str {
        match self {
            Self::Qhzs => "Q6H2D",
            Self::Harvard | Self::Arduino => "RUN",
        }
    }

    pub fn stop_command(self) -> &'static str {
        match self {
            Self::Qhzs => "Q6H6D",
            Self::Harvard => "STP",
            Self::Arduino => "STOP",
        }
    }
}

impl fmt::Display for PumpModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Qhzs => "qhzs",
            Self::Harvard => "harvard",
            Self::Arduino => "arduino",
        })
    }
}

/// The three pump operations the control loop needs, plus teardown.
pub trait PumpDrive {
    fn set_rate(&mut self, rate: &PumpRate) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Stop and close the link. Irreversible.
    fn release(&mut self) -> Result<()>;
}

pub struct PumpController {
    link: Option<Box<dyn SerialLink + Send>>,
    model: PumpModel,
    settle: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl PumpController {
    pub fn new(
        link: Box<dyn SerialLink + Send>,
        model: PumpModel,
        settle: Duration,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            link: Some(link),
            model,
            settle,
            clock,
        }
    }

    pub fn model(&self) -> PumpModel {
        self.model
    }

    pub fn is_released(&self) -> bool {
        self.link.is_none()
    }

    fn send(&mut self, command: &str) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(released());
        };
        let line = if command.ends_with('\n') {
            command.to_owned()
        } else {
            format!("{command}\n")
        };
        tracing::debug!(command = command.trim_end(), model = %self.model, "pump command");
        link.write_line(&line)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e, Seam::Serial)))?;
        self.clock.sleep(self.settle);
        Ok(())
    }
}

impl PumpDrive for PumpController {
    fn set_rate(&mut self, rate: &PumpRate) -> Result<()> {
        for cmd in self.model.set_rate_commands(rate) {
            self.send(&cmd)?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.send(self.model.start_command())
    }

    fn stop(&mut self) -> Result<()> {
        self.send(self.model.stop_command())
    }

    fn release(&mut self) -> Result<()> {
        if self.link.is_none() {
            return Err(released());
        }
        // The link is closed even when the final stop could not be sent.
        let stopped = self.stop();
        let closed = match self.link.take() {
            Some(mut link) => link
                .close()
                .map_err(|e| eyre::Report::new(map_hw_error(&*e, Seam::Serial))),
            None => Ok(()),
        };
        tracing::info!(model = %self.model, "pump released");
        stopped.and(closed)
    }
}

fn released() -> eyre::Report {
    eyre::Report::new(TitratorError::InvalidState(
        "pump has been released".into(),
    ))
}
