//! Runtime configuration used by the titration engine and controller.
//!
//! These are separate from the TOML schema in `titrator_config`; see
//! `conversions` for the mapping.

use std::time::Duration;

use crate::detector::ChangeThresholds;
use crate::pump::{PumpModel, PumpRate};

/// Pump vocabulary, configured rate and per-command settle delay.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpCfg {
    pub model: PumpModel,
    pub rate: PumpRate,
    pub settle: Duration,
}

impl Default for PumpCfg {
    fn default() -> Self {
        Self {
            model: PumpModel::Arduino,
            rate: PumpRate::default(),
            settle: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCfg {
    pub thresholds: ChangeThresholds,
    /// Apply the HSV mask (when one is set) before zoning.
    pub use_mask: bool,
}

impl Default for DetectionCfg {
    fn default() -> Self {
        Self {
            thresholds: ChangeThresholds::default(),
            use_mask: true,
        }
    }
}

/// Loop pacing and failure policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlCfg {
    pub sample_period: Duration,
    pub frame_timeout: Duration,
    /// Seconds a change must hold before it is the endpoint.
    pub confirm_secs: f64,
    /// Consecutive failed captures tolerated before the run is aborted.
    pub max_frame_failures: u32,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_millis(100),
            frame_timeout: Duration::from_millis(500),
            confirm_secs: 15.0,
            max_frame_failures: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RinseCfg {
    pub rate: PumpRate,
    pub duration: Duration,
}

impl Default for RinseCfg {
    fn default() -> Self {
        Self {
            rate: PumpRate::from_parts("15", "00", 15.0),
            duration: Duration::from_secs(60),
        }
    }
}
