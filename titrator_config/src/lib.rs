#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the titration station.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - Every section has defaults, so a partial file only overrides what it names.
//! - `Config::update_and_save` merges an edit into the stored file atomically.
pub mod atomic;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pump command vocabulary.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PumpModel {
    /// Two-stage rate fragments plus an activation command.
    Qhzs,
    /// Single floating-point rate command.
    Harvard,
    /// Fixed-width zero-padded rate.
    #[default]
    Arduino,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PumpSection {
    pub port: String,
    pub baud: u32,
    pub model: PumpModel,
    /// Dispensing rate in mL/min, formatted "DD.DD".
    pub rate: String,
    /// Delay after every command so the device can process it.
    pub settle_ms: u64,
    /// Wait after opening the port (boards reset on connect).
    pub open_delay_ms: u64,
}

impl Default for PumpSection {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            model: PumpModel::Arduino,
            rate: "05.00".into(),
            settle_ms: 100,
            open_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CameraSection {
    pub index: u32,
    pub frame_timeout_ms: u64,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            index: 0,
            frame_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DetectionSection {
    pub threshold: f64,
    pub threshold_times: f64,
    pub use_mask: bool,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            threshold_times: 1.5,
            use_mask: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ControlSection {
    pub sample_period_ms: u64,
    /// Seconds of unbroken change required to confirm the endpoint.
    pub confirm_secs: f64,
    /// Consecutive failed captures tolerated before the run is aborted.
    pub max_frame_failures: u32,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            sample_period_ms: 100,
            confirm_secs: 15.0,
            max_frame_failures: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RinseSection {
    pub rate: String,
    pub duration_s: u64,
}

impl Default for RinseSection {
    fn default() -> Self {
        Self {
            rate: "15.00".into(),
            duration_s: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RegionSection {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct MaskSection {
    /// Inclusive lower HSV bound: h in 0..=179, s and v in 0..=255.
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub pump: PumpSection,
    pub camera: CameraSection,
    pub detection: DetectionSection,
    pub control: ControlSection,
    pub rinse: RinseSection,
    pub region: Option<RegionSection>,
    pub mask: Option<MaskSection>,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    cfg.validate()?;
    Ok(cfg)
}

/// True when `s` looks like "D.D" .. "DD.DD".
pub fn is_rate_string(s: &str) -> bool {
    let Some((whole, frac)) = s.split_once('.') else {
        return false;
    };
    let digits = |p: &str, max: usize| {
        !p.is_empty() && p.len() <= max && p.bytes().all(|b| b.is_ascii_digit())
    };
    digits(whole, 2) && digits(frac, 2)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pump
        if self.pump.port.trim().is_empty() {
            eyre::bail!("pump.port must not be empty");
        }
        if self.pump.baud == 0 {
            eyre::bail!("pump.baud must be > 0");
        }
        if !is_rate_string(&self.pump.rate) {
            eyre::bail!("pump.rate must look like DD.DD, got {:?}", self.pump.rate);
        }
        if self.pump.settle_ms > 10_000 {
            eyre::bail!("pump.settle_ms is unreasonably large (>10s)");
        }

        // Camera
        if self.camera.frame_timeout_ms == 0 {
            eyre::bail!("camera.frame_timeout_ms must be >= 1");
        }

        // Detection
        if !(self.detection.threshold.is_finite() && self.detection.threshold > 0.0) {
            eyre::bail!("detection.threshold must be > 0");
        }
        if !(self.detection.threshold_times.is_finite() && self.detection.threshold_times > 0.0) {
            eyre::bail!("detection.threshold_times must be > 0");
        }

        // Control
        if self.control.sample_period_ms == 0 {
            eyre::bail!("control.sample_period_ms must be >= 1");
        }
        if !(self.control.confirm_secs.is_finite() && self.control.confirm_secs > 0.0) {
            eyre::bail!("control.confirm_secs must be > 0");
        }
        if self.control.max_frame_failures == 0 {
            eyre::bail!("control.max_frame_failures must be >= 1");
        }

        // Rinse
        if !is_rate_string(&self.rinse.rate) {
            eyre::bail!("rinse.rate must look like DD.DD, got {:?}", self.rinse.rate);
        }
        if self.rinse.duration_s == 0 {
            eyre::bail!("rinse.duration_s must be >= 1");
        }

        // Region
        if let Some(r) = &self.region
            && (r.width <= 15 || r.height <= 15)
        {
            eyre::bail!(
                "region must be larger than 15x15 pixels, got {}x{}",
                r.width,
                r.height
            );
        }

        // Mask
        if let Some(m) = &self.mask {
            if m.lower[0] > 179 || m.upper[0] > 179 {
                eyre::bail!("mask hue bounds must be within 0..=179");
            }
            if m.lower.iter().zip(m.upper.iter()).any(|(lo, hi)| lo > hi) {
                eyre::bail!("mask.lower must not exceed mask.upper on any channel");
            }
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }

    pub fn to_toml_string(&self) -> eyre::Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre::eyre!("serialize config: {e}"))
    }

    /// Load `path` (or defaults when it does not exist yet), apply `edit`,
    /// validate, and write the result back atomically.
    pub fn update_and_save(path: &Path, edit: impl FnOnce(&mut Config)) -> eyre::Result<Config> {
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
            load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?
        } else {
            Config::default()
        };
        edit(&mut cfg);
        cfg.validate()?;
        let text = cfg.to_toml_string()?;
        atomic::write_atomic(path, text.as_bytes())
            .map_err(|e| eyre::eyre!("write config {}: {}", path.display(), e))?;
        Ok(cfg)
    }
}
