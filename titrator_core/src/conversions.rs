//! Conversions from the `titrator_config` file schema to runtime types.

use std::time::Duration;

use crate::color::HsvRange;
use crate::color_sampler::SampleRegion;
use crate::config::{ControlCfg, DetectionCfg, PumpCfg, RinseCfg};
use crate::detector::ChangeThresholds;
use crate::error::Report;
use crate::pump::{PumpModel, PumpRate};

// ── PumpModel ────────────────────────────────────────────────────────────────

impl From<titrator_config::PumpModel> for PumpModel {
    fn from(m: titrator_config::PumpModel) -> Self {
        match m {
            titrator_config::PumpModel::Qhzs => Self::Qhzs,
            titrator_config::PumpModel::Harvard => Self::Harvard,
            titrator_config::PumpModel::Arduino => Self::Arduino,
        }
    }
}

// ── PumpCfg ──────────────────────────────────────────────────────────────────

impl TryFrom<&titrator_config::PumpSection> for PumpCfg {
    type Error = Report;
    fn try_from(c: &titrator_config::PumpSection) -> Result<Self, Report> {
        Ok(Self {
            model: c.model.into(),
            rate: PumpRate::parse(&c.rate)?,
            settle: Duration::from_millis(c.settle_ms),
        })
    }
}

// ── DetectionCfg ─────────────────────────────────────────────────────────────

impl From<&titrator_config::DetectionSection> for DetectionCfg {
    fn from(c: &titrator_config::DetectionSection) -> Self {
        Self {
            thresholds: ChangeThresholds {
                threshold: c.threshold,
                threshold_times: c.threshold_times,
            },
            use_mask: c.use_mask,
        }
    }
}

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&titrator_config::Config> for ControlCfg {
    fn from(c: &titrator_config::Config) -> Self {
        Self {
            sample_period: Duration::from_millis(c.control.sample_period_ms),
            frame_timeout: Duration::from_millis(c.camera.frame_timeout_ms),
            confirm_secs: c.control.confirm_secs,
            max_frame_failures: c.control.max_frame_failures,
        }
    }
}

// ── RinseCfg ─────────────────────────────────────────────────────────────────

impl TryFrom<&titrator_config::RinseSection> for RinseCfg {
    type Error = Report;
    fn try_from(c: &titrator_config::RinseSection) -> Result<Self, Report> {
        Ok(Self {
            rate: PumpRate::parse(&c.rate)?,
            duration: Duration::from_secs(c.duration_s),
        })
    }
}

// ── Region / mask ────────────────────────────────────────────────────────────

impl TryFrom<&titrator_config::RegionSection> for SampleRegion {
    type Error = Report;
    fn try_from(r: &titrator_config::RegionSection) -> Result<Self, Report> {
        SampleRegion::new(r.x, r.y, r.width, r.height)
    }
}

impl TryFrom<&titrator_config::MaskSection> for HsvRange {
    type Error = Report;
    fn try_from(m: &titrator_config::MaskSection) -> Result<Self, Report> {
        HsvRange::new(m.lower, m.upper)
    }
}
