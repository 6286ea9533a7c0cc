//! Titration state, per-step status and the read-only snapshot for the UI.

use crate::color::{ReferenceColors, ZoneColors};

/// Lifecycle of the controller. `Stopped` is the hand-off while a loop winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TitrationState {
    #[default]
    Idle = 0,
    Previewing = 1,
    Running = 2,
    Stopped = 3,
}

impl TitrationState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Previewing,
            2 => Self::Running,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Previewing => "previewing",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for TitrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billed volume and dispensing time of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TitrationLedger {
    pub volume_ml: f64,
    pub elapsed_s: f64,
}

impl TitrationLedger {
    pub(crate) fn charge(&mut self, secs: f64, volume_ml: f64) {
        self.elapsed_s += secs.max(0.0);
        self.volume_ml += volume_ml.max(0.0);
    }
}

/// What the confirmed endpoint looked like.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointReport {
    pub volume_ml: f64,
    pub dispensing_s: f64,
    pub final_colors: ZoneColors,
}

/// Outcome of one titration step.
#[derive(Debug, Clone, PartialEq)]
pub enum TitrationStatus {
    /// No change observed; the pump is dispensing.
    Dispensing,
    /// A change is being observed continuously for `elapsed_s`.
    Confirming { elapsed_s: f64 },
    /// The change held for the whole confirmation window; the run must be stopped.
    Endpoint(EndpointReport),
}

/// Read-only view of the controller for status displays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusSnapshot {
    pub state: TitrationState,
    pub endpoint_reached: bool,
    pub near_endpoint: bool,
    pub volume_ml: f64,
    pub elapsed_s: f64,
    pub rate: String,
    pub rinsing: bool,
    pub zones: Option<ZoneColors>,
    pub reference: Option<ReferenceColors>,
    pub last_endpoint: Option<EndpointReport>,
}

impl StatusSnapshot {
    /// "1.23 mL", or "--" before anything was billed.
    pub fn volume_display(&self) -> String {
        if self.volume_ml > 0.0 {
            format!("{:.2} mL", self.volume_ml)
        } else {
            "--".to_owned()
        }
    }

    pub fn elapsed_display(&self) -> String {
        if self.elapsed_s > 0.0 {
            format!("{:.2} s", self.elapsed_s)
        } else {
            "--".to_owned()
        }
    }
}
