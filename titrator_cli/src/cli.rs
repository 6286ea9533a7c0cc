//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

use titrator_config::RegionSection;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "titrator", version, about = "Automated titration controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/titrator.toml")]
    pub config: PathBuf,

    /// Log as JSON lines and print results as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); falls back to [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Pump command vocabulary.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModelArg {
    /// Two-stage rate fragments plus an activation command
    Qhzs,
    /// Single floating-point rate command
    Harvard,
    /// Fixed-width zero-padded rate
    Arduino,
}

impl From<ModelArg> for titrator_core::PumpModel {
    fn from(m: ModelArg) -> Self {
        match m {
            ModelArg::Qhzs => Self::Qhzs,
            ModelArg::Harvard => Self::Harvard,
            ModelArg::Arduino => Self::Arduino,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Titrate until the color change is confirmed, then print the dispensed volume
    Run {
        /// Dispensing rate in mL/min ("DD.DD"); overrides [pump].rate
        #[arg(long, value_name = "RATE")]
        rate: Option<String>,
        /// Sample region as X,Y,WIDTH,HEIGHT; overrides [region]
        #[arg(long, value_name = "X,Y,W,H", value_parser = parse_region)]
        region: Option<RegionSection>,
        /// Write --rate/--region back into the config file before running
        #[arg(long, action = ArgAction::SetTrue)]
        save: bool,
        /// Replay frames from a directory of images instead of the simulator
        #[arg(long, value_name = "DIR", conflicts_with = "live")]
        frames: Option<PathBuf>,
        /// Capture from the camera at [camera].index (needs the `camera` feature)
        #[arg(long, action = ArgAction::SetTrue)]
        live: bool,
        /// Simulator only: seconds before the solution changes color
        #[arg(long, value_name = "SECS", default_value_t = 10.0)]
        change_after: f64,
        /// Give up if no endpoint is confirmed within this many seconds
        #[arg(long, value_name = "SECS", default_value_t = 600)]
        timeout: u64,
    },
    /// Flush the line at the rinse rate, then restore the configured rate
    Rinse {
        /// Override [rinse].duration_s
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
    /// Print the serial commands a pump model receives for a rate
    EncodeRate {
        /// Pump model; defaults to [pump].model
        #[arg(long, value_enum)]
        model: Option<ModelArg>,
        /// Rate in mL/min ("DD.DD")
        #[arg(long)]
        rate: String,
    },
    /// Quick health check (config, pump link and one sampled frame)
    SelfCheck {
        /// Check against the first image in this directory instead of the simulator
        #[arg(long, value_name = "DIR")]
        frames: Option<PathBuf>,
    },
}

/// Parse "X,Y,W,H" into a region section.
pub fn parse_region(s: &str) -> Result<RegionSection, String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("region must be X,Y,W,H: {e}"))?;
    match parts.as_slice() {
        [x, y, width, height] => Ok(RegionSection {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        }),
        _ => Err(format!("region must have 4 values, got {}", parts.len())),
    }
}
