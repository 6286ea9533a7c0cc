#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Titration control core (hardware-agnostic).
//!
//! All hardware goes through `titrator_traits::FrameSource` (camera) and
//! `titrator_traits::SerialLink` (pump).
//!
//! ## Architecture
//!
//! - **Sampling**: three-zone mean HSV of a region (`color_sampler`)
//! - **Detection**: per-zone, per-channel change test against a reference (`detector`)
//! - **Debounce**: two `Timer`s and the billing policy (`titrator`)
//! - **Actuation**: model-specific serial commands (`pump`)
//! - **Lifecycle**: preview, run, stop, rinse and release on worker threads (`controller`)
//! - **Status**: state, ledger and snapshot types (`status`), operator events (`events`)

pub mod builder;
pub mod color;
pub mod color_sampler;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod detector;
pub mod error;
pub mod events;
pub mod grabber;
pub mod hw_error;
pub mod mocks;
pub mod pump;
pub mod status;
pub mod timer;
pub mod titrator;

pub use builder::TitrationControllerBuilder;
pub use color::{HsvRange, ReferenceColors, ZoneColor, ZoneColors};
pub use color_sampler::{ColorSampler, SampleRegion};
pub use config::{ControlCfg, DetectionCfg, PumpCfg, RinseCfg};
pub use controller::TitrationController;
pub use detector::{ChangeDetector, ChangeThresholds};
pub use error::{BuildError, Result, TitratorError};
pub use events::{EventSink, TitrationEvent};
pub use grabber::FrameGrabber;
pub use pump::{PumpController, PumpDrive, PumpModel, PumpRate};
pub use status::{EndpointReport, StatusSnapshot, TitrationLedger, TitrationState, TitrationStatus};
pub use timer::Timer;
pub use titrator::{Titrator, TitratorParts};
