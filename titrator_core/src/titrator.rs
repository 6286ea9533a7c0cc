//! Per-iteration titration engine: sample, detect, debounce, actuate, bill.
//!
//! Two timers split the run:
//! - `dispensing` measures time the pump spends driving the solution toward a change;
//! - `confirm` measures how long a change has been observed without a break.
//!
//! Volume is billed from `dispensing` when a change is seen, but only once a
//! previous confirmation span exists. The very first change of a run is
//! therefore never billed: it only arms `last_confirmed_span` when it reverts.
//! A change that holds for `confirm_secs` is the endpoint.

use std::sync::Arc;

use eyre::WrapErr;
use titrator_traits::{Clock, Frame};

use crate::color::{HsvRange, ReferenceColors, ZoneColors};
use crate::color_sampler::{ColorSampler, SampleRegion};
use crate::detector::ChangeDetector;
use crate::error::Result;
use crate::events::{EventSink, TitrationEvent};
use crate::pump::{PumpDrive, PumpRate};
use crate::status::{EndpointReport, TitrationLedger, TitrationStatus};
use crate::timer::Timer;

pub struct Titrator<P: PumpDrive> {
    pump: P,
    detector: ChangeDetector,
    sampler: ColorSampler,
    region: SampleRegion,
    mask: Option<HsvRange>,
    rate: PumpRate,
    confirm_secs: f64,
    events: EventSink,

    dispensing: Timer,
    confirm: Timer,
    last_confirmed_span: Option<f64>,
    // Pump stopped by the billing step and not yet restarted
    pump_halted: bool,
    ledger: TitrationLedger,
    endpoint_reached: bool,
    near_endpoint: bool,
    last_zones: Option<ZoneColors>,
}

impl<P: PumpDrive> std::fmt::Debug for Titrator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Titrator")
            .field("rate", &self.rate.to_string())
            .field("ledger", &self.ledger)
            .field("endpoint_reached", &self.endpoint_reached)
            .field("near_endpoint", &self.near_endpoint)
            .finish_non_exhaustive()
    }
}

/// Everything a [`Titrator`] needs besides the pump.
pub struct TitratorParts {
    pub detector: ChangeDetector,
    pub region: SampleRegion,
    pub mask: Option<HsvRange>,
    pub rate: PumpRate,
    pub confirm_secs: f64,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub events: EventSink,
}

impl<P: PumpDrive> Titrator<P> {
    pub fn new(pump: P, parts: TitratorParts) -> Self {
        let TitratorParts {
            detector,
            region,
            mask,
            rate,
            confirm_secs,
            clock,
            events,
        } = parts;
        Self {
            pump,
            detector,
            sampler: ColorSampler::new(),
            region,
            mask,
            rate,
            confirm_secs,
            events,
            dispensing: Timer::new(clock.clone()),
            confirm: Timer::new(clock),
            last_confirmed_span: None,
            pump_halted: false,
            ledger: TitrationLedger::default(),
            endpoint_reached: false,
            near_endpoint: false,
            last_zones: None,
        }
    }

    pub fn ledger(&self) -> TitrationLedger {
        self.ledger
    }

    pub fn endpoint_reached(&self) -> bool {
        self.endpoint_reached
    }

    pub fn near_endpoint(&self) -> bool {
        self.near_endpoint
    }

    pub fn last_confirmed_span(&self) -> Option<f64> {
        self.last_confirmed_span
    }

    pub fn last_zones(&self) -> Option<ZoneColors> {
        self.last_zones
    }

    pub fn reference(&self) -> Option<ReferenceColors> {
        self.detector.reference().copied()
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn pump(&self) -> &P {
        &self.pump
    }

    /// Release the pump after a failure. The titrator must not step afterwards.
    pub fn release_pump(&mut self) -> Result<()> {
        self.reset_run();
        self.pump.release().wrap_err("release pump")
    }

    pub fn into_pump(self) -> P {
        self.pump
    }

    /// Start the pump and the dispensing timer for a fresh run.
    pub fn begin(&mut self) -> Result<()> {
        self.reset_run();
        self.pump.start().wrap_err("start pump")?;
        self.dispensing.start();
        tracing::info!(rate = %self.rate, "run begun");
        Ok(())
    }

    /// Sample `frame` and advance one iteration.
    pub fn step(&mut self, frame: &Frame) -> Result<TitrationStatus> {
        let mask = self.mask.as_ref();
        let zones = self.sampler.sample(frame, &self.region, mask)?;
        self.step_from_zones(&zones)
    }

    /// Advance one iteration from already-sampled zone colors.
    pub fn step_from_zones(&mut self, zones: &ZoneColors) -> Result<TitrationStatus> {
        self.last_zones = Some(*zones);
        let changed = if self.detector.is_calibrated() {
            self.detector.detect_change(zones)?
        } else {
            let (changed, calibrated) = self.detector.detect_change_or_calibrate(zones);
            if calibrated {
                self.events.emit(TitrationEvent::ReferenceCaptured(*zones));
            }
            changed
        };

        if changed {
            self.on_change(zones)
        } else {
            self.on_steady()?;
            Ok(TitrationStatus::Dispensing)
        }
    }

    fn on_change(&mut self, zones: &ZoneColors) -> Result<TitrationStatus> {
        if self.dispensing.is_started() && self.last_confirmed_span.is_some() {
            self.pump.stop().wrap_err("stop pump on change")?;
            self.pump_halted = true;
            self.dispensing.pause();
            let secs = self.dispensing.elapsed();
            self.ledger.charge(secs, self.rate.volume_ml(secs));
            self.last_confirmed_span = None;
            self.dispensing.reset();
            self.near_endpoint = true;
            self.events.emit(TitrationEvent::NearEndpoint {
                volume_ml: self.ledger.volume_ml,
                elapsed_s: self.ledger.elapsed_s,
            });
        }

        if !self.confirm.is_running() {
            self.confirm.start();
        }
        self.confirm.tick();
        let held = self.confirm.elapsed();

        if held >= self.confirm_secs {
            self.endpoint_reached = true;
            self.confirm.reset();
            let report = EndpointReport {
                volume_ml: self.ledger.volume_ml,
                dispensing_s: self.ledger.elapsed_s,
                final_colors: *zones,
            };
            self.events.emit(TitrationEvent::Endpoint(report));
            return Ok(TitrationStatus::Endpoint(report));
        }
        Ok(TitrationStatus::Confirming { elapsed_s: held })
    }

    fn on_steady(&mut self) -> Result<()> {
        if self.confirm.is_running() {
            let span = self.confirm.elapsed();
            self.last_confirmed_span = Some(span);
            self.confirm.pause();
            self.endpoint_reached = false;
            self.near_endpoint = false;
            self.confirm.reset();
            self.events.emit(TitrationEvent::ColorRecovered {
                confirm_span_s: span,
            });
        }

        if self.pump_halted {
            self.pump.start().wrap_err("restart pump")?;
            self.pump_halted = false;
        }

        if !self.dispensing.is_running() {
            self.dispensing.start();
        }
        Ok(())
    }

    /// End the run: stop the pump, restore the configured rate, zero the
    /// ledger and both timers. The detector keeps its reference.
    pub fn stop(&mut self) -> Result<()> {
        let stopped = self.pump.stop().wrap_err("stop pump");
        self.endpoint_reached = false;
        let restored = self.pump.set_rate(&self.rate).wrap_err("restore rate");
        self.reset_run();
        stopped.and(restored)
    }

    fn reset_run(&mut self) {
        self.ledger = TitrationLedger::default();
        self.dispensing.reset();
        self.confirm.reset();
        self.last_confirmed_span = None;
        self.pump_halted = false;
        self.endpoint_reached = false;
        self.near_endpoint = false;
    }
}
