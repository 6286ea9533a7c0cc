//! Type-state builder for `TitrationController`.
//!
//! `build()` only exists once both a camera and a pump link were supplied;
//! `try_build()` is always available and reports what is missing.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use titrator_traits::{Clock, FrameSource, MonotonicClock, SerialLink};

use crate::color::{HsvRange, ReferenceColors};
use crate::color_sampler::SampleRegion;
use crate::config::{ControlCfg, DetectionCfg, PumpCfg, RinseCfg};
use crate::controller::{Settings, TitrationController};
use crate::detector::ChangeThresholds;
use crate::error::{BuildError, Result};
use crate::pump::PumpController;

// Type-state markers for the builder
pub struct Missing;
pub struct Set;

pub struct TitrationControllerBuilder<C, L> {
    camera: Option<Box<dyn FrameSource + Send>>,
    link: Option<Box<dyn SerialLink + Send>>,
    pump: Option<PumpCfg>,
    detection: Option<DetectionCfg>,
    control: Option<ControlCfg>,
    rinse: Option<RinseCfg>,
    region: Option<SampleRegion>,
    mask: Option<HsvRange>,
    reference: Option<ReferenceColors>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    _c: PhantomData<C>,
    _l: PhantomData<L>,
}

impl Default for TitrationControllerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            camera: None,
            link: None,
            pump: None,
            detection: None,
            control: None,
            rinse: None,
            region: None,
            mask: None,
            reference: None,
            clock: None,
            _c: PhantomData,
            _l: PhantomData,
        }
    }
}

impl TitrationController {
    pub fn builder() -> TitrationControllerBuilder<Missing, Missing> {
        TitrationControllerBuilder::default()
    }
}

impl<C, L> TitrationControllerBuilder<C, L> {
    fn retype<C2, L2>(self) -> TitrationControllerBuilder<C2, L2> {
        TitrationControllerBuilder {
            camera: self.camera,
            link: self.link,
            pump: self.pump,
            detection: self.detection,
            control: self.control,
            rinse: self.rinse,
            region: self.region,
            mask: self.mask,
            reference: self.reference,
            clock: self.clock,
            _c: PhantomData,
            _l: PhantomData,
        }
    }

    pub fn camera(
        mut self,
        camera: impl FrameSource + Send + 'static,
    ) -> TitrationControllerBuilder<Set, L> {
        self.camera = Some(Box::new(camera));
        self.retype()
    }

    pub fn pump_link(
        mut self,
        link: impl SerialLink + Send + 'static,
    ) -> TitrationControllerBuilder<C, Set> {
        self.link = Some(Box::new(link));
        self.retype()
    }

    pub fn with_pump(mut self, pump: PumpCfg) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn with_detection(mut self, detection: DetectionCfg) -> Self {
        self.detection = Some(detection);
        self
    }

    pub fn with_control(mut self, control: ControlCfg) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_rinse(mut self, rinse: RinseCfg) -> Self {
        self.rinse = Some(rinse);
        self
    }

    pub fn with_region(mut self, region: SampleRegion) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_mask(mut self, mask: HsvRange) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_reference(mut self, reference: ReferenceColors) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Inject a clock (tests use a manual one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Apply every section of a loaded config file.
    pub fn apply_config(mut self, cfg: &titrator_config::Config) -> Result<Self> {
        self.pump = Some(PumpCfg::try_from(&cfg.pump)?);
        self.detection = Some(DetectionCfg::from(&cfg.detection));
        self.control = Some(ControlCfg::from(cfg));
        self.rinse = Some(RinseCfg::try_from(&cfg.rinse)?);
        if let Some(r) = &cfg.region {
            self.region = Some(SampleRegion::try_from(r)?);
        }
        if let Some(m) = &cfg.mask {
            self.mask = Some(HsvRange::try_from(m)?);
        }
        Ok(self)
    }

    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<TitrationController> {
        let camera = self
            .camera
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCamera))?;
        let link = self
            .link
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPump))?;

        let pump = self.pump.unwrap_or_default();
        let detection = self.detection.unwrap_or_default();
        let control = self.control.unwrap_or_default();
        let rinse = self.rinse.unwrap_or_default();

        let ChangeThresholds {
            threshold,
            threshold_times,
        } = detection.thresholds;
        ChangeThresholds::new(threshold, threshold_times).map_err(|e| {
            eyre::Report::new(BuildError::InvalidConfig(e.to_string()))
        })?;
        if !(control.confirm_secs.is_finite() && control.confirm_secs > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "confirm window must be > 0 s".into(),
            )));
        }
        if control.sample_period.is_zero() || control.frame_timeout.is_zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "sample period and frame timeout must be non-zero".into(),
            )));
        }
        if control.max_frame_failures == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "max_frame_failures must be >= 1".into(),
            )));
        }
        if rinse.duration < Duration::from_secs(1) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "rinse duration must be at least 1 s".into(),
            )));
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };
        let controller = PumpController::new(link, pump.model, pump.settle, clock.clone());
        let settings = Settings {
            pump,
            detection,
            control,
            rinse,
            region: self.region,
            mask: self.mask,
        };
        Ok(TitrationController::new(
            camera,
            controller,
            settings,
            self.reference,
            clock,
        ))
    }
}

impl TitrationControllerBuilder<Set, Set> {
    pub fn build(self) -> Result<TitrationController> {
        self.try_build()
    }
}
