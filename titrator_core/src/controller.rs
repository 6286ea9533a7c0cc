//! Threaded titration controller.
//!
//! One worker thread at a time owns the camera. It runs either the preview
//! loop or the titration loop (falling through to preview after an endpoint),
//! and hands the camera back when it is joined. The mode flag decides which
//! loop may iterate; every loop checks it once per tick.
//!
//! Pump commands from the titration loop and the rinse thread go through the
//! same mutex, so a rinse can never interleave with a start/stop.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as xch;
use eyre::WrapErr;
use titrator_traits::{Clock, Frame, FrameSource};

use crate::color::{HsvRange, ReferenceColors};
use crate::color_sampler::{ColorSampler, SampleRegion};
use crate::config::{ControlCfg, DetectionCfg, PumpCfg, RinseCfg};
use crate::detector::ChangeDetector;
use crate::error::{Result, TitratorError};
use crate::events::{EventSink, TitrationEvent};
use crate::pump::{PumpController, PumpDrive, PumpRate};
use crate::status::{StatusSnapshot, TitrationState, TitrationStatus};
use crate::titrator::{Titrator, TitratorParts};

pub type Camera = Box<dyn FrameSource + Send>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn invalid_state(msg: impl Into<String>) -> eyre::Report {
    eyre::Report::new(TitratorError::InvalidState(msg.into()))
}

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) pump: PumpCfg,
    pub(crate) detection: DetectionCfg,
    pub(crate) control: ControlCfg,
    pub(crate) rinse: RinseCfg,
    pub(crate) region: Option<SampleRegion>,
    pub(crate) mask: Option<HsvRange>,
}

impl Settings {
    fn active_mask(&self) -> Option<HsvRange> {
        if self.detection.use_mask { self.mask } else { None }
    }
}

struct Shared {
    mode: AtomicU8,
    rinsing: AtomicBool,
    pump: Mutex<Option<PumpController>>,
    settings: Mutex<Settings>,
    reference: Mutex<Option<ReferenceColors>>,
    status: Mutex<StatusSnapshot>,
    latest_frame: Mutex<Option<Frame>>,
    events: EventSink,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Shared {
    fn mode(&self) -> TitrationState {
        TitrationState::from_u8(self.mode.load(Ordering::Acquire))
    }

    fn set_mode(&self, m: TitrationState) {
        self.mode.store(m as u8, Ordering::Release);
    }

    fn transition(&self, from: TitrationState, to: TitrationState) -> bool {
        self.mode
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn with_pump<T>(&self, f: impl FnOnce(&mut PumpController) -> Result<T>) -> Result<T> {
        let mut guard = lock(&self.pump);
        match guard.as_mut() {
            Some(p) => f(p),
            None => Err(invalid_state("pump has been released")),
        }
    }

    fn pump_released(&self) -> bool {
        lock(&self.pump).is_none()
    }

    /// Release the pump if still held. `Ok(false)` when it already was.
    fn release_pump(&self) -> Result<bool> {
        let taken = lock(&self.pump).take();
        match taken {
            Some(mut p) => p.release().map(|()| true),
            None => Ok(false),
        }
    }

    fn settings(&self) -> Settings {
        lock(&self.settings).clone()
    }

    fn clear_run_status(&self) {
        let mut st = lock(&self.status);
        st.volume_ml = 0.0;
        st.elapsed_s = 0.0;
        st.endpoint_reached = false;
        st.near_endpoint = false;
    }
}

/// Routes a titrator's pump calls through the shared, locked pump.
struct SharedPump(Arc<Shared>);

impl PumpDrive for SharedPump {
    fn set_rate(&mut self, rate: &PumpRate) -> Result<()> {
        self.0.with_pump(|p| p.set_rate(rate))
    }

    fn start(&mut self) -> Result<()> {
        self.0.with_pump(|p| p.start())
    }

    fn stop(&mut self) -> Result<()> {
        self.0.with_pump(|p| p.stop())
    }

    fn release(&mut self) -> Result<()> {
        self.0.release_pump().map(|_| ())
    }
}

struct WorkerExit {
    camera: Camera,
    outcome: Result<()>,
}

pub struct TitrationController {
    shared: Arc<Shared>,
    camera: Option<Camera>,
    worker: Option<JoinHandle<WorkerExit>>,
    rinse: Option<JoinHandle<()>>,
    events_rx: xch::Receiver<TitrationEvent>,
    released: bool,
}

impl std::fmt::Debug for TitrationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TitrationController")
            .field("state", &self.shared.mode())
            .field("rinsing", &self.shared.rinsing.load(Ordering::Relaxed))
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl TitrationController {
    pub(crate) fn new(
        camera: Camera,
        pump: PumpController,
        settings: Settings,
        reference: Option<ReferenceColors>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let (events, events_rx) = EventSink::channel();
        let status = StatusSnapshot {
            rate: settings.pump.rate.to_string(),
            reference,
            ..StatusSnapshot::default()
        };
        Self {
            shared: Arc::new(Shared {
                mode: AtomicU8::new(TitrationState::Idle as u8),
                rinsing: AtomicBool::new(false),
                pump: Mutex::new(Some(pump)),
                settings: Mutex::new(settings),
                reference: Mutex::new(reference),
                status: Mutex::new(status),
                latest_frame: Mutex::new(None),
                events,
                clock,
            }),
            camera: Some(camera),
            worker: None,
            rinse: None,
            events_rx,
            released: false,
        }
    }

    /// Receiver for the operator event stream. Clones share one queue.
    pub fn events(&self) -> xch::Receiver<TitrationEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> TitrationState {
        self.shared.mode()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let mut s = lock(&self.shared.status).clone();
        s.state = self.shared.mode();
        s.rinsing = self.shared.rinsing.load(Ordering::Acquire);
        s.rate = lock(&self.shared.settings).pump.rate.to_string();
        s.reference = *lock(&self.shared.reference);
        s
    }

    /// Program the configured rate and begin preview sampling.
    pub fn start_preview(&mut self) -> Result<()> {
        self.ensure_not_released()?;
        match self.shared.mode() {
            TitrationState::Idle => {}
            TitrationState::Previewing => return Ok(()),
            other => return Err(invalid_state(format!("cannot preview while {other}"))),
        }
        let rate = self.shared.settings().pump.rate;
        self.shared
            .with_pump(|p| p.set_rate(&rate))
            .wrap_err("program pump rate")?;
        self.shared.set_mode(TitrationState::Previewing);
        self.spawn_worker(None)?;
        self.shared.events.emit(TitrationEvent::Ready);
        Ok(())
    }

    /// Start a titration run. A no-op when one is already running.
    pub fn start_run(&mut self) -> Result<()> {
        self.ensure_not_released()?;
        let prev = self.shared.mode();
        match prev {
            TitrationState::Running => return Ok(()),
            TitrationState::Stopped => return Err(invalid_state("controller is stopping")),
            TitrationState::Idle | TitrationState::Previewing => {}
        }
        if self.shared.rinsing.load(Ordering::Acquire) {
            return Err(invalid_state("cannot start a run while rinsing"));
        }
        let settings = self.shared.settings();
        let Some(region) = settings.region else {
            return Err(invalid_state("no sample region set"));
        };

        if self.shared.pump_released() {
            return Err(invalid_state("pump has been released"));
        }

        // Park the preview worker and take the camera back.
        self.shared.set_mode(TitrationState::Stopped);
        if let Err(e) = self.join_worker() {
            if self.camera.is_none() {
                self.shared.set_mode(TitrationState::Idle);
                return Err(e);
            }
            tracing::warn!(error = %format!("{e:#}"), "previous loop ended with an error");
        }

        // Preview programs the rate on entry; a run straight from Idle must too.
        if prev == TitrationState::Idle
            && let Err(e) = self
                .shared
                .with_pump(|p| p.set_rate(&settings.pump.rate))
                .wrap_err("program pump rate")
        {
            self.shared.set_mode(TitrationState::Idle);
            return Err(e);
        }

        let mut detector = ChangeDetector::new(settings.detection.thresholds);
        if let Some(r) = *lock(&self.shared.reference) {
            detector.calibrate(r);
        }
        let mut titrator = Titrator::new(
            SharedPump(self.shared.clone()),
            TitratorParts {
                detector,
                region,
                mask: settings.active_mask(),
                rate: settings.pump.rate.clone(),
                confirm_secs: settings.control.confirm_secs,
                clock: self.shared.clock.clone(),
                events: self.shared.events.clone(),
            },
        );

        if let Err(e) = titrator.begin() {
            // Leave the pump stopped and go back to where we were.
            if let Err(stop_err) = titrator.stop() {
                tracing::warn!(error = %stop_err, "stop after failed start");
            }
            self.shared.set_mode(prev);
            if prev == TitrationState::Previewing {
                self.spawn_worker(None)?;
            }
            return Err(e);
        }

        self.shared.clear_run_status();
        self.shared.set_mode(TitrationState::Running);
        self.shared.events.emit(TitrationEvent::RunStarted {
            rate: settings.pump.rate.to_string(),
        });
        self.spawn_worker(Some(titrator))
    }

    /// Stop the active run: pump stopped, rate restored, ledger and timers
    /// zeroed, preview resumed.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_not_released()?;
        if !self
            .shared
            .transition(TitrationState::Running, TitrationState::Stopped)
        {
            return Err(invalid_state(format!(
                "stop requires a running titration (state: {})",
                self.shared.mode()
            )));
        }
        // A failed pump stop is reported after preview resumes.
        let outcome = self.join_worker();
        if self.shared.pump_released() || self.camera.is_none() {
            // The loop faulted or died while we were stopping it.
            self.shared.set_mode(TitrationState::Idle);
            return outcome;
        }
        self.shared.clear_run_status();
        self.shared.events.emit(TitrationEvent::Stopped);
        self.shared.set_mode(TitrationState::Previewing);
        self.spawn_worker(None)?;
        outcome
    }

    /// Run the pump at the rinse rate for the rinse duration on its own thread,
    /// then restore the configured rate and stop.
    pub fn rinse(&mut self) -> Result<()> {
        self.ensure_not_released()?;
        if self.shared.mode() == TitrationState::Running {
            return Err(invalid_state("cannot rinse while a titration is running"));
        }
        if self.shared.rinsing.swap(true, Ordering::AcqRel) {
            return Err(invalid_state("a rinse is already in progress"));
        }
        if let Some(h) = self.rinse.take()
            && h.join().is_err()
        {
            tracing::warn!("previous rinse thread panicked");
        }

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("titrator-rinse".into())
            .spawn(move || {
                let cfg = shared.settings();
                shared.events.emit(TitrationEvent::RinseStarted {
                    rate: cfg.rinse.rate.to_string(),
                    duration_s: cfg.rinse.duration.as_secs(),
                });
                match run_rinse(&shared, &cfg.rinse) {
                    Ok(()) => shared.events.emit(TitrationEvent::RinseFinished),
                    Err(e) => {
                        let err = crate::error::titrator_error(&e)
                            .cloned()
                            .unwrap_or_else(|| TitratorError::Hardware(format!("{e:#}")));
                        shared.events.emit(TitrationEvent::RinseFailed(err));
                    }
                }
                shared.rinsing.store(false, Ordering::Release);
            });
        match spawned {
            Ok(h) => {
                self.rinse = Some(h);
                Ok(())
            }
            Err(e) => {
                self.shared.rinsing.store(false, Ordering::Release);
                Err(eyre::Report::new(TitratorError::Hardware(format!(
                    "spawn rinse thread: {e}"
                ))))
            }
        }
    }

    /// Wait for a running rinse to finish.
    pub fn wait_rinse(&mut self) {
        if let Some(h) = self.rinse.take()
            && h.join().is_err()
        {
            tracing::warn!("rinse thread panicked");
        }
    }

    /// Stop everything and close the pump link. Terminal.
    pub fn release(&mut self) -> Result<()> {
        self.ensure_not_released()?;
        self.released = true;
        self.shared.set_mode(TitrationState::Idle);
        if let Err(e) = self.join_worker() {
            tracing::warn!(error = %format!("{e:#}"), "loop ended with an error before release");
        }
        let released = self.shared.release_pump();
        self.wait_rinse();
        self.shared.clear_run_status();
        self.shared.events.emit(TitrationEvent::Released);
        released.map(|_| ())
    }

    /// Change the configured rate. Rejected while a run is billing at the old rate.
    pub fn set_rate(&mut self, rate: &str) -> Result<()> {
        self.ensure_not_released()?;
        if self.shared.mode() == TitrationState::Running {
            return Err(invalid_state("cannot change the rate during a run"));
        }
        let rate = PumpRate::parse(rate)?;
        lock(&self.shared.settings).pump.rate = rate.clone();
        // A running rinse restores the new rate itself when it ends.
        if !self.shared.rinsing.load(Ordering::Acquire) {
            self.shared.with_pump(|p| p.set_rate(&rate))?;
        }
        tracing::info!(%rate, "rate updated");
        Ok(())
    }

    /// Install a new sample region. Clears the reference colors.
    pub fn set_sample_region(&mut self, region: SampleRegion) -> Result<()> {
        self.ensure_idle_or_previewing("set the sample region")?;
        lock(&self.shared.settings).region = Some(region);
        *lock(&self.shared.reference) = None;
        lock(&self.shared.status).zones = None;
        tracing::info!(?region, "sample region set");
        Ok(())
    }

    pub fn set_mask(&mut self, mask: Option<HsvRange>) -> Result<()> {
        self.ensure_idle_or_previewing("change the mask")?;
        lock(&self.shared.settings).mask = mask;
        Ok(())
    }

    /// Install reference colors supplied by the calibration collaborator.
    pub fn calibrate(&mut self, reference: ReferenceColors) -> Result<()> {
        self.ensure_idle_or_previewing("calibrate")?;
        *lock(&self.shared.reference) = Some(reference);
        tracing::info!(reference = %reference, "reference installed");
        Ok(())
    }

    /// Use the zones of the latest preview sample as the reference.
    pub fn calibrate_from_current_frame(&mut self) -> Result<ReferenceColors> {
        let zones = lock(&self.shared.status)
            .zones
            .ok_or_else(|| invalid_state("no preview sample available yet"))?;
        self.calibrate(zones)?;
        Ok(zones)
    }

    /// Seed the mask around the mean color of the region in the latest frame.
    pub fn auto_mask_from_current_frame(&mut self) -> Result<HsvRange> {
        self.ensure_idle_or_previewing("change the mask")?;
        let region = lock(&self.shared.settings)
            .region
            .ok_or_else(|| invalid_state("no sample region set"))?;
        let mean = {
            let frame = lock(&self.shared.latest_frame);
            let frame = frame
                .as_ref()
                .ok_or_else(|| invalid_state("no preview frame available yet"))?;
            ColorSampler::new().region_mean(frame, &region)?
        };
        let mask = HsvRange::around(mean);
        lock(&self.shared.settings).mask = Some(mask);
        tracing::info!(lower = ?mask.lower, upper = ?mask.upper, "mask seeded from region");
        Ok(mask)
    }

    fn ensure_not_released(&self) -> Result<()> {
        if self.released {
            return Err(invalid_state("controller has been released"));
        }
        Ok(())
    }

    fn ensure_idle_or_previewing(&self, what: &str) -> Result<()> {
        self.ensure_not_released()?;
        match self.shared.mode() {
            TitrationState::Idle | TitrationState::Previewing => Ok(()),
            other => Err(invalid_state(format!("cannot {what} while {other}"))),
        }
    }

    fn spawn_worker(&mut self, titrator: Option<Titrator<SharedPump>>) -> Result<()> {
        let Some(camera) = self.camera.take() else {
            return Err(invalid_state("camera is held by another loop"));
        };
        let shared = self.shared.clone();
        let name = if titrator.is_some() {
            "titrator-run"
        } else {
            "titrator-preview"
        };
        let spawned = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_main(&shared, camera, titrator));
        match spawned {
            Ok(h) => {
                self.worker = Some(h);
                Ok(())
            }
            Err(e) => {
                // The camera went down with the closure.
                self.shared.set_mode(TitrationState::Idle);
                Err(eyre::Report::new(TitratorError::Titration(format!(
                    "spawn {name} thread: {e}"
                ))))
            }
        }
    }

    /// Join the current worker and take the camera back.
    fn join_worker(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(exit) => {
                self.camera = Some(exit.camera);
                exit.outcome
            }
            Err(_) => Err(eyre::Report::new(TitratorError::Titration(
                "worker thread panicked; camera lost".into(),
            ))),
        }
    }
}

impl Drop for TitrationController {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.release()
        {
            tracing::warn!(error = %e, "release on drop failed");
        }
    }
}

fn worker_main(
    shared: &Arc<Shared>,
    mut camera: Camera,
    titrator: Option<Titrator<SharedPump>>,
) -> WorkerExit {
    let mut outcome = Ok(());
    if let Some(t) = titrator {
        outcome = titration_loop(shared, camera.as_mut(), t);
    }
    preview_loop(shared, camera.as_mut());
    WorkerExit { camera, outcome }
}

fn titration_loop(
    shared: &Arc<Shared>,
    camera: &mut (dyn FrameSource + Send),
    mut titrator: Titrator<SharedPump>,
) -> Result<()> {
    let ControlCfg {
        sample_period,
        frame_timeout,
        max_frame_failures,
        ..
    } = shared.settings().control;
    let mut failures: u32 = 0;

    loop {
        if shared.mode() != TitrationState::Running {
            // Stopped or released from outside: leave the pump stopped.
            return titrator.stop();
        }

        let frame = match camera.frame(frame_timeout) {
            Ok(f) => {
                failures = 0;
                f
            }
            Err(e) => {
                failures += 1;
                let err = crate::hw_error::map_hw_error(&*e, crate::hw_error::Seam::Camera);
                tracing::warn!(error = %err, failures, "frame capture failed");
                if failures > max_frame_failures {
                    return fault(
                        shared,
                        &mut titrator,
                        eyre::Report::new(err)
                            .wrap_err(format!("{failures} consecutive capture failures")),
                    );
                }
                shared.clock.sleep(sample_period);
                continue;
            }
        };

        let status = titrator.step(&frame);
        *lock(&shared.latest_frame) = Some(frame);
        match status {
            Ok(TitrationStatus::Endpoint(report)) => {
                publish(shared, &titrator);
                lock(&shared.status).last_endpoint = Some(report);
                let stopped = titrator.stop();
                shared.clear_run_status();
                if let Err(e) = &stopped {
                    tracing::error!(error = %e, "stopping after endpoint failed");
                }
                if shared.transition(TitrationState::Running, TitrationState::Previewing) {
                    shared.events.emit(TitrationEvent::Stopped);
                }
                return stopped;
            }
            Ok(_) => publish(shared, &titrator),
            Err(e) => return fault(shared, &mut titrator, e),
        }

        shared.clock.sleep(sample_period);
    }
}

fn publish(shared: &Shared, titrator: &Titrator<SharedPump>) {
    let ledger = titrator.ledger();
    {
        let mut st = lock(&shared.status);
        st.volume_ml = ledger.volume_ml;
        st.elapsed_s = ledger.elapsed_s;
        st.endpoint_reached = titrator.endpoint_reached();
        st.near_endpoint = titrator.near_endpoint();
        st.zones = titrator.last_zones();
    }
    if let Some(r) = titrator.reference() {
        lock(&shared.reference).get_or_insert(r);
    }
}

/// Release the hardware, drop to Idle and report the failure.
fn fault(shared: &Shared, titrator: &mut Titrator<SharedPump>, cause: eyre::Report) -> Result<()> {
    tracing::error!(error = %format!("{cause:#}"), "titration loop failed; releasing hardware");
    if let Err(e) = titrator.release_pump() {
        tracing::error!(error = %e, "pump release after fault failed");
    }
    shared.set_mode(TitrationState::Idle);
    shared.clear_run_status();
    let err = TitratorError::Titration(format!("{cause:#}"));
    shared.events.emit(TitrationEvent::Fault(err.clone()));
    Err(cause.wrap_err(err))
}

fn preview_loop(shared: &Shared, camera: &mut (dyn FrameSource + Send)) {
    let sampler = ColorSampler::new();
    let mut failures: u32 = 0;
    while shared.mode() == TitrationState::Previewing {
        let settings = shared.settings();
        match camera.frame(settings.control.frame_timeout) {
            Ok(frame) => {
                failures = 0;
                if let Some(region) = settings.region {
                    let mask = settings.active_mask();
                    match sampler.sample(&frame, &region, mask.as_ref()) {
                        Ok(z) => lock(&shared.status).zones = Some(z),
                        Err(e) => tracing::debug!(error = %e, "preview sample failed"),
                    }
                }
                *lock(&shared.latest_frame) = Some(frame);
            }
            Err(e) => {
                failures += 1;
                if failures == settings.control.max_frame_failures {
                    tracing::warn!(error = %e, failures, "preview capture keeps failing");
                } else {
                    tracing::debug!(error = %e, "preview capture failed");
                }
            }
        }
        shared.clock.sleep(settings.control.sample_period);
    }
}

fn run_rinse(shared: &Shared, cfg: &RinseCfg) -> Result<()> {
    shared.with_pump(|p| p.set_rate(&cfg.rate))?;
    shared.with_pump(|p| p.start())?;
    let t0 = shared.clock.now();
    let slice = Duration::from_millis(100);
    loop {
        let elapsed = shared.clock.now().saturating_duration_since(t0);
        if elapsed >= cfg.duration {
            break;
        }
        if shared.pump_released() {
            return Err(invalid_state("pump released during rinse"));
        }
        shared.clock.sleep(slice.min(cfg.duration - elapsed));
    }
    let rate = lock(&shared.settings).pump.rate.clone();
    shared.with_pump(|p| p.set_rate(&rate))?;
    shared.with_pump(|p| p.stop())
}
