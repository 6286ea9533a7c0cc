//! Controller lifecycle against simulated hardware.
//!
//! Runs that depend on timing use the manual clock: only the active worker
//! advances it, so a run sees the camera script exactly as written.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use titrator_core::error::titrator_error;
use titrator_core::mocks::NoopCamera;
use titrator_core::{
    ControlCfg, PumpCfg, PumpModel, PumpRate, RinseCfg, SampleRegion, TitrationController,
    TitrationEvent, TitrationState, TitratorError, ZoneColor, ZoneColors,
};
use titrator_hardware::{LinkHandle, RecordingLink, SimulatedCamera};
use titrator_traits::MonotonicClock;
use titrator_traits::clock::test_clock::TestClock;

const GREEN: [u8; 3] = [0, 255, 0];
const BLUE: [u8; 3] = [0, 0, 255];

fn green_reference() -> ZoneColors {
    ZoneColors::uniform(ZoneColor::new(60.0, 255.0, 255.0))
}

fn pump_cfg(settle: Duration) -> PumpCfg {
    PumpCfg {
        model: PumpModel::Arduino,
        rate: PumpRate::parse("06.00").unwrap(),
        settle,
    }
}

fn region() -> SampleRegion {
    SampleRegion::new(8, 8, 48, 32).unwrap()
}

fn wait_for(
    rx: &Receiver<TitrationEvent>,
    within: Duration,
    pred: impl Fn(&TitrationEvent) -> bool,
) -> Option<TitrationEvent> {
    let deadline = Instant::now() + within;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(ev) if pred(&ev) => return Some(ev),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

fn is_invalid_state(r: titrator_core::Result<()>) -> bool {
    match r {
        Err(e) => matches!(titrator_error(&e), Some(TitratorError::InvalidState(_))),
        Ok(()) => false,
    }
}

fn controller(clock: &TestClock, camera: SimulatedCamera) -> (TitrationController, LinkHandle) {
    let link = RecordingLink::new();
    let handle = link.handle();
    let c = TitrationController::builder()
        .camera(camera)
        .pump_link(link)
        .with_pump(pump_cfg(Duration::from_millis(100)))
        .with_region(region())
        .with_reference(green_reference())
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    (c, handle)
}

#[test]
fn run_reaches_endpoint_and_falls_back_to_preview() {
    let clock = TestClock::new();
    // Blip at 10 s, back to green at 11 s, sustained change from 30 s.
    let camera = SimulatedCamera::new(64, 48, GREEN, Arc::new(clock.clone()))
        .then_at(Duration::from_secs(10), BLUE)
        .then_at(Duration::from_secs(11), GREEN)
        .then_at(Duration::from_secs(30), BLUE);
    let (mut c, link) = controller(&clock, camera);
    let events = c.events();

    c.start_run().unwrap();

    let ev = wait_for(&events, Duration::from_secs(10), |e| {
        matches!(e, TitrationEvent::Endpoint(_))
    })
    .expect("endpoint event");
    let TitrationEvent::Endpoint(report) = ev else {
        unreachable!()
    };
    // Billed for roughly the 30 s before the sustained change, at 0.1 mL/s.
    assert!(
        (report.volume_ml - 3.0).abs() < 0.2,
        "volume {}",
        report.volume_ml
    );

    wait_for(&events, Duration::from_secs(5), |e| {
        matches!(e, TitrationEvent::Stopped)
    })
    .expect("stopped after endpoint");
    let snap = c.snapshot();
    assert_eq!(snap.state, TitrationState::Previewing);
    assert_eq!(snap.last_endpoint, Some(report));
    assert_eq!(snap.volume_ml, 0.0);
    assert!(!snap.endpoint_reached);

    // Endpoint already finished the run.
    assert!(is_invalid_state(c.stop()));

    let lines = link.lines();
    assert!(lines.iter().any(|l| l == "RUN\n"));
    assert!(lines.contains(&"SETRATE 0600\n".to_string()));

    c.release().unwrap();
    assert!(link.is_closed());
    assert_eq!(link.last_line().as_deref(), Some("STOP\n"));
    assert!(is_invalid_state(c.release()));
    assert_eq!(c.state(), TitrationState::Idle);
}

#[test]
fn stop_resets_and_resumes_preview() {
    let clock = TestClock::new();
    // Never changes, so the run only ends when stopped.
    let camera = SimulatedCamera::new(64, 48, GREEN, Arc::new(clock.clone()));
    let (mut c, link) = controller(&clock, camera);
    assert!(is_invalid_state(c.stop()));

    c.start_preview().unwrap();
    assert_eq!(c.state(), TitrationState::Previewing);
    c.start_run().unwrap();
    assert_eq!(c.state(), TitrationState::Running);
    assert!(is_invalid_state(c.rinse()));
    assert!(is_invalid_state(c.set_rate("07.00")));
    // Already running: no-op.
    c.start_run().unwrap();
    c.stop().unwrap();

    let snap = c.snapshot();
    assert_eq!(snap.state, TitrationState::Previewing);
    assert_eq!(snap.volume_ml, 0.0);
    assert_eq!(snap.elapsed_s, 0.0);
    assert!(!snap.endpoint_reached);
    // Stop, then restore the configured rate.
    let lines = link.lines();
    let n = lines.len();
    assert_eq!(&lines[n - 2..], ["STOP\n", "SETRATE 0600\n"]);

    c.set_rate("07.50").unwrap();
    assert_eq!(c.snapshot().rate, "07.50");
    assert_eq!(link.last_line().as_deref(), Some("SETRATE 0750\n"));
}

#[test]
fn run_from_idle_programs_rate_before_starting() {
    let clock = TestClock::new();
    let camera = SimulatedCamera::new(64, 48, GREEN, Arc::new(clock.clone()));
    let (mut c, link) = controller(&clock, camera);

    c.start_run().unwrap();
    let lines = link.lines();
    let set = lines.iter().position(|l| l == "SETRATE 0600\n");
    let run = lines.iter().position(|l| l == "RUN\n");
    assert!(
        matches!((set, run), (Some(s), Some(r)) if s < r),
        "lines: {lines:?}"
    );
    c.stop().unwrap();
}

#[test]
fn failed_stop_still_resumes_preview() {
    let clock = TestClock::new();
    let camera = SimulatedCamera::new(64, 48, GREEN, Arc::new(clock.clone()));
    let (mut c, link) = controller(&clock, camera);

    c.start_run().unwrap();
    link.set_fail_writes(true);
    assert!(c.stop().is_err());
    assert_eq!(c.state(), TitrationState::Previewing);

    // The controller is usable again once the link recovers.
    link.set_fail_writes(false);
    c.start_run().unwrap();
    assert_eq!(c.state(), TitrationState::Running);
    c.stop().unwrap();
    assert_eq!(c.state(), TitrationState::Previewing);
}

#[test]
fn run_requires_a_region() {
    let clock = TestClock::new();
    let camera = SimulatedCamera::new(64, 48, GREEN, Arc::new(clock.clone()));
    let mut c = TitrationController::builder()
        .camera(camera)
        .pump_link(RecordingLink::new())
        .with_clock(Arc::new(clock))
        .build()
        .unwrap();
    assert!(is_invalid_state(c.start_run()));
    assert!(SampleRegion::new(0, 0, 10, 10).is_err());
    c.set_sample_region(region()).unwrap();
    c.start_run().unwrap();
    c.stop().unwrap();
}

#[test]
fn repeated_capture_failures_release_hardware() {
    let clock = TestClock::new();
    let link = RecordingLink::new();
    let handle = link.handle();
    let mut c = TitrationController::builder()
        .camera(NoopCamera)
        .pump_link(link)
        .with_pump(pump_cfg(Duration::ZERO))
        .with_region(region())
        .with_control(ControlCfg {
            max_frame_failures: 3,
            ..ControlCfg::default()
        })
        .with_clock(Arc::new(clock))
        .build()
        .unwrap();
    let events = c.events();

    c.start_run().unwrap();
    let fault = wait_for(&events, Duration::from_secs(5), |e| {
        matches!(e, TitrationEvent::Fault(_))
    });
    assert!(matches!(
        fault,
        Some(TitrationEvent::Fault(TitratorError::Titration(_)))
    ));
    assert_eq!(c.state(), TitrationState::Idle);
    assert!(handle.is_closed());
    assert!(is_invalid_state(c.start_run()));

    // First release after a fault succeeds; the second does not.
    c.release().unwrap();
    assert!(is_invalid_state(c.release()));
}

#[test]
fn rinse_excludes_runs_and_restores_rate() {
    let camera = SimulatedCamera::new(64, 48, GREEN, Arc::new(MonotonicClock::new()));
    let link = RecordingLink::new();
    let handle = link.handle();
    let mut c = TitrationController::builder()
        .camera(camera)
        .pump_link(link)
        .with_pump(pump_cfg(Duration::ZERO))
        .with_rinse(RinseCfg {
            rate: PumpRate::parse("15.00").unwrap(),
            duration: Duration::from_secs(1),
        })
        .with_region(region())
        .build()
        .unwrap();
    let events = c.events();

    c.start_preview().unwrap();
    c.rinse().unwrap();
    assert!(c.snapshot().rinsing);
    assert!(is_invalid_state(c.start_run()));
    assert!(is_invalid_state(c.rinse()));

    wait_for(&events, Duration::from_secs(5), |e| {
        matches!(e, TitrationEvent::RinseFinished)
    })
    .expect("rinse finished");
    c.wait_rinse();
    assert!(!c.snapshot().rinsing);

    let lines = handle.lines();
    let n = lines.len();
    assert_eq!(
        &lines[n - 4..],
        ["SETRATE 1500\n", "RUN\n", "SETRATE 0600\n", "STOP\n"]
    );
    c.start_run().unwrap();
    c.release().unwrap();
}

#[test]
fn calibration_from_the_live_view() {
    let camera = SimulatedCamera::new(64, 48, GREEN, Arc::new(MonotonicClock::new()));
    let mut c = TitrationController::builder()
        .camera(camera)
        .pump_link(RecordingLink::new())
        .with_pump(pump_cfg(Duration::ZERO))
        .with_control(ControlCfg {
            sample_period: Duration::from_millis(10),
            ..ControlCfg::default()
        })
        .with_region(region())
        .build()
        .unwrap();

    assert!(c.calibrate_from_current_frame().is_err());
    c.start_preview().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while c.snapshot().zones.is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let reference = c.calibrate_from_current_frame().unwrap();
    assert_eq!(reference, green_reference());
    assert_eq!(c.snapshot().reference, Some(reference));

    let mask = c.auto_mask_from_current_frame().unwrap();
    assert_eq!(mask.lower, [50, 215, 215]);
    assert_eq!(mask.upper, [70, 255, 255]);

    // A new region invalidates the reference.
    c.set_sample_region(SampleRegion::new(0, 0, 32, 32).unwrap())
        .unwrap();
    assert_eq!(c.snapshot().reference, None);
}
