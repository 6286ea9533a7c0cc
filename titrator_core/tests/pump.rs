use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use titrator_core::error::titrator_error;
use titrator_core::{PumpController, PumpDrive, PumpModel, PumpRate, TitratorError};
use titrator_hardware::{LinkHandle, RecordingLink};
use titrator_traits::clock::test_clock::TestClock;

fn pump(model: PumpModel) -> (PumpController, LinkHandle, TestClock) {
    let link = RecordingLink::new();
    let handle = link.handle();
    let clock = TestClock::new();
    let p = PumpController::new(
        Box::new(link),
        model,
        Duration::from_millis(100),
        Arc::new(clock.clone()),
    );
    (p, handle, clock)
}

#[rstest]
#[case(PumpModel::Arduino, "5.25", &["SETRATE 0525\n"])]
#[case(PumpModel::Arduino, "12.3", &["SETRATE 1230\n"])]
#[case(PumpModel::Harvard, "5.25", &["MLM 5.25\n"])]
#[case(PumpModel::Harvard, "05.00", &["MLM 5.0\n"])]
#[case(PumpModel::Qhzs, "12.5", &["Q1H12D\n", "Q2H5D\n", "Q6H1D\n"])]
fn set_rate_wire_format(
    #[case] model: PumpModel,
    #[case] rate: &str,
    #[case] expected: &[&str],
) {
    let (mut p, h, _) = pump(model);
    p.set_rate(&PumpRate::parse(rate).unwrap()).unwrap();
    assert_eq!(h.lines(), expected);
}

#[rstest]
#[case(PumpModel::Arduino, "RUN\n", "STOP\n")]
#[case(PumpModel::Harvard, "RUN\n", "STP\n")]
#[case(PumpModel::Qhzs, "Q6H2D\n", "Q6H6D\n")]
fn start_stop_commands(#[case] model: PumpModel, #[case] start: &str, #[case] stop: &str) {
    let (mut p, h, _) = pump(model);
    p.start().unwrap();
    p.stop().unwrap();
    assert_eq!(h.lines(), [start, stop]);
}

#[test]
fn every_command_waits_the_settle_delay() {
    let (mut p, _, clock) = pump(PumpModel::Qhzs);
    p.set_rate(&PumpRate::parse("05.00").unwrap()).unwrap();
    p.start().unwrap();
    assert_eq!(clock.elapsed(), Duration::from_millis(400));
}

#[test]
fn release_stops_closes_and_is_terminal() {
    let (mut p, h, _) = pump(PumpModel::Arduino);
    p.start().unwrap();
    p.release().unwrap();
    assert!(p.is_released());
    assert!(h.is_closed());
    assert_eq!(h.last_line().as_deref(), Some("STOP\n"));

    let again = p.release().unwrap_err();
    assert!(matches!(
        titrator_error(&again),
        Some(TitratorError::InvalidState(_))
    ));
    let start = p.start().unwrap_err();
    assert!(matches!(
        titrator_error(&start),
        Some(TitratorError::InvalidState(_))
    ));
    assert_eq!(h.lines().len(), 2);
}

#[test]
fn write_failure_is_a_hardware_error() {
    let (mut p, h, _) = pump(PumpModel::Arduino);
    h.set_fail_writes(true);
    let err = p.start().unwrap_err();
    assert!(matches!(
        titrator_error(&err),
        Some(TitratorError::Hardware(_))
    ));
    // The link still gets closed on release even though the stop failed.
    assert!(p.release().is_err());
    assert!(h.is_closed());
}
