use rstest::rstest;
use titrator_config::{Config, PumpModel, RegionSection, load_toml};

const FULL: &str = r#"
[pump]
port = "/dev/ttyACM0"
baud = 9600
model = "qhzs"
rate = "07.50"
settle_ms = 100
open_delay_ms = 0

[camera]
index = 1
frame_timeout_ms = 250

[detection]
threshold = 25.0
threshold_times = 2.0
use_mask = false

[control]
sample_period_ms = 50
confirm_secs = 15.0
max_frame_failures = 3

[rinse]
rate = "15.00"
duration_s = 60

[region]
x = 10
y = 20
width = 90
height = 30

[mask]
lower = [20, 60, 60]
upper = [40, 140, 140]
"#;

#[test]
fn parses_full_config() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.pump.model, PumpModel::Qhzs);
    assert_eq!(cfg.pump.rate, "07.50");
    assert_eq!(
        cfg.region,
        Some(RegionSection {
            x: 10,
            y: 20,
            width: 90,
            height: 30
        })
    );
    assert!(!cfg.detection.use_mask);
    assert_eq!(cfg.mask.unwrap().upper, [40, 140, 140]);
}

#[rstest]
#[case("[pump]\nrate = \"5\"", "pump.rate")]
#[case("[detection]\nthreshold = 0.0", "detection.threshold must be > 0")]
#[case("[detection]\nthreshold_times = -1.0", "threshold_times")]
#[case("[control]\nconfirm_secs = 0.0", "confirm_secs")]
#[case("[control]\nmax_frame_failures = 0", "max_frame_failures")]
#[case("[camera]\nframe_timeout_ms = 0", "frame_timeout_ms")]
#[case("[rinse]\nrate = \"fast\"", "rinse.rate")]
#[case("[region]\nx = 0\ny = 0\nwidth = 15\nheight = 40", "larger than 15x15")]
#[case("[mask]\nlower = [0, 200, 0]\nupper = [179, 100, 255]", "mask.lower")]
#[case("[mask]\nlower = [0, 0, 0]\nupper = [200, 255, 255]", "hue bounds")]
#[case("[logging]\nrotation = \"weekly\"", "rotation")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected {needle:?} in {err}"
    );
}

#[test]
fn unknown_pump_model_is_a_parse_error() {
    assert!(load_toml("[pump]\nmodel = \"peristaltic9000\"").is_err());
}

#[test]
fn update_and_save_merges_into_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("titrator.toml");
    std::fs::write(&path, "[pump]\nport = \"/dev/ttyS3\"\n").unwrap();

    let saved = Config::update_and_save(&path, |c| {
        c.pump.rate = "12.30".into();
        c.detection.threshold = 20.0;
    })
    .expect("save");
    assert_eq!(saved.pump.port, "/dev/ttyS3");

    let reloaded = titrator_config::load_file(&path).expect("reload");
    assert_eq!(reloaded.pump.port, "/dev/ttyS3");
    assert_eq!(reloaded.pump.rate, "12.30");
    assert_eq!(reloaded.detection.threshold, 20.0);
    assert!(!path.with_extension("new").exists());
}

#[test]
fn update_and_save_refuses_invalid_edit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("titrator.toml");
    let err = Config::update_and_save(&path, |c| c.pump.rate = "fast".into())
        .expect_err("invalid edit");
    assert!(format!("{err}").contains("pump.rate"));
    assert!(!path.exists());
}
