use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Fast loop settings so a simulated run confirms in about two seconds.
const FAST: &str = r#"
[pump]
model = "arduino"
rate = "06.00"
settle_ms = 0
open_delay_ms = 0

[camera]
frame_timeout_ms = 200

[control]
sample_period_ms = 20
confirm_secs = 1.0
max_frame_failures = 5

[rinse]
rate = "15.00"
duration_s = 1
"#;

const REGION: &str = r#"
[region]
x = 100
y = 100
width = 90
height = 60
"#;

fn write_config(dir: &tempfile::TempDir, with_region: bool) -> PathBuf {
    let mut toml = FAST.to_string();
    if with_region {
        toml.push_str(REGION);
    }
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn titrator(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("titrator_cli").unwrap();
    // Always include a valid config to avoid relying on default path
    cmd.arg("--config").arg(cfg).arg("--log-level").arg("info");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["encode-rate", "--model", "qhzs", "--rate", "5.25"], 0, "Q1H5D", "stdout")]
#[case(&["encode-rate", "--model", "harvard", "--rate", "05.00"], 0, "MLM 5.0", "stdout")]
#[case(&["encode-rate", "--rate", "5.5"], 0, "SETRATE 0550", "stdout")]
#[case(&["encode-rate", "--model", "arduino", "--rate", "abc"], 8, "rate must look like", "stderr")]
#[case(&["encode-rate", "--model", "peristaltic", "--rate", "5.0"], 2, "invalid value", "stderr")]
#[case(&["run", "--change-after", "0.9", "--timeout", "20"], 0, "endpoint reached", "stdout")]
#[case(&["run", "--rate", "1.234"], 8, "pump.rate", "stderr")]
#[case(&["run", "--region", "0,0,10,10"], 8, "larger than 15x15", "stderr")]
#[case(&["run", "--region", "600,400,90,60", "--timeout", "10"], 6, "lies outside", "stderr")]
#[case(&["run", "--live"], 3, "camera", "stderr")]
#[case(&["rinse", "--duration", "1"], 0, "rinse finished", "stdout")]
#[case(&["rinse", "--duration", "0"], 8, "rinse.duration_s", "stderr")]
#[case(&["self-check"], 0, "self-check ok", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, true);

    let mut cmd = titrator(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn run_without_region_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, false);

    titrator(&cfg)
        .args(["run", "--timeout", "5"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("no sample region set"));
}

#[rstest]
fn missing_config_file_is_a_config_error() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("absent.toml");

    titrator(&cfg)
        .arg("self-check")
        .assert()
        .code(8)
        .stderr(predicate::str::contains("read config"));
}

#[rstest]
fn malformed_config_is_a_config_error() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[pump\nrate = ").unwrap();

    titrator(&cfg)
        .arg("self-check")
        .assert()
        .code(8)
        .stderr(predicate::str::contains("could not be parsed"));
}

#[rstest]
fn run_logs_the_pump_protocol() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, true);

    titrator(&cfg)
        .args(["run", "--change-after", "0.9", "--timeout", "20"])
        .assert()
        .success()
        .stderr(predicate::str::contains("SETRATE 0600"))
        .stderr(predicate::str::contains("RUN"))
        .stderr(predicate::str::contains("STOP"));
}

#[rstest]
fn run_json_reports_the_endpoint() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, true);

    let out = Command::cargo_bin("titrator_cli")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--change-after", "0.9", "--timeout", "20"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout
        .lines()
        .find(|l| l.contains("\"volume_ml\""))
        .unwrap_or("")
        .to_string();
    assert!(!line.is_empty(), "no JSON result line; stdout was: {stdout}");

    let v: serde_json::Value = serde_json::from_str(&line).expect("valid JSON");
    assert_eq!(v["status"], "endpoint");
    assert_eq!(v["rate"], "06.00");
    assert_eq!(v["model"], "arduino");
    assert!(v["timestamp"].as_u64().is_some());
    // Billed from run start to the lasting change, at 0.1 mL/s.
    let volume = v["volume_ml"].as_f64().unwrap();
    assert!(volume > 0.0 && volume < 1.0, "volume {volume}");
    assert!(v["dispensing_s"].as_f64().unwrap() > 0.0);
    for zone in ["left", "middle", "right"] {
        assert_eq!(v["final_colors"][zone].as_array().unwrap().len(), 3);
    }
}

#[rstest]
fn json_errors_are_structured() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, false);

    let out = Command::cargo_bin("titrator_cli")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--timeout", "5"])
        .assert()
        .code(7)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&out);
    let line = stderr
        .lines()
        .find(|l| l.contains("\"reason\""))
        .unwrap_or("")
        .to_string();
    let v: serde_json::Value = serde_json::from_str(&line).expect("valid JSON");
    assert_eq!(v["reason"], "InvalidState");
    assert_eq!(v["exit_code"], 7);
    assert!(v["message"].as_str().unwrap().contains("How to fix"));
}

#[rstest]
fn save_writes_overrides_back() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, false);

    titrator(&cfg)
        .args([
            "run",
            "--region",
            "120,110,90,60",
            "--rate",
            "07.50",
            "--save",
            "--change-after",
            "0.9",
            "--timeout",
            "20",
        ])
        .assert()
        .success();

    let saved = titrator_config::load_toml(&fs::read_to_string(&cfg).unwrap()).unwrap();
    let region = saved.region.expect("region saved");
    assert_eq!((region.x, region.y, region.width, region.height), (120, 110, 90, 60));
    assert_eq!(saved.pump.rate, "07.50");
    // Untouched keys survive the rewrite.
    assert_eq!(saved.control.sample_period_ms, 20);
}

#[rstest]
fn self_check_samples_replayed_frames() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, true);
    let frames = dir.path().join("frames");
    fs::create_dir(&frames).unwrap();
    image::RgbImage::from_pixel(320, 240, image::Rgb([200, 40, 40]))
        .save(frames.join("0001.png"))
        .unwrap();

    titrator(&cfg)
        .arg("self-check")
        .arg("--frames")
        .arg(&frames)
        .assert()
        .success()
        .stdout(predicate::str::contains("320x240"))
        .stdout(predicate::str::contains("L: "));
}
