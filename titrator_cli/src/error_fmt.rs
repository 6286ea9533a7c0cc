//! Human-readable error descriptions and structured JSON error formatting.

use titrator_core::error::{BuildError, TitratorError, titrator_error};

fn is_toml_error(err: &eyre::Report) -> bool {
    err.chain()
        .any(|e| e.downcast_ref::<toml::de::Error>().is_some())
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingCamera => {
                "What happened: No camera was provided to the controller.\nLikely causes: The frame source failed to open or was not wired into the builder.\nHow to fix: Check the camera connection or pass --frames with a directory of images.".to_string()
            }
            BuildError::MissingPump => {
                "What happened: No pump link was provided to the controller.\nLikely causes: The serial port failed to open or was not wired into the builder.\nHow to fix: Check [pump].port and that the device is plugged in.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/titrator.toml for a sample."
            ),
        };
    }

    if let Some(te) = titrator_error(err) {
        return match te {
            TitratorError::Capture(msg) => format!(
                "What happened: The camera did not deliver a usable frame ({msg}).\nLikely causes: Camera unplugged, busy in another program, or [camera].frame_timeout_ms too low.\nHow to fix: Reconnect the camera, close other capture programs, or raise the frame timeout."
            ),
            TitratorError::Geometry(msg) => format!(
                "What happened: The sample region was rejected ({msg}).\nLikely causes: Region smaller than 16x16 pixels or extending past the frame edge.\nHow to fix: Pick a larger region inside the picture with --region X,Y,W,H or [region]."
            ),
            TitratorError::Hardware(msg) => format!(
                "What happened: The pump link failed ({msg}).\nLikely causes: Wrong [pump].port or baud, adapter unplugged, or missing permission on the device.\nHow to fix: Check the cable and the port name, then rerun."
            ),
            TitratorError::Titration(msg) => format!(
                "What happened: The titration was aborted ({msg}).\nLikely causes: Repeated capture failures during the run or no color change before the timeout.\nHow to fix: Check the camera and sample, or raise --timeout; the pump has been stopped."
            ),
            TitratorError::InvalidState(msg) => format!(
                "What happened: The operation is not allowed right now ({msg}).\nLikely causes: No sample region configured, or a run or rinse is already active.\nHow to fix: Set [region] (or --region) and wait for the current operation to end."
            ),
            TitratorError::Config(msg) => format!(
                "What happened: A setting was rejected ({msg}).\nLikely causes: Rate not in DD.DD form or a non-positive threshold.\nHow to fix: Edit the config file or the command-line value, then rerun."
            ),
        };
    }

    if is_toml_error(err) {
        return format!(
            "What happened: The config file could not be parsed.\nLikely causes: TOML syntax error or a value of the wrong type.\nHow to fix: Fix the file and rerun. Details: {err:#}"
        );
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable process exit codes per error family; anything untyped is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() || is_toml_error(err) {
        return 8;
    }
    match titrator_error(err) {
        Some(TitratorError::Capture(_)) => 3,
        Some(TitratorError::Geometry(_)) => 4,
        Some(TitratorError::Hardware(_)) => 5,
        Some(TitratorError::Titration(_)) => 6,
        Some(TitratorError::InvalidState(_)) => 7,
        Some(TitratorError::Config(_)) => 8,
        None => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() || is_toml_error(err) {
        return "Config";
    }
    match titrator_error(err) {
        Some(TitratorError::Capture(_)) => "Capture",
        Some(TitratorError::Geometry(_)) => "Geometry",
        Some(TitratorError::Hardware(_)) => "Hardware",
        Some(TitratorError::Titration(_)) => "Titration",
        Some(TitratorError::InvalidState(_)) => "InvalidState",
        Some(TitratorError::Config(_)) => "Config",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "error": format!("{err:#}"),
        "message": humanize(err),
    })
    .to_string()
}
