//! Subcommand bodies.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use eyre::{Result, WrapErr};
use serde_json::json;
use titrator_config::{Config, RegionSection};
use titrator_core::hw_error::{Seam, map_hw_error};
use titrator_core::{
    ColorSampler, EndpointReport, FrameGrabber, HsvRange, PumpModel, PumpRate, SampleRegion,
    TitrationController, TitrationEvent, TitratorError,
};
use titrator_traits::{Clock, FrameSource, MonotonicClock};

use crate::hardware::{CameraChoice, change_delay, open_camera, open_link};

const POLL: Duration = Duration::from_millis(100);

pub fn config_error(e: eyre::Report) -> eyre::Report {
    eyre::Report::new(TitratorError::Config(format!("{e:#}")))
}

/// Read, parse and validate the config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        eyre::Report::new(TitratorError::Config(format!(
            "read config {}: {e}",
            path.display()
        )))
    })?;
    let cfg = titrator_config::load_toml(&text)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().map_err(config_error)?;
    Ok(cfg)
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn build_controller(cfg: &Config, camera: Box<dyn FrameSource + Send>) -> Result<TitrationController> {
    let period = Duration::from_millis(cfg.control.sample_period_ms);
    let timeout = Duration::from_millis(cfg.camera.frame_timeout_ms);
    let grabber = FrameGrabber::spawn(camera, timeout, period);
    let link = open_link(cfg)?;
    TitrationController::builder()
        .camera(grabber)
        .pump_link(link)
        .apply_config(cfg)?
        .build()
}

#[derive(Debug)]
pub struct RunArgs {
    pub rate: Option<String>,
    pub region: Option<RegionSection>,
    pub save: bool,
    pub frames: Option<PathBuf>,
    pub live: bool,
    pub change_after: f64,
    pub timeout: u64,
}

pub fn run(
    config_path: &Path,
    mut cfg: Config,
    args: RunArgs,
    json_out: bool,
    shutdown: &AtomicBool,
) -> Result<()> {
    if let Some(rate) = &args.rate {
        cfg.pump.rate.clone_from(rate);
    }
    if let Some(region) = args.region {
        cfg.region = Some(region);
    }
    cfg.validate().map_err(config_error)?;
    if args.save && (args.rate.is_some() || args.region.is_some()) {
        Config::update_and_save(config_path, |c| {
            if let Some(rate) = &args.rate {
                c.pump.rate.clone_from(rate);
            }
            if let Some(region) = args.region {
                c.region = Some(region);
            }
        })
        .map_err(config_error)?;
        tracing::info!(path = %config_path.display(), "config updated");
    }

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let choice = match (&args.frames, args.live) {
        (Some(dir), _) => CameraChoice::Frames(dir),
        (None, true) => CameraChoice::Live,
        (None, false) => CameraChoice::Simulated {
            change_after: Some(change_delay(args.change_after)?),
        },
    };
    let camera = open_camera(&cfg, choice, clock)?;
    let mut ctl = build_controller(&cfg, camera)?;
    let events = ctl.events();

    let started = ctl.start_preview().and_then(|()| ctl.start_run());
    if let Err(e) = started {
        if let Err(re) = ctl.release() {
            tracing::warn!(error = %re, "release after failed start");
        }
        return Err(e);
    }

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let outcome: Result<EndpointReport> = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Err(eyre::Report::new(TitratorError::Titration(
                "interrupted by operator".into(),
            )));
        }
        if Instant::now() >= deadline {
            break Err(eyre::Report::new(TitratorError::Titration(format!(
                "no endpoint confirmed within {} s",
                args.timeout
            ))));
        }
        match events.recv_timeout(POLL) {
            Ok(TitrationEvent::Endpoint(report)) => break Ok(report),
            Ok(TitrationEvent::Fault(e)) => break Err(eyre::Report::new(e)),
            Ok(TitrationEvent::NearEndpoint { volume_ml, .. }) if !json_out => {
                println!("near endpoint: {volume_ml:.2} mL dispensed");
            }
            Ok(_) => {}
            Err(e) if e.is_timeout() => {}
            Err(e) => break Err(eyre::eyre!("event stream closed: {e}")),
        }
    };

    if outcome.is_err() && ctl.state() == titrator_core::TitrationState::Running {
        if let Err(e) = ctl.stop() {
            tracing::warn!(error = %format!("{e:#}"), "stop after abort");
        }
    }
    let released = ctl.release();
    let report = outcome?;
    released.wrap_err("release hardware")?;

    let rate = cfg.pump.rate.as_str();
    if json_out {
        let c = report.final_colors;
        let zone = |z: titrator_core::ZoneColor| json!([z.hue, z.saturation, z.value]);
        println!(
            "{}",
            json!({
                "timestamp": timestamp(),
                "status": "endpoint",
                "volume_ml": report.volume_ml,
                "dispensing_s": report.dispensing_s,
                "rate": rate,
                "model": PumpModel::from(cfg.pump.model).to_string(),
                "final_colors": {
                    "left": zone(c.left),
                    "middle": zone(c.middle),
                    "right": zone(c.right),
                },
            })
        );
    } else {
        println!(
            "endpoint reached: {:.2} mL at {rate} mL/min ({:.2} s dispensing)",
            report.volume_ml, report.dispensing_s
        );
        println!("final colors: {}", report.final_colors);
    }
    Ok(())
}

pub fn rinse(cfg: &mut Config, duration: Option<u64>, json_out: bool, shutdown: &AtomicBool) -> Result<()> {
    if let Some(d) = duration {
        cfg.rinse.duration_s = d;
    }
    cfg.validate().map_err(config_error)?;

    // The rinse never samples; the controller still wants a camera.
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let camera = open_camera(cfg, CameraChoice::Simulated { change_after: None }, clock)?;
    let mut ctl = build_controller(cfg, camera)?;
    let events = ctl.events();

    ctl.rinse()?;
    let mut interrupted = false;
    while ctl.snapshot().rinsing {
        if shutdown.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        std::thread::sleep(POLL);
    }
    // Releasing first makes an interrupted rinse stop at its next slice.
    let released = ctl.release();

    if interrupted {
        return Err(eyre::Report::new(TitratorError::Hardware(
            "rinse interrupted by operator".into(),
        )));
    }
    if let Some(err) = events.try_iter().find_map(|ev| match ev {
        TitrationEvent::RinseFailed(e) => Some(e),
        _ => None,
    }) {
        return Err(eyre::Report::new(err));
    }
    released.wrap_err("release hardware")?;

    if json_out {
        println!(
            "{}",
            json!({
                "timestamp": timestamp(),
                "status": "rinsed",
                "rate": cfg.rinse.rate,
                "duration_s": cfg.rinse.duration_s,
                "restored_rate": cfg.pump.rate,
            })
        );
    } else {
        println!(
            "rinse finished: {} mL/min for {} s, rate restored to {} mL/min",
            cfg.rinse.rate, cfg.rinse.duration_s, cfg.pump.rate
        );
    }
    Ok(())
}

pub fn encode_rate(model: PumpModel, rate: &str, json_out: bool) -> Result<()> {
    let rate = PumpRate::parse(rate)?;
    let set = model.set_rate_commands(&rate);
    if json_out {
        println!(
            "{}",
            json!({
                "model": model.to_string(),
                "rate": rate.to_string(),
                "ml_per_min": rate.ml_per_min(),
                "set_rate": set,
                "start": model.start_command(),
                "stop": model.stop_command(),
            })
        );
    } else {
        for line in &set {
            println!("set-rate: {line}");
        }
        println!("start: {}", model.start_command());
        println!("stop: {}", model.stop_command());
    }
    Ok(())
}

/// Grab one frame, sample the region if one is set, and program the pump rate.
pub fn self_check(cfg: &Config, frames: Option<&Path>, json_out: bool) -> Result<()> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let choice = frames.map_or(CameraChoice::Simulated { change_after: None }, CameraChoice::Frames);
    let mut camera = open_camera(cfg, choice, clock)?;
    let frame = camera
        .frame(Duration::from_millis(cfg.camera.frame_timeout_ms))
        .map_err(|e| eyre::Report::new(map_hw_error(&*e, Seam::Camera)))?;

    let zones = match &cfg.region {
        Some(r) => {
            let region = SampleRegion::try_from(r)?;
            let mask = match (&cfg.mask, cfg.detection.use_mask) {
                (Some(m), true) => Some(HsvRange::try_from(m)?),
                _ => None,
            };
            Some(ColorSampler::new().sample(&frame, &region, mask.as_ref())?)
        }
        None => None,
    };

    let mut ctl = build_controller(cfg, camera)?;
    ctl.start_preview().wrap_err("program pump rate")?;
    ctl.release().wrap_err("release hardware")?;

    if json_out {
        println!(
            "{}",
            json!({
                "status": "ok",
                "frame": [frame.width(), frame.height()],
                "zones": zones.map(|z| z.to_string()),
                "rate": cfg.pump.rate,
            })
        );
    } else {
        println!("camera: {}x{} frame", frame.width(), frame.height());
        match zones {
            Some(z) => println!("zones: {z}"),
            None => println!("zones: no region configured"),
        }
        println!("pump: rate {} mL/min programmed", cfg.pump.rate);
        println!("self-check ok");
    }
    Ok(())
}
