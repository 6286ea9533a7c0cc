#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod hardware;
mod run;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::Result;
use titrator_config::Logging;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::run::RunArgs;

fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    let _ = JSON_MODE.set(json);

    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("error: {err:#}\n\n{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    // Color-eyre only adds value for humans.
    if !cli.json
        && let Err(e) = color_eyre::install()
    {
        eprintln!("color-eyre not installed: {e}");
    }

    // Commands that need no config file.
    if let Commands::EncodeRate {
        model: Some(model),
        rate,
    } = &cli.cmd
    {
        init_tracing(cli.json, cli.log_level.as_deref(), &Logging::default())?;
        return run::encode_rate((*model).into(), rate, cli.json);
    }

    let mut cfg = run::load_config(&cli.config)?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }
    }

    match cli.cmd {
        Commands::Run {
            rate,
            region,
            save,
            frames,
            live,
            change_after,
            timeout,
        } => run::run(
            &cli.config,
            cfg,
            RunArgs {
                rate,
                region,
                save,
                frames,
                live,
                change_after,
                timeout,
            },
            cli.json,
            &shutdown,
        ),
        Commands::Rinse { duration } => run::rinse(&mut cfg, duration, cli.json, &shutdown),
        Commands::EncodeRate { model, rate } => {
            let model: titrator_core::PumpModel =
                model.map_or_else(|| cfg.pump.model.into(), Into::into);
            run::encode_rate(model, &rate, cli.json)
        }
        Commands::SelfCheck { frames } => run::self_check(&cfg, frames.as_deref(), cli.json),
    }
}

/// Console logs go to stderr so stdout stays parseable. `RUST_LOG` wins over
/// `--log-level`, which wins over `[logging].level`.
fn init_tracing(json: bool, cli_level: Option<&str>, logging: &Logging) -> Result<()> {
    let level = cli_level
        .or(logging.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let (json_layer, pretty_layer) = if json {
        (
            Some(fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
        )
    };

    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let rotation = match logging.rotation.as_deref() {
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                _ => Rotation::NEVER,
            };
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
            let appender = RollingFileAppender::new(rotation, dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(file_layer)
        .try_init()?;
    Ok(())
}
