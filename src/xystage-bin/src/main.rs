// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::error::Error;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use xystage_app::{init_logging, normalize_name, ConfigFile};
use xystage_backend::{register_builtin_backends_on, AxisHardware, RegistrationContext};
use xystage_core::{
    DynResult, LimitSwitch, MotionError, MotorController, Progress, Rail, StageController,
};

use config::{validate_log_level, AxisConfig, StageConfig};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - two-axis stepper stage tracer");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// GPIO backend to use (e.g. sim, rppal)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
    /// Log level (trace, debug, info, warn, error), overrides the config
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
    /// JSON list of [x, y] points in metres, e.g. "[[0.1, 0.05], [0, 0]]"
    #[arg(value_name = "POINTS", required_unless_present = "print_config")]
    points: Option<String>,
}

/// Parse the JSON point list.
fn parse_points(json: &str) -> DynResult<Vec<[f64; 2]>> {
    serde_json::from_str(json).map_err(|e| format!("Invalid point list: {}", e).into())
}

/// Pick the backend from the CLI or config and check it is available.
fn resolve_backend(
    cli: &Cli,
    cfg: &StageConfig,
    registry: &RegistrationContext,
) -> DynResult<String> {
    let name = cli.backend.as_deref().unwrap_or(&cfg.backend.kind);
    let backend = normalize_name(name);
    if !registry.is_backend_registered(&backend) {
        return Err(format!(
            "Unknown GPIO backend: {} (available: {})",
            name,
            registry.registered_backends().join(", ")
        )
        .into());
    }
    Ok(backend)
}

fn build_rail(name: &str, axis: &AxisConfig, cfg: &StageConfig, hardware: AxisHardware) -> Rail {
    let motor = MotorController::new(hardware.output, axis.motor_pins, axis.motor_params());
    let mut min_switch = LimitSwitch::new(hardware.switches.clone(), axis.min_switch);
    let mut max_switch = LimitSwitch::new(hardware.switches, axis.max_switch);
    if axis.switch_active_low {
        min_switch = min_switch.active_low();
        max_switch = max_switch.active_low();
    }
    Rail::new(name, motor, min_switch, max_switch, cfg.rail_params(axis))
}

fn build_stage(
    cfg: &StageConfig,
    registry: &RegistrationContext,
    backend: &str,
) -> DynResult<StageController> {
    let hardware = registry.build_stage(backend, &cfg.stage_wiring())?;
    Ok(StageController::new(
        build_rail("x", &cfg.x, cfg, hardware.x),
        build_rail("y", &cfg.y, cfg, hardware.y),
    ))
}

/// Write one progress line and flush it so a parent process sees it at once.
fn write_progress<W: Write>(out: &mut W, progress: Progress) -> io::Result<()> {
    serde_json::to_writer(&mut *out, &progress)?;
    out.write_all(b"\n")?;
    out.flush()
}

async fn run<W: Write>(
    stage: &mut StageController,
    points: &[[f64; 2]],
    out: &mut W,
) -> DynResult<()> {
    let (x_length, y_length) = stage.calibrate().await?;
    info!("Rail lengths: x {:.4} m, y {:.4} m", x_length, y_length);

    // Nobody is listening once the progress sink is gone, so stop moving.
    let mut sink_error = None;
    let reached = stage
        .trace_points(points, |progress| match write_progress(out, progress) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                sink_error = Some(e);
                ControlFlow::Break(())
            }
        })
        .await?;
    if let Some(e) = sink_error {
        return Err(format!(
            "Failed to report progress after point {} of {}: {}",
            reached.current, reached.total, e
        )
        .into());
    }
    info!("Traced {} points", reached.total);
    Ok(())
}

/// Motion the stage refused, as opposed to a hardware or I/O failure.
fn is_rejected_command(err: &(dyn Error + Send + Sync + 'static)) -> bool {
    err.downcast_ref::<MotionError>()
        .is_some_and(MotionError::is_command_error)
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_backends_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", StageConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = StageConfig::load(cli.config.as_deref())?;
    cfg.validate()
        .map_err(|e| format!("Invalid stage configuration: {}", e))?;
    validate_log_level(cli.log_level.as_deref())?;

    init_logging(cli.log_level.as_deref().or(cfg.general.log_level.as_deref()));

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let backend = resolve_backend(&cli, &cfg, &registry)?;
    let points = parse_points(cli.points.as_deref().unwrap_or("[]"))?;
    let mut stage = build_stage(&cfg, &registry, &backend)?;
    info!(
        "Starting xystage (backend: {}, {} points)",
        backend,
        points.len()
    );

    let mut stdout = io::stdout();
    let outcome: DynResult<()> = tokio::select! {
        result = run(&mut stage, &points, &mut stdout) => result,
        _ = signal::ctrl_c() => Err("interrupted by Ctrl+C".into()),
    };
    if let Err(ref e) = outcome {
        let (x, y) = stage.current_position();
        if is_rejected_command(e.as_ref()) {
            warn!("Rejected motion at x {:?} m, y {:?} m: {}", x, y, e);
        } else {
            error!("Stopped at x {:?} m, y {:?} m: {}", x, y, e);
        }
    }
    outcome
}
