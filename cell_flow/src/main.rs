//! # Cell Flow Binary
//!
//! Runs named scenarios against the machine topology and streams telemetry
//! frames as JSON lines on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Run one scenario to completion
//! cellflow --config-dir config/ --scenario pick_and_place
//!
//! # Control via JSON lines on stdin
//! echo '{"cmd":"Start","scenario":"home_all"}' | cellflow --config-dir config/
//!
//! # Verbose JSON logs, 20 ms frames
//! cellflow -v --json --interval-ms 20 --scenario axis_demo
//! ```

#![deny(warnings)]

use cell_common::config::{LogLevel, load_topology};
use cell_common::consts::DEFAULT_CONFIG_DIR;
use cell_common::telemetry::TelemetryFrame;
use cell_flow::config::EngineConfig;
use cell_flow::session::{ControlCommand, FlowSession, SessionSettings};
use cell_hal::{DriverOptions, DriverRegistry};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Cell Flow - flow execution engine for assembly cells
#[derive(Parser, Debug)]
#[command(name = "cellflow")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Runs assembly-cell flows and streams telemetry frames")]
#[command(long_about = None)]
struct Args {
    /// Config directory holding engine.toml and machine.toml
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Run this scenario once and exit; without it, control commands are read from stdin
    #[arg(short, long)]
    scenario: Option<String>,

    /// Override the device driver from engine.toml
    #[arg(short, long)]
    driver: Option<String>,

    /// Override the telemetry sampling period in milliseconds
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// List the built-in scenarios and exit
    #[arg(long)]
    list: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Cell flow failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = EngineConfig::load_dir(&args.config_dir);
    let log_level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);
    let mut config = config?;

    if let Some(driver) = &args.driver {
        config.execution.driver = driver.clone();
    }
    if let Some(interval_ms) = args.interval_ms {
        config.telemetry.interval_ms = interval_ms;
    }
    config.validate()?;

    info!(
        "Cell flow v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(args, config))
}

async fn serve(args: Args, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let topology = Arc::new(load_topology(&args.config_dir)?);
    let options = DriverOptions {
        tick: config.simulation.tick(),
    };
    let driver =
        DriverRegistry::with_builtin_drivers().create_driver(&config.execution.driver, &options)?;

    let settings = SessionSettings {
        sampler: config.telemetry,
        wait_timeout: config.execution.wait_timeout(),
        sample_tick: config.simulation.tick(),
        seed: config.execution.seed,
    };
    let session = FlowSession::new(topology, driver).with_settings(settings);

    if args.list {
        for name in session.catalog().names() {
            println!("{name}");
        }
        return Ok(());
    }

    let forwarder = tokio::spawn(forward_frames(session.subscribe(), std::io::stdout()));

    let outcome = match &args.scenario {
        Some(scenario) => run_scenario(&session, scenario).await,
        None => read_control(&session).await,
    };

    shutdown(session, forwarder).await;
    outcome?;
    info!("Cell flow shutdown complete");
    Ok(())
}

/// Run one scenario until it finishes or Ctrl-C.
async fn run_scenario(
    session: &FlowSession,
    scenario: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    session.start(scenario).await?;
    tokio::select! {
        _ = session.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }
    Ok(())
}

/// Apply JSON control commands from stdin until EOF or Ctrl-C.
async fn read_control(session: &FlowSession) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Reading control commands from stdin (scenarios: {})",
        session.catalog().names().join(", ")
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
        };
        let Some(line) = line else {
            info!("Control input closed");
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ControlCommand>(line) {
            Ok(command) => {
                // Start failures are already published as Error frames
                if let Err(e) = session.handle(command).await {
                    warn!("Command rejected: {}", e);
                }
            }
            Err(e) => warn!("Ignoring malformed control command '{}': {}", line, e),
        }
    }
}

/// Stop the run, then let the forwarder drain every frame already published.
async fn shutdown<W>(session: FlowSession, forwarder: JoinHandle<W>) -> Option<W> {
    session.stop().await;
    // Closing the frame channel lets the forwarder drain and exit
    drop(session);
    match forwarder.await {
        Ok(out) => Some(out),
        Err(e) => {
            warn!("Frame forwarder ended abnormally: {}", e);
            None
        }
    }
}

/// Write every frame as one JSON line to `out` until the channel closes.
async fn forward_frames<W: Write>(
    mut frames: broadcast::Receiver<TelemetryFrame>,
    mut out: W,
) -> W {
    loop {
        match frames.recv().await {
            Ok(frame) => match frame.to_json() {
                Ok(line) => {
                    if let Err(e) = writeln!(out, "{line}") {
                        warn!("Cannot write frame t={}: {}", frame.t, e);
                    }
                }
                Err(e) => warn!("Cannot serialize frame t={}: {}", frame.t, e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Dropped {} telemetry frames", skipped),
            Err(RecvError::Closed) => break,
        }
    }
    out
}

/// Setup tracing subscriber on stderr; stdout carries telemetry.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.as_directive().parse().unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
