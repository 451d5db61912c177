//! CP Simulator — supervisor daemon launcher.
//!
//! Loads a TOML configuration listing the charge points to host, binds
//! one control socket per charge point, and blocks until shutdown.
//!
//! ```sh
//! # Run with default config (~/.config/cp-simulator/config.toml)
//! cp-simulator
//!
//! # Custom config path
//! cp-simulator --config ./fleet.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cp_simulator::config::SimulatorConfig;
use cp_simulator::support::errors::FatalError;
use cp_simulator::support::shutdown::listen_for_shutdown_signals;
use cp_simulator::Supervisor;

/// CP Simulator — OCPP 1.6J charge point simulator and local control daemon.
#[derive(Parser, Debug)]
#[command(
    name = "cp-simulator",
    version,
    about = "Simulates one or more OCPP 1.6J charge points behind a local control socket"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "CP_SIMULATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(cp_simulator::default_config_path);

    let config = match SimulatorConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_fallback_tracing();
            error!(path = %config_path.display(), error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.daemon.log_level));

    if config.charge_points.is_empty() {
        error!("configuration lists no [[charge_point]] entries; nothing to host");
        return ExitCode::from(1);
    }

    let charge_points = config
        .charge_points
        .into_iter()
        .map(|entry| entry.into_chargepoint_config())
        .collect();

    let supervisor = match Supervisor::spawn(charge_points, &config.daemon.base_dir).await {
        Ok(supervisor) => supervisor,
        Err(FatalError::AlreadyRunning(pid)) => {
            error!(pid, "another supervisor instance is already running");
            return ExitCode::from(1);
        }
        Err(e) => {
            error!(error = %e, "failed to start supervisor");
            return ExitCode::from(2);
        }
    };

    info!(
        base_dir = %config.daemon.base_dir.display(),
        charge_points = supervisor.endpoints.len(),
        "supervisor started"
    );

    let signal_shutdown = supervisor.shutdown.clone();
    tokio::spawn(async move {
        listen_for_shutdown_signals(signal_shutdown).await;
    });
    supervisor.shutdown.wait().await;
    supervisor.shutdown().await;

    info!("supervisor stopped");
    ExitCode::SUCCESS
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn init_fallback_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .init();
}
