use std::path::PathBuf;

use clap::Parser;
use swerve_zenoh_runtime::config::DrivetrainConfig;
use swerve_zenoh_runtime::runtime::{self, RunOptions};
use tracing_subscriber::EnvFilter;

/// Swerve drivetrain control runtime
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON drivetrain config (defaults to the built-in robot config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drive an in-process simulated base instead of real hardware
    #[arg(long)]
    sim: bool,

    /// Override the control period in milliseconds
    #[arg(long)]
    period_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match DrivetrainConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => DrivetrainConfig::default(),
    };
    if let Some(period_ms) = args.period_ms {
        config.period_ms = period_ms;
    }

    let opts = RunOptions {
        config,
        sim: args.sim,
    };

    if let Err(e) = runtime::run(opts).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
