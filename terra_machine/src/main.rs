//! Terra controller entry point.
//!
//! Loads the configuration, initialises tracing, brings the machine
//! up against the selected backend and runs it until a stop request
//! arrives. Initialisation failures exit nonzero; a clean shutdown
//! exits zero.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use terra_common::config::Config;
use terra_hal::sim::SimBackend;
use terra_machine::Machine;

#[derive(Parser, Debug)]
#[command(name = "terra", about = "Terra gantry machine controller")]
struct Cli {
    /// Path to the machine configuration file.
    #[arg(long, env = "TERRA_CONFIG", default_value = "config/terra.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(error) => {
            eprintln!("failed to load {}: {error}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let default_filter = if config.general.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .compact()
        .init();

    info!(name = %config.general.name, config = %cli.config.display(), "terra starting");

    let machine = Machine::new(config, Arc::new(SimBackend::new()));
    let handle = machine.handle();

    let stopper = handle.clone();
    if let Err(error) = ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        stopper.stop();
    }) {
        error!(%error, "could not install the interrupt handler");
    }

    match machine.run() {
        Ok(()) => {
            info!("terra stopped");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "machine failed to start");
            ExitCode::FAILURE
        }
    }
}
