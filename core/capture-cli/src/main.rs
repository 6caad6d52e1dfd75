//! capture: command-line driver for the capture SDK.
//!
//! Runs a capture session against the simulated location source and prints
//! the events its listener receives.
//!
//! ## Subcommands
//!
//! - `simulate`: start a session, optionally detach and reattach, then stop
//! - `config`: print the effective configuration

mod logging;
mod simulate;

use capture_protocol::VehicleMode;
use capture_sdk::config::{default_config_path, load_config};
use capture_sdk::CaptureError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "capture")]
#[command(about = "Capture session driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a capture session against a simulated location source
    Simulate {
        /// Vehicle mode for the session (e.g. car, bicycle, walking)
        #[arg(long, default_value = "car", value_parser = parse_vehicle)]
        vehicle: VehicleMode,

        /// Total session length in seconds
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,

        /// Interval between simulated location updates
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Detach the listener after this many seconds, reattach halfway to the end
        #[arg(long)]
        detach_at_secs: Option<u64>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Config file (defaults to $CAPTURE_CONFIG or ~/.capture/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Config file to load instead of the default location
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn parse_vehicle(value: &str) -> Result<VehicleMode, String> {
    value.parse::<VehicleMode>().map_err(|err| err.message)
}

fn print_config(path: Option<PathBuf>) -> Result<(), CaptureError> {
    let source = match &path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = load_config(path)?;
    let rendered = serde_json::to_string_pretty(&config).map_err(|err| CaptureError::Io {
        context: "rendering config".to_string(),
        source: err.into(),
    })?;
    println!("# {}", source.display());
    println!("{}", rendered);
    Ok(())
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            vehicle,
            duration_secs,
            interval_ms,
            detach_at_secs,
            json,
            config,
        } => simulate::run(simulate::SimulateArgs {
            vehicle,
            duration_secs,
            interval_ms,
            detach_at_secs,
            json,
            config,
        }),
        Commands::Config { path } => print_config(path),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "capture failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
