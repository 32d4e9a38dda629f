//! Thin demonstration CLI over the device governor. Mirrors the library
//! core's error model at the boundary: the core speaks `GovernorError`,
//! this binary only ever speaks `anyhow::Result`.

mod commands;
mod config_file;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hearthnet_governor::{Governor, GovernorConfig};

#[derive(Parser)]
#[command(name = "hearthnet", version, about = "Per-device request governor demo CLI")]
struct Cli {
    /// Path to a YAML config file overriding the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit stats as JSON instead of a table.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulated acquisition against a device and print the outcome.
    Acquire {
        address: String,
        #[arg(long, default_value_t = 2)]
        generation: u8,
        /// Report the acquisition as a failure once admitted.
        #[arg(long)]
        fail: bool,
    },
    /// Print per-device diagnostics.
    Stats {
        /// Restrict to a single address; omit to print every known device.
        address: Option<String>,
    },
    /// Force-close one device's breaker, or every breaker with `--all`.
    Reset {
        address: Option<String>,
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let default_log = "RUST_LOG";
    if std::env::var(default_log).is_err() {
        std::env::set_var(default_log, "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => config_file::load(path)?,
        None => GovernorConfig::from_env(),
    };
    config.validate()?;

    let governor = Arc::new(Governor::new(config));

    match cli.command {
        Commands::Acquire {
            address,
            generation,
            fail,
        } => commands::acquire::run(&governor, &address, generation, fail).await,
        Commands::Stats { address } => commands::stats::run(&governor, address.as_deref(), cli.json).await,
        Commands::Reset { address, all } => commands::reset::run(&governor, address.as_deref(), all).await,
    }
}
