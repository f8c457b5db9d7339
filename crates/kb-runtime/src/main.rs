//! # Kernel Bridge Runtime
//!
//! Loads a [`BridgeConfig`], starts a remote kernel for every configured
//! unit and keeps them alive until Ctrl+C.
//!
//! ```text
//! kb-runtime --config bridge.toml run
//! kb-runtime --config bridge.toml units
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kb_client::{BridgeConfig, KernelManager};

/// Kernel bridge host
#[derive(Parser, Debug)]
#[command(name = "kb-runtime")]
#[command(about = "Run notebook units on a remote kernel and expose their functions")]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.url`
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start every configured unit and wait for Ctrl+C
    Run {
        /// Units to run instead of the configured list
        units: Vec<String>,
    },
    /// List the units available on the server
    Units,
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            BridgeConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => BridgeConfig::default(),
    };
    if let Some(url) = &args.server {
        config.server.url = url.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(manager: &KernelManager) -> Result<()> {
    info!(units = manager.config().units.len(), server = %manager.config().server.url, "Starting kernel bridge");
    if let Err(e) = manager.start_all().await {
        error!(error = %e, "Some units failed to start");
    }
    if !manager.is_running() {
        warn!("No kernels running");
    }

    info!("Kernel bridge running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    manager.stop_all().await.context("Shutdown incomplete")?;
    info!("Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();
    let mut config = load_config(&args)?;

    match args.command {
        Some(Command::Units) => {
            let manager = KernelManager::new(config);
            for unit in manager.list_units().await? {
                println!("{unit}");
            }
            Ok(())
        }
        Some(Command::Run { units }) => {
            if !units.is_empty() {
                config.units = units;
            }
            run(&KernelManager::new(config)).await
        }
        None => {
            if !config.start_on_open {
                info!("start_on_open is false; pass `run` to start units");
                return Ok(());
            }
            run(&KernelManager::new(config)).await
        }
    }
}
