//! # Stratus - local network cluster formation
//!
//! Discovers candidate nodes over multicast, bootstraps the local
//! services, and hands each discovered node the tokens it needs to join.
//!
//! ## Flow
//! ```text
//! scan (_stratus) → bootstrap services → issue tokens
//!       → broadcast (_stratus_token) → reconcile (_stratus_joined)
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cluster;
mod commands;
mod config;
mod discovery;
mod services;
#[cfg(test)]
mod testing;

use config::AppConfig;

/// Stratus - form a multi-service cluster on the local network
#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path
    #[arg(short, long, default_value = "config/stratus.toml", global = true)]
    config: String,

    /// State directory (overrides config)
    #[arg(long, env = "STRATUS_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Name of this node (overrides config)
    #[arg(long, env = "STRATUS_NAME", global = true)]
    name: Option<String>,

    /// Address other nodes reach this one on (overrides config)
    #[arg(short, long, env = "STRATUS_ADDRESS", global = true)]
    address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "LOG_LEVEL", global = true)]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap a new cluster and add the nodes found on the network
    Init {
        /// Take every node found by a single scan without prompting
        #[arg(long)]
        auto: bool,
    },
    /// Scan for new nodes and add them to the existing cluster
    Add {
        /// Take every node found by a single scan without prompting
        #[arg(long)]
        auto: bool,
    },
    /// Wait for a cluster to hand this node its join tokens
    Join,
    /// Show local cluster membership
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Stratus v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!(name = %config.name, state_dir = %config.state_dir.display(), "Configuration loaded");

    match args.command {
        Command::Init { auto } => commands::init::run(&config, auto).await,
        Command::Add { auto } => commands::add::run(&config, auto).await,
        Command::Join => commands::join::run(&config).await,
        Command::Status => commands::status::run(&config).await,
    }
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
