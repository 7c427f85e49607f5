//! Haulage node entry point.
//!
//! Runs the escrow settlement engine behind an HTTP API, with configuration
//! from a TOML file or defaults.

// Journal readers are exercised by tests and left for operator tooling.
#![allow(dead_code)]

mod api;
mod config;
mod node;
mod state;
mod storage;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::NodeConfig;
use node::HaulageNode;

/// Haulage Node
#[derive(Parser, Debug)]
#[command(
    name = "haulage-node",
    version,
    about = "Haulage escrow settlement node",
    after_help = "Balances, holds and disputes live in memory. The RocksDB journal is an \
                  audit trail only and is never replayed, so a restart begins with empty books. \
                  The node refuses to start on a journal left by a previous run unless \
                  --archive-journal is given."
)]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "haulage.toml")]
    config: PathBuf,

    /// Override the API port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the log format (text, json).
    #[arg(long)]
    log_format: Option<String>,

    /// Disable the payment-timeout sweeper.
    #[arg(long)]
    no_sweeper: bool,

    /// Move a journal left by a previous run aside and start with empty books.
    #[arg(long)]
    archive_journal: bool,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        let config = NodeConfig::default();
        init_tracing(&config);
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    // Load configuration
    let mut config = NodeConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(ref data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if args.no_sweeper {
        config.sweeper.enabled = false;
    }
    if args.archive_journal {
        config.storage.archive_previous = true;
    }

    init_tracing(&config);
    tracing::info!("Haulage node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = HaulageNode::new(config)?;
    node.start();

    // Set up graceful shutdown on SIGINT
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "API server error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("Haulage node exited cleanly");
    Ok(())
}
