//! Haulage CLI: command-line interface for the escrow settlement node.
//!
//! Subcommands: init, status, wallet, payment, hold, dispute, admin.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Haulage: escrowed freight payments over mobile money.
#[derive(Parser, Debug)]
#[command(name = "haulage", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter node configuration.
    Init(commands::init::InitArgs),
    /// Query the status of a running node.
    Status(commands::status::StatusArgs),
    /// Wallet balances and transaction history.
    Wallet(commands::wallet::WalletArgs),
    /// Mobile-money deposits and withdrawals.
    Payment(commands::payment::PaymentArgs),
    /// Escrow holds on trips.
    Hold(commands::hold::HoldArgs),
    /// Trip disputes.
    Dispute(commands::dispute::DisputeArgs),
    /// Operator actions.
    Admin(commands::admin::AdminArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init(args) => commands::init::run(args),
        Commands::Status(args) => commands::status::run(args).await,
        Commands::Wallet(args) => commands::wallet::run(args).await,
        Commands::Payment(args) => commands::payment::run(args).await,
        Commands::Hold(args) => commands::hold::run(args).await,
        Commands::Dispute(args) => commands::dispute::run(args).await,
        Commands::Admin(args) => commands::admin::run(args).await,
    }
}
