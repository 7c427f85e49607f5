//! `haulage init`: write a starter node configuration.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (defaults to current directory).
    #[arg(default_value = ".")]
    pub dir: PathBuf,
}

const DEFAULT_CONFIG: &str = r#"# Haulage Node Configuration

[api]
listen_addr = "127.0.0.1"
port = 8700

[storage]
data_dir = "./data"
# Audit journal only. Balances live in memory and are not restored from it.
journal = true
# Move a journal left by a previous run aside instead of refusing to start.
archive_previous = false

[logging]
level = "info"
format = "text"

[engine]
# 500 bps = 5% commission captured on each escrow hold
commission_rate = 500
# Limits are in hundredths of a major unit, scaled to each currency's decimals
min_deposit_cents = 100
min_withdrawal_cents = 500
max_transaction_cents = 5000000
payment_timeout_secs = 900
default_currency = "GHS"

[engine.withdrawal_fee]
rate = 100
min_cents = 50
max_cents = 1000

[sweeper]
enabled = true
interval_secs = 60
"#;

pub fn run(args: &InitArgs) -> anyhow::Result<()> {
    let config_path = args.dir.join("haulage.toml");

    if config_path.exists() {
        anyhow::bail!("configuration file already exists at {}", config_path.display());
    }

    std::fs::create_dir_all(&args.dir)?;
    std::fs::write(&config_path, DEFAULT_CONFIG)?;
    std::fs::create_dir_all(args.dir.join("data"))?;

    println!("Initialized Haulage node at {}", config_path.display());
    println!("Edit haulage.toml to customize your configuration.");
    println!("Run 'haulage-node --config {}' to start the node.", config_path.display());

    Ok(())
}
