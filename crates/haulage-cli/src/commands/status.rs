//! `haulage status`: query the status of a running Haulage node.

use clap::Args;
use haulage_settlement::{EngineStats, Provider};
use serde::Deserialize;

use super::client::{ConnectArgs, NodeClient};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Deserialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    stats: EngineStats,
    providers: Vec<Provider>,
}

pub async fn run(args: &StatusArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.connect);
    let status: StatusResponse = client.get("/status").await?;

    let providers: Vec<String> = status.providers.iter().map(|p| p.to_string()).collect();
    println!("Node Status:");
    println!("  Endpoint:  {}", args.connect.endpoint);
    println!("  Version:   {}", status.version);
    println!("  Uptime:    {}s", status.uptime_secs);
    println!("  Providers: {}", providers.join(", "));
    println!();
    println!("  Wallets:   {}", status.stats.wallets);
    println!("  Holds:     {}", status.stats.holds);
    println!("  Disputes:  {}", status.stats.disputes);
    println!("  Payments:  {}", status.stats.payments);
    println!("  Payouts:   {}", status.stats.payouts);

    Ok(())
}
