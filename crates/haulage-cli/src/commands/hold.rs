//! `haulage hold`: escrow holds on trips.

use clap::{Args, Subcommand};
use haulage_core::{HoldId, HoldState, TripId};
use haulage_settlement::{EscrowHold, HoldCreated, Refunded, Released};
use serde::Serialize;

use super::client::{ConnectArgs, NodeClient};

#[derive(Args, Debug)]
pub struct HoldArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(subcommand)]
    pub command: HoldCommand,
}

#[derive(Subcommand, Debug)]
pub enum HoldCommand {
    /// Lock the trip's agreed price in escrow (shipper).
    Create { trip_id: TripId },
    /// List holds visible to the acting account.
    List {
        /// held, released, refunded, disputed or partially_released.
        #[arg(long)]
        state: Option<String>,
    },
    /// Show a hold by id.
    Show { hold_id: HoldId },
    /// Show the hold of a trip.
    Trip { trip_id: TripId },
    /// Pay the courier once delivery is confirmed.
    Release { hold_id: HoldId },
    /// Return the full amount to the shipper (admin).
    Refund { hold_id: HoldId },
}

#[derive(Serialize)]
struct CreateHold {
    trip_id: TripId,
}

#[derive(Serialize)]
struct HoldFilter {
    state: HoldState,
}

fn parse_state(state: &str) -> anyhow::Result<HoldState> {
    let value = serde_json::Value::String(state.to_ascii_lowercase());
    serde_json::from_value(value).map_err(|_| anyhow::anyhow!("unknown hold state: {state}"))
}

fn print_hold(hold: &EscrowHold) {
    println!("Hold {}", hold.id);
    println!("  Trip:       {}", hold.trip_id);
    println!("  State:      {}", hold.state);
    println!("  Amount:     {}", hold.amount);
    println!("  Commission: {}", hold.commission_rate);
    println!("  Payer:      {}", hold.payer);
    println!("  Payee:      {}", hold.payee);
    if let Some(settled_at) = hold.settled_at {
        println!("  Settled at: {settled_at}");
    }
}

pub async fn run(args: &HoldArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.connect);
    match &args.command {
        HoldCommand::Create { trip_id } => {
            let request = CreateHold { trip_id: *trip_id };
            let created: HoldCreated = client.post("/holds", &request).await?;
            println!("Escrow hold created!");
            println!("  Hold ID: {}", created.id);
            println!("  Trip:    {}", created.trip_id);
            println!("  Amount:  {}", created.amount);
            println!("  Status:  {}", created.status);
        }
        HoldCommand::List { state } => {
            let holds: Vec<EscrowHold> = match state {
                Some(state) => {
                    let filter = HoldFilter {
                        state: parse_state(state)?,
                    };
                    client.get_query("/holds", &filter).await?
                }
                None => client.get("/holds").await?,
            };
            if holds.is_empty() {
                println!("No escrow holds");
            }
            for hold in &holds {
                print_hold(hold);
                println!();
            }
        }
        HoldCommand::Show { hold_id } => {
            let hold: EscrowHold = client.get(&format!("/holds/{hold_id}")).await?;
            print_hold(&hold);
        }
        HoldCommand::Trip { trip_id } => {
            let hold: EscrowHold = client.get(&format!("/trips/{trip_id}/hold")).await?;
            print_hold(&hold);
        }
        HoldCommand::Release { hold_id } => {
            let released: Released = client
                .post(&format!("/holds/{hold_id}/release"), &serde_json::json!({}))
                .await?;
            println!("Escrow released!");
            println!("  Commission: {}", released.commission);
            println!("  Net payout: {}", released.net_payout);
            println!("  Payout ID:  {}", released.payout_id);
        }
        HoldCommand::Refund { hold_id } => {
            let refunded: Refunded = client
                .post(&format!("/holds/{hold_id}/refund"), &serde_json::json!({}))
                .await?;
            println!("Escrow refunded: {}", refunded.amount);
        }
    }
    Ok(())
}
