//! `haulage admin`: operator actions on wallets, trips and platform revenue.

use clap::{Args, Subcommand};
use haulage_core::{AccountId, Currency, PayoutId, TripId, WalletId};
use haulage_settlement::{
    PayoutRecord, PlatformRevenue, TripSnapshot, TripStatus, Wallet, WalletStatus,
};
use serde::{Deserialize, Serialize};

use super::client::{parse_amount, ConnectArgs, NodeClient};
use super::wallet::print_wallet;

#[derive(Args, Debug)]
pub struct AdminArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(subcommand)]
    pub command: AdminCommand,
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Block debits and credits on a wallet.
    Freeze { wallet_id: WalletId },
    /// Reactivate a frozen wallet.
    Unfreeze { wallet_id: WalletId },
    /// Close an empty wallet for good.
    Close { wallet_id: WalletId },
    /// Replay a wallet's ledger and compare it with the stored balances.
    Audit { wallet_id: WalletId },
    /// Cumulative commission and withdrawal fees.
    Revenue {
        #[arg(default_value = "GHS")]
        currency: Currency,
    },
    /// Publish a trip signal on behalf of the trip service.
    Trip {
        #[arg(long)]
        trip_id: Option<TripId>,
        #[arg(long)]
        shipper: AccountId,
        #[arg(long)]
        courier: AccountId,
        /// Agreed price of the accepted bid, e.g. 505.00
        #[arg(long)]
        price: String,
        #[arg(long, default_value = "GHS")]
        currency: String,
        #[arg(long, default_value = "pickup_pending")]
        status: String,
    },
    /// Move a known trip to a new status.
    TripStatus { trip_id: TripId, status: String },
    /// Payouts received by an account.
    Payouts { account: AccountId },
    /// Show one payout.
    Payout { payout_id: PayoutId },
}

#[derive(Serialize)]
struct StatusChange<S: Serialize> {
    status: S,
}

#[derive(Deserialize)]
struct AuditResponse {
    wallet_id: WalletId,
    consistent: bool,
}

fn parse_trip_status(status: &str) -> anyhow::Result<TripStatus> {
    let value = serde_json::Value::String(status.to_ascii_lowercase());
    serde_json::from_value(value).map_err(|_| anyhow::anyhow!("unknown trip status: {status}"))
}

fn print_payout(payout: &PayoutRecord) {
    println!(
        "  {}  {}  {:<10} hold {}  trip {}",
        payout.id, payout.amount, payout.status, payout.hold_id, payout.trip_id
    );
}

async fn set_wallet_status(
    client: &NodeClient,
    wallet_id: WalletId,
    status: WalletStatus,
) -> anyhow::Result<()> {
    let wallet: Wallet = client
        .put_json(&format!("/wallets/{wallet_id}/status"), &StatusChange { status })
        .await?;
    print_wallet(&wallet);
    Ok(())
}

pub async fn run(args: &AdminArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.connect);
    match &args.command {
        AdminCommand::Freeze { wallet_id } => {
            set_wallet_status(&client, *wallet_id, WalletStatus::Frozen).await?
        }
        AdminCommand::Unfreeze { wallet_id } => {
            set_wallet_status(&client, *wallet_id, WalletStatus::Active).await?
        }
        AdminCommand::Close { wallet_id } => {
            set_wallet_status(&client, *wallet_id, WalletStatus::Closed).await?
        }
        AdminCommand::Audit { wallet_id } => {
            let audit: AuditResponse = client
                .post(&format!("/wallets/{wallet_id}/audit"), &serde_json::json!({}))
                .await?;
            if audit.consistent {
                println!("Wallet {}: ledger replay matches balances", audit.wallet_id);
            }
        }
        AdminCommand::Revenue { currency } => {
            let revenue: PlatformRevenue =
                client.get(&format!("/platform/revenue/{currency}")).await?;
            println!("Platform revenue ({})", revenue.currency);
            println!("  Commission:      {}", revenue.commission);
            println!("  Withdrawal fees: {}", revenue.withdrawal_fees);
        }
        AdminCommand::Trip {
            trip_id,
            shipper,
            courier,
            price,
            currency,
            status,
        } => {
            let snapshot = TripSnapshot {
                trip_id: trip_id.unwrap_or_default(),
                shipper: *shipper,
                courier: *courier,
                agreed_price: parse_amount(price, currency)?,
                status: parse_trip_status(status)?,
            };
            let trip: TripSnapshot = client.post("/trips", &snapshot).await?;
            println!("Trip {} is {} at {}", trip.trip_id, trip.status, trip.agreed_price);
        }
        AdminCommand::TripStatus { trip_id, status } => {
            let status = parse_trip_status(status)?;
            client
                .put(&format!("/trips/{trip_id}/status"), &StatusChange { status })
                .await?;
            println!("Trip {trip_id} is {status}");
        }
        AdminCommand::Payouts { account } => {
            let payouts: Vec<PayoutRecord> =
                client.get(&format!("/accounts/{account}/payouts")).await?;
            println!("Payouts to {account}:");
            for payout in &payouts {
                print_payout(payout);
            }
        }
        AdminCommand::Payout { payout_id } => {
            let payout: PayoutRecord = client.get(&format!("/payouts/{payout_id}")).await?;
            print_payout(&payout);
        }
    }
    Ok(())
}
