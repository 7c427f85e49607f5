//! `haulage wallet`: balances and transaction history.

use clap::{Args, Subcommand};
use haulage_core::{AccountId, WalletId};
use haulage_settlement::{EntryKind, EntryStatus, LedgerEntry, Page, Wallet};
use serde::Serialize;

use super::client::{ConnectArgs, NodeClient};

#[derive(Args, Debug)]
pub struct WalletArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(subcommand)]
    pub command: WalletCommand,
}

#[derive(Subcommand, Debug)]
pub enum WalletCommand {
    /// Open (or fetch) the acting account's wallet in a currency.
    Open {
        #[arg(short, long, default_value = "GHS")]
        currency: String,
    },
    /// Show every wallet of an account, locked funds included.
    List {
        /// Defaults to the acting account.
        #[arg(long)]
        account: Option<AccountId>,
    },
    /// Show one wallet.
    Show { wallet_id: WalletId },
    /// Paginated ledger entries of a wallet.
    History {
        wallet_id: WalletId,
        #[arg(long)]
        kind: Option<EntryKind>,
        #[arg(long)]
        status: Option<EntryStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
        #[arg(long)]
        oldest_first: bool,
    },
}

#[derive(Serialize)]
struct OpenWallet {
    currency: String,
}

#[derive(Serialize)]
struct HistoryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<EntryKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<EntryStatus>,
    page: u32,
    per_page: u32,
    newest_first: bool,
}

pub fn print_wallet(wallet: &Wallet) {
    println!("Wallet {}", wallet.id);
    println!("  Account:   {}", wallet.account);
    println!("  Status:    {}", wallet.status);
    println!("  Available: {}", wallet.available);
    println!("  Locked:    {}", wallet.escrow);
    println!("  Deposited: {}", wallet.total_deposited);
    println!("  Withdrawn: {}", wallet.total_withdrawn);
    println!("  Earned:    {}", wallet.total_earned);
}

fn print_entry(entry: &LedgerEntry) {
    println!(
        "  #{:<4} {} {:<14} {:>16} {:<10} avail={} escrow={}  {}",
        entry.sequence,
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        entry.kind.as_str(),
        entry.amount.to_string(),
        entry.status.as_str(),
        entry.available_after,
        entry.escrow_after,
        entry.description,
    );
}

pub async fn run(args: &WalletArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.connect);
    match &args.command {
        WalletCommand::Open { currency } => {
            let wallet: Wallet = client
                .post(
                    "/wallets",
                    &OpenWallet {
                        currency: currency.to_uppercase(),
                    },
                )
                .await?;
            print_wallet(&wallet);
        }
        WalletCommand::List { account } => {
            let account = match account {
                Some(account) => *account,
                None => client.account()?,
            };
            let wallets: Vec<Wallet> = client.get(&format!("/accounts/{account}/wallets")).await?;
            if wallets.is_empty() {
                println!("No wallets for {account}");
            }
            for wallet in &wallets {
                print_wallet(wallet);
                println!();
            }
        }
        WalletCommand::Show { wallet_id } => {
            let wallet: Wallet = client.get(&format!("/wallets/{wallet_id}")).await?;
            print_wallet(&wallet);
        }
        WalletCommand::History {
            wallet_id,
            kind,
            status,
            page,
            per_page,
            oldest_first,
        } => {
            let params = HistoryParams {
                kind: *kind,
                status: *status,
                page: *page,
                per_page: *per_page,
                newest_first: !oldest_first,
            };
            let history: Page<LedgerEntry> = client
                .get_query(&format!("/wallets/{wallet_id}/transactions"), &params)
                .await?;
            println!(
                "Page {} ({} per page, {} entries total)",
                history.page, history.per_page, history.total
            );
            for entry in &history.items {
                print_entry(entry);
            }
        }
    }
    Ok(())
}
