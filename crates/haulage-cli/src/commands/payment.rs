//! `haulage payment`: mobile-money deposits and withdrawals.

use clap::{Args, Subcommand, ValueEnum};
use haulage_core::{AccountId, PaymentId};
use haulage_settlement::{
    CallbackAck, CallbackStatus, DepositRequest, PaymentInitiated, PaymentRecord, Provider,
    WithdrawRequest,
};
use serde::Serialize;

use super::client::{parse_amount, ConnectArgs, NodeClient};

#[derive(Args, Debug)]
pub struct PaymentArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(subcommand)]
    pub command: PaymentCommand,
}

#[derive(Subcommand, Debug)]
pub enum PaymentCommand {
    /// Collect funds from a mobile-money number into a wallet.
    Deposit {
        /// Decimal amount, e.g. 250.00
        amount: String,
        #[arg(short, long, default_value = "GHS")]
        currency: String,
        /// mtn, vodafone or airteltigo.
        #[arg(short, long)]
        provider: Provider,
        /// Mobile number to collect from (+233XXXXXXXXX or 0XXXXXXXXX).
        #[arg(long)]
        phone: String,
        /// Wallet owner; defaults to the acting account.
        #[arg(long)]
        account: Option<AccountId>,
    },
    /// Pay out from a wallet to a mobile-money number. A fee applies.
    Withdraw {
        amount: String,
        #[arg(short, long, default_value = "GHS")]
        currency: String,
        #[arg(short, long)]
        provider: Provider,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        account: Option<AccountId>,
    },
    /// Show a payment by id.
    Show { payment_id: PaymentId },
    /// Show a payment by its external key (MOMO-...).
    Lookup { external_key: String },
    /// Settle a request on the node's sandbox rail.
    Settle {
        provider: Provider,
        external_key: String,
        #[arg(value_enum, default_value_t = Outcome::Success)]
        outcome: Outcome,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl From<Outcome> for CallbackStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => CallbackStatus::Success,
            Outcome::Failed => CallbackStatus::Failed,
            Outcome::Timeout => CallbackStatus::Timeout,
            Outcome::Cancelled => CallbackStatus::Cancelled,
        }
    }
}

#[derive(Serialize)]
struct SettleRequest {
    external_key: String,
    status: CallbackStatus,
}

fn print_initiated(what: &str, initiated: &PaymentInitiated) {
    println!("{what} initiated!");
    println!("  Payment ID:   {}", initiated.payment_id);
    println!("  External key: {}", initiated.external_key);
    println!("  Amount:       {}", initiated.amount);
    println!("  Fee:          {}", initiated.fee);
    println!("  Net amount:   {}", initiated.net_amount);
    println!("  Status:       {}", initiated.status);
}

fn print_record(record: &PaymentRecord) {
    println!("Payment {}", record.id);
    println!("  Direction:    {:?}", record.direction);
    println!("  External key: {}", record.external_key);
    println!("  Provider:     {} ({})", record.provider, record.handle);
    println!("  Amount:       {}", record.amount);
    println!("  Fee:          {}", record.fee);
    println!("  Status:       {}", record.status);
    if let Some(reference) = &record.provider_reference {
        println!("  Provider ref: {reference}");
    }
    if let Some(message) = &record.message {
        println!("  Message:      {message}");
    }
}

pub async fn run(args: &PaymentArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.connect);
    match &args.command {
        PaymentCommand::Deposit {
            amount,
            currency,
            provider,
            phone,
            account,
        } => {
            let request = DepositRequest {
                account: account.map_or_else(|| client.account(), Ok)?,
                amount: parse_amount(amount, currency)?,
                provider: *provider,
                payer_handle: phone.clone(),
            };
            let initiated: PaymentInitiated = client.post("/payments/deposit", &request).await?;
            print_initiated("Deposit", &initiated);
            println!();
            println!("Approve the prompt on {phone}; the wallet is credited once the provider confirms.");
        }
        PaymentCommand::Withdraw {
            amount,
            currency,
            provider,
            phone,
            account,
        } => {
            let request = WithdrawRequest {
                account: account.map_or_else(|| client.account(), Ok)?,
                amount: parse_amount(amount, currency)?,
                provider: *provider,
                payee_handle: phone.clone(),
            };
            let initiated: PaymentInitiated = client.post("/payments/withdraw", &request).await?;
            print_initiated("Withdrawal", &initiated);
        }
        PaymentCommand::Show { payment_id } => {
            let record: PaymentRecord = client.get(&format!("/payments/{payment_id}")).await?;
            print_record(&record);
        }
        PaymentCommand::Lookup { external_key } => {
            let record: PaymentRecord =
                client.get(&format!("/payments/by-key/{external_key}")).await?;
            print_record(&record);
        }
        PaymentCommand::Settle {
            provider,
            external_key,
            outcome,
        } => {
            let ack: CallbackAck = client
                .post(
                    &format!("/sandbox/{provider}/settle"),
                    &SettleRequest {
                        external_key: external_key.clone(),
                        status: (*outcome).into(),
                    },
                )
                .await?;
            match ack {
                CallbackAck::Applied { payment_id, status } => {
                    println!("Payment {payment_id} settled: {status}");
                }
                CallbackAck::AlreadyProcessed { payment_id, status } => {
                    println!("Payment {payment_id} was already {status}; nothing changed");
                }
            }
        }
    }
    Ok(())
}
