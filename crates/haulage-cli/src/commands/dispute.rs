//! `haulage dispute`: open, review and resolve trip disputes.

use clap::{Args, Subcommand, ValueEnum};
use haulage_core::{DisputeId, DisputeStatus, TripId};
use haulage_settlement::{Dispute, DisputeReason, OpenDispute, Resolution};
use serde::Serialize;

use super::client::{parse_amount, ConnectArgs, NodeClient};

#[derive(Args, Debug)]
pub struct DisputeArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(subcommand)]
    pub command: DisputeCommand,
}

#[derive(Subcommand, Debug)]
pub enum DisputeCommand {
    /// Open a dispute on a delivered or confirmed trip.
    Open {
        trip_id: TripId,
        /// damaged_goods, missing_items, late_delivery, wrong_delivery,
        /// no_delivery, overcharge, fraud or other.
        #[arg(short, long)]
        reason: DisputeReason,
        /// What happened (20 to 2000 characters).
        #[arg(short, long)]
        description: String,
        /// Evidence references (photo URLs, documents). Repeatable.
        #[arg(long)]
        evidence: Vec<String>,
    },
    /// List disputes visible to the acting account.
    List {
        /// open, under_review, escalated, resolved_payer, resolved_payee or resolved_split.
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a dispute.
    Show { dispute_id: DisputeId },
    /// Pick up an open dispute (admin).
    Review {
        dispute_id: DisputeId,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Escalate to senior review.
    Escalate {
        dispute_id: DisputeId,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Settle the disputed hold (admin).
    Resolve {
        dispute_id: DisputeId,
        #[arg(value_enum)]
        outcome: Outcome,
        /// Shipper's share for a split, e.g. 200.00
        #[arg(long, required_if_eq("outcome", "split"))]
        refund: Option<String>,
        /// Courier's share for a split.
        #[arg(long, required_if_eq("outcome", "split"))]
        payout: Option<String>,
        #[arg(short, long, default_value = "GHS")]
        currency: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Full refund to the shipper.
    Payer,
    /// Normal release to the courier.
    Payee,
    /// Explicit shares; the rest stays with the platform.
    Split,
}

#[derive(Serialize)]
struct StatusFilter {
    status: DisputeStatus,
}

#[derive(Serialize)]
struct Notes<'a> {
    notes: Option<&'a str>,
}

#[derive(Serialize)]
struct Resolve<'a> {
    resolution: Resolution,
    notes: Option<&'a str>,
}

fn parse_status(status: &str) -> anyhow::Result<DisputeStatus> {
    let value = serde_json::Value::String(status.to_ascii_lowercase());
    serde_json::from_value(value).map_err(|_| anyhow::anyhow!("unknown dispute status: {status}"))
}

fn resolution(
    outcome: Outcome,
    refund: Option<&str>,
    payout: Option<&str>,
    currency: &str,
) -> anyhow::Result<Resolution> {
    Ok(match outcome {
        Outcome::Payer => Resolution::FavorPayer,
        Outcome::Payee => Resolution::FavorPayee,
        Outcome::Split => Resolution::Split {
            payer_refund: parse_amount(refund.unwrap_or("0"), currency)?,
            payee_payout: parse_amount(payout.unwrap_or("0"), currency)?,
        },
    })
}

fn print_dispute(dispute: &Dispute) {
    println!("Dispute {}", dispute.id);
    println!("  Trip:      {}", dispute.trip_id);
    println!("  Hold:      {}", dispute.hold_id);
    println!("  Status:    {}", dispute.status);
    println!("  Reason:    {}", dispute.reason.as_str());
    println!("  Raised by: {}", dispute.raised_by);
    println!("  Against:   {}", dispute.counterparty);
    println!("  Details:   {}", dispute.description);
    for item in &dispute.evidence {
        println!("  Evidence:  {item}");
    }
    if let Some(record) = &dispute.resolution {
        println!("  Resolved:  {} by {}", record.resolved_at, record.resolved_by);
        println!("    Refund to shipper: {}", record.payer_refund);
        println!("    Paid to courier:   {}", record.payee_payout);
        println!("    Platform retained: {}", record.platform_retained);
    }
}

pub async fn run(args: &DisputeArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.connect);
    match &args.command {
        DisputeCommand::Open {
            trip_id,
            reason,
            description,
            evidence,
        } => {
            let request = OpenDispute {
                trip_id: *trip_id,
                reason: *reason,
                description: description.clone(),
                evidence: evidence.clone(),
            };
            let dispute: Dispute = client.post("/disputes", &request).await?;
            println!("Dispute opened; the escrow hold is frozen until resolution.");
            print_dispute(&dispute);
        }
        DisputeCommand::List { status } => {
            let disputes: Vec<Dispute> = match status {
                Some(status) => {
                    let filter = StatusFilter {
                        status: parse_status(status)?,
                    };
                    client.get_query("/disputes", &filter).await?
                }
                None => client.get("/disputes").await?,
            };
            if disputes.is_empty() {
                println!("No disputes");
            }
            for dispute in &disputes {
                print_dispute(dispute);
                println!();
            }
        }
        DisputeCommand::Show { dispute_id } => {
            let dispute: Dispute = client.get(&format!("/disputes/{dispute_id}")).await?;
            print_dispute(&dispute);
        }
        DisputeCommand::Review { dispute_id, notes } => {
            let dispute: Dispute = client
                .post(
                    &format!("/disputes/{dispute_id}/review"),
                    &Notes {
                        notes: notes.as_deref(),
                    },
                )
                .await?;
            print_dispute(&dispute);
        }
        DisputeCommand::Escalate { dispute_id, reason } => {
            let dispute: Dispute = client
                .post(
                    &format!("/disputes/{dispute_id}/escalate"),
                    &Notes {
                        notes: reason.as_deref(),
                    },
                )
                .await?;
            print_dispute(&dispute);
        }
        DisputeCommand::Resolve {
            dispute_id,
            outcome,
            refund,
            payout,
            currency,
            notes,
        } => {
            let body = Resolve {
                resolution: resolution(*outcome, refund.as_deref(), payout.as_deref(), currency)?,
                notes: notes.as_deref(),
            };
            let dispute: Dispute = client
                .post(&format!("/disputes/{dispute_id}/resolve"), &body)
                .await?;
            print_dispute(&dispute);
        }
    }
    Ok(())
}
