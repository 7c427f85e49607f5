use chrono::{DateTime, Utc};
use dashmap::DashMap;
use haulage_core::{AccountId, DisputeId, HoldId, Money, PayoutId, TripId, WalletId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Scheduled,
    Processing,
    /// Funds are in the payee's wallet.
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Money released from a hold to its payee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub id: PayoutId,
    pub hold_id: HoldId,
    pub trip_id: TripId,
    pub payee: AccountId,
    pub payee_wallet: WalletId,
    /// Net of commission.
    pub amount: Money,
    pub status: PayoutStatus,
    /// Set when the payout came out of a dispute resolution.
    pub dispute_id: Option<DisputeId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payout records indexed by payee.
#[derive(Default)]
pub(crate) struct PayoutBook {
    payouts: DashMap<PayoutId, PayoutRecord>,
    by_payee: DashMap<AccountId, Vec<PayoutId>>,
}

impl PayoutBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a payout whose funds already sit in the payee's wallet.
    pub fn record_completed(
        &self,
        hold_id: HoldId,
        trip_id: TripId,
        payee: AccountId,
        payee_wallet: WalletId,
        amount: Money,
        dispute_id: Option<DisputeId>,
    ) -> PayoutRecord {
        let now = Utc::now();
        let record = PayoutRecord {
            id: PayoutId::new(),
            hold_id,
            trip_id,
            payee,
            payee_wallet,
            amount,
            status: PayoutStatus::Completed,
            dispute_id,
            created_at: now,
            completed_at: Some(now),
        };
        self.payouts.insert(record.id, record.clone());
        self.by_payee.entry(payee).or_default().push(record.id);
        tracing::info!(payout_id = %record.id, %hold_id, amount = %amount, "payout recorded");
        record
    }

    pub fn get(&self, id: &PayoutId) -> Option<PayoutRecord> {
        self.payouts.get(id).map(|p| p.clone())
    }

    /// Newest first.
    pub fn for_payee(&self, payee: &AccountId) -> Vec<PayoutRecord> {
        let ids = self
            .by_payee
            .get(payee)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter().rev().filter_map(|id| self.get(id)).collect()
    }

    pub fn for_hold(&self, hold_id: &HoldId) -> Vec<PayoutRecord> {
        self.payouts
            .iter()
            .filter(|p| p.hold_id == *hold_id)
            .map(|p| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.payouts.len()
    }
}
