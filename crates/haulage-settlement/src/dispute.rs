//! Admin-arbitrated disputes over an escrow hold.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use haulage_core::{
    AccountId, CoreError, DisputeEvent, DisputeId, DisputeStateMachine, DisputeStatus, HoldEvent,
    HoldId, Money, PayoutId, TripId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::Caller;
use crate::engine::SettlementEngine;
use crate::error::SettlementError;
use crate::escrow::{advance, lock_hold, Refunded};
use crate::trips::TripStatus;

const DESCRIPTION_MIN_CHARS: usize = 20;
const DESCRIPTION_MAX_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    DamagedGoods,
    MissingItems,
    LateDelivery,
    WrongDelivery,
    NoDelivery,
    Overcharge,
    Fraud,
    Other,
}

impl DisputeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DamagedGoods => "damaged_goods",
            Self::MissingItems => "missing_items",
            Self::LateDelivery => "late_delivery",
            Self::WrongDelivery => "wrong_delivery",
            Self::NoDelivery => "no_delivery",
            Self::Overcharge => "overcharge",
            Self::Fraud => "fraud",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DisputeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeReason {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reason = match s.trim().to_ascii_lowercase().as_str() {
            "damaged_goods" => Self::DamagedGoods,
            "missing_items" => Self::MissingItems,
            "late_delivery" => Self::LateDelivery,
            "wrong_delivery" => Self::WrongDelivery,
            "no_delivery" => Self::NoDelivery,
            "overcharge" => Self::Overcharge,
            "fraud" => Self::Fraud,
            "other" => Self::Other,
            other => {
                return Err(SettlementError::Validation(format!(
                    "unknown dispute reason: {other}"
                )))
            }
        };
        Ok(reason)
    }
}

/// How an administrator settles a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// Full refund to the shipper.
    FavorPayer,
    /// Normal release to the courier, commission applies.
    FavorPayee,
    /// Explicit shares; whatever is left of the hold is retained by the platform.
    Split {
        payer_refund: Money,
        payee_payout: Money,
    },
}

impl Resolution {
    fn event(&self) -> DisputeEvent {
        match self {
            Self::FavorPayer => DisputeEvent::ResolveForPayer,
            Self::FavorPayee => DisputeEvent::ResolveForPayee,
            Self::Split { .. } => DisputeEvent::ResolveSplit,
        }
    }
}

/// Amounts actually applied when a dispute was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub resolution: Resolution,
    pub resolved_by: AccountId,
    pub resolved_at: DateTime<Utc>,
    pub payer_refund: Money,
    pub payee_payout: Money,
    pub platform_retained: Money,
    pub payout_id: Option<PayoutId>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub trip_id: TripId,
    pub hold_id: HoldId,
    pub raised_by: AccountId,
    pub counterparty: AccountId,
    pub reason: DisputeReason,
    pub description: String,
    pub evidence: Vec<String>,
    pub status: DisputeStatus,
    pub review_notes: Option<String>,
    pub escalation_reason: Option<String>,
    pub resolution: Option<ResolutionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dispute {
    fn parties(&self) -> [AccountId; 2] {
        [self.raised_by, self.counterparty]
    }
}

/// Request to open a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDispute {
    pub trip_id: TripId,
    pub reason: DisputeReason,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

type DisputeCell = Arc<Mutex<Dispute>>;

#[derive(Default)]
pub(crate) struct DisputeBook {
    disputes: DashMap<DisputeId, DisputeCell>,
    /// At most one active dispute per trip.
    active_by_trip: DashMap<TripId, DisputeId>,
}

impl DisputeBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, id: &DisputeId) -> Result<DisputeCell, SettlementError> {
        self.disputes
            .get(id)
            .map(|d| d.clone())
            .ok_or(SettlementError::DisputeNotFound(*id))
    }

    fn snapshots(&self) -> Result<Vec<Dispute>, SettlementError> {
        let cells: Vec<DisputeCell> = self.disputes.iter().map(|d| d.value().clone()).collect();
        cells.iter().map(|c| Ok(lock_dispute(c)?.clone())).collect()
    }

    fn active_for_trip(&self, trip_id: &TripId) -> Option<DisputeId> {
        self.active_by_trip.get(trip_id).map(|id| *id)
    }

    pub fn len(&self) -> usize {
        self.disputes.len()
    }
}

fn lock_dispute(cell: &DisputeCell) -> Result<MutexGuard<'_, Dispute>, SettlementError> {
    cell.lock().map_err(|_| SettlementError::poisoned("dispute"))
}

fn next_status(dispute: &Dispute, event: DisputeEvent) -> Result<DisputeStatus, SettlementError> {
    DisputeStateMachine::transition(dispute.status, event).map_err(|err| match err {
        CoreError::InvalidDisputeTransition { from, event } => {
            let required = match event {
                DisputeEvent::BeginReview => "open",
                DisputeEvent::Escalate => "open or under_review",
                _ => "open, under_review or escalated",
            };
            SettlementError::InvalidDisputeState {
                dispute: dispute.id,
                current: from,
                required: required.to_string(),
            }
        }
        other => other.into(),
    })
}

impl SettlementEngine {
    /// Open a dispute on a delivered or confirmed trip, freezing its hold.
    ///
    /// Only the trip's shipper or courier may raise one.
    pub fn open_dispute(
        &self,
        caller: &Caller,
        request: OpenDispute,
    ) -> Result<Dispute, SettlementError> {
        let trip = self.trip_snapshot(&request.trip_id)?;
        caller.require_party(&[trip.shipper, trip.courier], "open a dispute")?;
        if !matches!(trip.status, TripStatus::Delivered | TripStatus::Confirmed) {
            return Err(SettlementError::TripNotEligible {
                trip: trip.trip_id,
                current: trip.status,
                required: "delivered or confirmed".into(),
            });
        }
        let description = request.description.trim().to_string();
        let chars = description.chars().count();
        if !(DESCRIPTION_MIN_CHARS..=DESCRIPTION_MAX_CHARS).contains(&chars) {
            return Err(SettlementError::Validation(format!(
                "description must be {DESCRIPTION_MIN_CHARS} to {DESCRIPTION_MAX_CHARS} characters, got {chars}"
            )));
        }
        let hold_id = self
            .holds
            .for_trip(&trip.trip_id)
            .ok_or(SettlementError::NoHoldForTrip(trip.trip_id))?;

        let dispute_id = DisputeId::new();
        match self.disputes.active_by_trip.entry(trip.trip_id) {
            Entry::Occupied(active) => {
                return Err(SettlementError::ActiveDisputeExists {
                    trip: trip.trip_id,
                    dispute: *active.get(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(dispute_id);
            }
        }

        let frozen = self.holds.cell(&hold_id).and_then(|cell| {
            let mut hold = lock_hold(&cell)?;
            hold.state = advance(&hold, HoldEvent::Dispute)?;
            hold.updated_at = Utc::now();
            Ok(())
        });
        if let Err(err) = frozen {
            self.disputes
                .active_by_trip
                .remove_if(&trip.trip_id, |_, id| *id == dispute_id);
            return Err(err);
        }

        let counterparty = if caller.account == trip.courier {
            trip.shipper
        } else {
            trip.courier
        };
        let now = Utc::now();
        let dispute = Dispute {
            id: dispute_id,
            trip_id: trip.trip_id,
            hold_id,
            raised_by: caller.account,
            counterparty,
            reason: request.reason,
            description,
            evidence: request.evidence,
            status: DisputeStatus::Open,
            review_notes: None,
            escalation_reason: None,
            resolution: None,
            created_at: now,
            updated_at: now,
        };
        self.disputes
            .disputes
            .insert(dispute_id, Arc::new(Mutex::new(dispute.clone())));
        self.trips.mark_disputed(&trip.trip_id);

        tracing::info!(
            dispute_id = %dispute_id,
            trip_id = %trip.trip_id,
            hold_id = %hold_id,
            reason = %dispute.reason,
            "dispute opened"
        );
        Ok(dispute)
    }

    /// Administrator picks up an open dispute.
    pub fn begin_review(
        &self,
        caller: &Caller,
        dispute_id: DisputeId,
        notes: Option<String>,
    ) -> Result<Dispute, SettlementError> {
        caller.require_admin("review a dispute")?;
        let cell = self.disputes.cell(&dispute_id)?;
        let mut dispute = lock_dispute(&cell)?;
        dispute.status = next_status(&dispute, DisputeEvent::BeginReview)?;
        dispute.review_notes = notes;
        dispute.updated_at = Utc::now();
        tracing::info!(dispute_id = %dispute_id, "dispute under review");
        Ok(dispute.clone())
    }

    /// Send a dispute to senior review. No funds move.
    pub fn escalate_dispute(
        &self,
        caller: &Caller,
        dispute_id: DisputeId,
        reason: Option<String>,
    ) -> Result<Dispute, SettlementError> {
        let cell = self.disputes.cell(&dispute_id)?;
        let mut dispute = lock_dispute(&cell)?;
        caller.require_party_or_admin(&dispute.parties(), "escalate a dispute")?;
        dispute.status = next_status(&dispute, DisputeEvent::Escalate)?;
        dispute.escalation_reason = reason;
        dispute.updated_at = Utc::now();
        tracing::warn!(dispute_id = %dispute_id, "dispute escalated");
        Ok(dispute.clone())
    }

    /// Settle the disputed hold and close the dispute. Administrators only.
    pub fn resolve_dispute(
        &self,
        caller: &Caller,
        dispute_id: DisputeId,
        resolution: Resolution,
        notes: Option<String>,
    ) -> Result<Dispute, SettlementError> {
        caller.require_admin("resolve a dispute")?;
        let cell = self.disputes.cell(&dispute_id)?;
        let mut dispute = lock_dispute(&cell)?;
        let status = next_status(&dispute, resolution.event())?;

        let hold_cell = self.holds.cell(&dispute.hold_id)?;
        let mut hold = lock_hold(&hold_cell)?;
        let currency = hold.amount.currency;

        let (payer_refund, payee_payout, platform_retained, payout_id, entries) = match resolution
        {
            Resolution::FavorPayer => {
                let (refunded, entry) = self.settle_refund(&mut hold, Some(dispute_id))?;
                (
                    refunded.amount,
                    Money::zero(currency),
                    Money::zero(currency),
                    None,
                    vec![entry],
                )
            }
            Resolution::FavorPayee => {
                let (released, entries) = self.settle_release(&mut hold, Some(dispute_id))?;
                (
                    Money::zero(currency),
                    released.net_payout,
                    released.commission,
                    Some(released.payout_id),
                    entries,
                )
            }
            Resolution::Split {
                payer_refund,
                payee_payout,
            } => {
                let (split, entries) =
                    self.settle_split(&mut hold, dispute_id, payer_refund, payee_payout)?;
                (
                    split.payer_refund,
                    split.payee_payout,
                    split.platform_retained,
                    split.payout_id,
                    entries,
                )
            }
        };
        drop(hold);

        let now = Utc::now();
        dispute.status = status;
        dispute.updated_at = now;
        dispute.resolution = Some(ResolutionRecord {
            resolution,
            resolved_by: caller.account,
            resolved_at: now,
            payer_refund,
            payee_payout,
            platform_retained,
            payout_id,
            notes,
        });
        self.disputes
            .active_by_trip
            .remove_if(&dispute.trip_id, |_, id| *id == dispute_id);
        let resolved = dispute.clone();
        drop(dispute);

        self.emit(&entries);
        tracing::info!(
            dispute_id = %dispute_id,
            status = %status,
            payer_refund = %payer_refund,
            payee_payout = %payee_payout,
            platform_retained = %platform_retained,
            "dispute resolved"
        );
        Ok(resolved)
    }

    /// Refund a frozen hold by closing its dispute in the payer's favour.
    pub(crate) fn refund_disputed(
        &self,
        caller: &Caller,
        hold_id: HoldId,
        trip_id: TripId,
    ) -> Result<Refunded, SettlementError> {
        let dispute_id = self.disputes.active_for_trip(&trip_id).ok_or_else(|| {
            SettlementError::Internal(format!("hold {hold_id} is disputed without an active dispute"))
        })?;
        let resolved = self.resolve_dispute(
            caller,
            dispute_id,
            Resolution::FavorPayer,
            Some("refunded by an administrator".into()),
        )?;
        let amount = resolved
            .resolution
            .map(|r| r.payer_refund)
            .ok_or_else(|| SettlementError::Internal(format!("dispute {dispute_id} has no resolution")))?;
        tracing::info!(hold_id = %hold_id, dispute_id = %dispute_id, "disputed hold refunded");
        Ok(Refunded { hold_id, amount })
    }

    pub fn get_dispute(
        &self,
        caller: &Caller,
        dispute_id: DisputeId,
    ) -> Result<Dispute, SettlementError> {
        let cell = self.disputes.cell(&dispute_id)?;
        let dispute = lock_dispute(&cell)?.clone();
        caller.require_party_or_admin(&dispute.parties(), "view a dispute")?;
        Ok(dispute)
    }

    /// Disputes visible to the caller, newest first.
    pub fn list_disputes(
        &self,
        caller: &Caller,
        status: Option<DisputeStatus>,
    ) -> Result<Vec<Dispute>, SettlementError> {
        let mut disputes: Vec<Dispute> = self
            .disputes
            .snapshots()?
            .into_iter()
            .filter(|d| caller.is_admin() || d.parties().contains(&caller.account))
            .filter(|d| status.map_or(true, |s| d.status == s))
            .collect();
        disputes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(disputes)
    }
}
