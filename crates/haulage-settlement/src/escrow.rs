use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use haulage_core::{
    AccountId, Bps, CoreError, DisputeId, HoldEvent, HoldId, HoldState, HoldStateMachine, Money,
    PayoutId, TripId, WalletId,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::Caller;
use crate::engine::SettlementEngine;
use crate::error::SettlementError;
use crate::ledger::{EntryDraft, EntryKind, EntryReference, LedgerEntry, Tally};
use crate::trips::{TripSnapshot, TripStatus};
use crate::wallet::lock_pair;

/// Funds locked against one trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowHold {
    pub id: HoldId,
    pub trip_id: TripId,
    pub payer: AccountId,
    pub payee: AccountId,
    pub payer_wallet: WalletId,
    /// Filled in at settlement if the payee had no wallet at hold time.
    pub payee_wallet: Option<WalletId>,
    pub amount: Money,
    /// Rate in force when the hold was created.
    pub commission_rate: Bps,
    pub state: HoldState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldCreated {
    pub id: HoldId,
    pub trip_id: TripId,
    pub amount: Money,
    pub status: HoldState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Released {
    pub hold_id: HoldId,
    pub commission: Money,
    pub net_payout: Money,
    pub payout_id: PayoutId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refunded {
    pub hold_id: HoldId,
    pub amount: Money,
}

/// Amounts applied by a split settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SplitApplied {
    pub payer_refund: Money,
    pub payee_payout: Money,
    pub platform_retained: Money,
    pub payout_id: Option<PayoutId>,
}

pub(crate) type HoldCell = Arc<Mutex<EscrowHold>>;

/// Escrow holds, with the one-hold-per-trip index.
#[derive(Default)]
pub(crate) struct HoldBook {
    holds: DashMap<HoldId, HoldCell>,
    by_trip: DashMap<TripId, HoldId>,
}

impl HoldBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the trip's hold slot for `hold_id`.
    fn reserve(&self, trip_id: TripId, hold_id: HoldId) -> Result<(), SettlementError> {
        match self.by_trip.entry(trip_id) {
            Entry::Occupied(_) => Err(SettlementError::DuplicateHold { trip: trip_id }),
            Entry::Vacant(slot) => {
                slot.insert(hold_id);
                Ok(())
            }
        }
    }

    fn unreserve(&self, trip_id: &TripId, hold_id: &HoldId) {
        self.by_trip.remove_if(trip_id, |_, id| id == hold_id);
    }

    fn insert(&self, hold: EscrowHold) {
        self.holds.insert(hold.id, Arc::new(Mutex::new(hold)));
    }

    pub fn cell(&self, id: &HoldId) -> Result<HoldCell, SettlementError> {
        self.holds
            .get(id)
            .map(|h| h.clone())
            .ok_or(SettlementError::HoldNotFound(*id))
    }

    pub fn for_trip(&self, trip_id: &TripId) -> Option<HoldId> {
        self.by_trip.get(trip_id).map(|id| *id)
    }

    pub fn snapshots(&self) -> Result<Vec<EscrowHold>, SettlementError> {
        let cells: Vec<HoldCell> = self.holds.iter().map(|h| h.value().clone()).collect();
        cells
            .iter()
            .map(|c| Ok(lock_hold(c)?.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }
}

pub(crate) fn lock_hold(cell: &HoldCell) -> Result<MutexGuard<'_, EscrowHold>, SettlementError> {
    cell.lock().map_err(|_| SettlementError::poisoned("escrow hold"))
}

/// Next state for `event`, or `InvalidHoldState` naming the accepted sources.
pub(crate) fn advance(hold: &EscrowHold, event: HoldEvent) -> Result<HoldState, SettlementError> {
    HoldStateMachine::transition(hold.state, event).map_err(|err| match err {
        CoreError::InvalidHoldTransition { from, event } => SettlementError::InvalidHoldState {
            hold: hold.id,
            current: from,
            required: HoldStateMachine::sources(event)
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" or "),
        },
        other => other.into(),
    })
}

impl SettlementEngine {
    pub(crate) fn trip_snapshot(&self, trip_id: &TripId) -> Result<TripSnapshot, SettlementError> {
        self.trips
            .trip(trip_id)
            .ok_or(SettlementError::TripNotFound(*trip_id))
    }

    /// Lock the shipper's funds for the trip's accepted bid.
    ///
    /// The amount is the agreed price the trip directory reports, never a
    /// figure supplied by the caller.
    pub fn hold_for_trip(
        &self,
        caller: &Caller,
        trip_id: TripId,
    ) -> Result<HoldCreated, SettlementError> {
        let trip = self.trip_snapshot(&trip_id)?;
        caller.require_party_or_admin(&[trip.shipper], "create an escrow hold")?;
        if trip.status != TripStatus::PickupPending {
            return Err(SettlementError::TripNotEligible {
                trip: trip.trip_id,
                current: trip.status,
                required: TripStatus::PickupPending.to_string(),
            });
        }
        if trip.shipper == trip.courier {
            return Err(SettlementError::Validation(
                "shipper and courier must be different accounts".into(),
            ));
        }
        if trip.agreed_price.is_zero() {
            return Err(SettlementError::Validation("trip has no agreed price".into()));
        }

        let hold_id = HoldId::new();
        self.holds.reserve(trip.trip_id, hold_id)?;
        match self.lock_funds(&trip, hold_id, trip.agreed_price) {
            Ok((created, entry)) => {
                self.emit(&[entry]);
                Ok(created)
            }
            Err(err) => {
                self.holds.unreserve(&trip.trip_id, &hold_id);
                Err(err)
            }
        }
    }

    fn lock_funds(
        &self,
        trip: &TripSnapshot,
        hold_id: HoldId,
        amount: Money,
    ) -> Result<(HoldCreated, LedgerEntry), SettlementError> {
        let payer = self.wallets.get_or_create(trip.shipper, amount.currency);
        let payee_wallet = self
            .wallets
            .find(&trip.courier, amount.currency)
            .map(|h| h.id);

        let mut book = payer.lock()?;
        let draft = EntryDraft::new(EntryKind::EscrowHold, amount, EntryReference::Hold(hold_id))
            .available(-amount.as_delta())
            .escrow(amount.as_delta())
            .describe(format!("escrow hold for trip {}", trip.trip_id));
        let entry = book.post(&draft)?;

        let now = Utc::now();
        let hold = EscrowHold {
            id: hold_id,
            trip_id: trip.trip_id,
            payer: trip.shipper,
            payee: trip.courier,
            payer_wallet: payer.id,
            payee_wallet,
            amount,
            commission_rate: self.config.commission_rate,
            state: HoldState::Held,
            created_at: now,
            updated_at: now,
            settled_at: None,
        };
        self.holds.insert(hold.clone());
        drop(book);

        tracing::info!(
            hold_id = %hold_id,
            trip_id = %trip.trip_id,
            wallet_id = %payer.id,
            amount = %amount,
            commission_rate = %hold.commission_rate,
            "escrow hold created"
        );
        Ok((
            HoldCreated {
                id: hold_id,
                trip_id: trip.trip_id,
                amount,
                status: HoldState::Held,
            },
            entry,
        ))
    }

    /// Pay the hold out to the courier once delivery is confirmed.
    pub fn release(&self, caller: &Caller, hold_id: HoldId) -> Result<Released, SettlementError> {
        let cell = self.holds.cell(&hold_id)?;
        let mut hold = lock_hold(&cell)?;
        caller.require_party_or_admin(&[hold.payer], "release escrow")?;
        if hold.state != HoldState::Held {
            return Err(SettlementError::InvalidHoldState {
                hold: hold.id,
                current: hold.state,
                required: HoldState::Held.to_string(),
            });
        }
        let trip = self.trip_snapshot(&hold.trip_id)?;
        if trip.status != TripStatus::Confirmed {
            return Err(SettlementError::TripNotEligible {
                trip: trip.trip_id,
                current: trip.status,
                required: TripStatus::Confirmed.to_string(),
            });
        }

        let (released, entries) = self.settle_release(&mut hold, None)?;
        drop(hold);
        self.emit(&entries);
        Ok(released)
    }

    /// Return the full amount to the shipper. Administrators only.
    ///
    /// A disputed hold is refunded by resolving its dispute for the payer.
    pub fn refund(&self, caller: &Caller, hold_id: HoldId) -> Result<Refunded, SettlementError> {
        caller.require_admin("refund escrow")?;
        let cell = self.holds.cell(&hold_id)?;
        let mut hold = lock_hold(&cell)?;
        if hold.state == HoldState::Disputed {
            // Disputes lock before holds; settle through the dispute.
            let trip_id = hold.trip_id;
            drop(hold);
            return self.refund_disputed(caller, hold_id, trip_id);
        }
        let (refunded, entry) = self.settle_refund(&mut hold, None)?;
        drop(hold);
        self.emit(&[entry]);
        Ok(refunded)
    }

    pub fn get_hold(&self, caller: &Caller, hold_id: HoldId) -> Result<EscrowHold, SettlementError> {
        let cell = self.holds.cell(&hold_id)?;
        let hold = lock_hold(&cell)?.clone();
        caller.require_party_or_admin(&[hold.payer, hold.payee], "view escrow hold")?;
        Ok(hold)
    }

    pub fn hold_for_trip_id(
        &self,
        caller: &Caller,
        trip_id: TripId,
    ) -> Result<EscrowHold, SettlementError> {
        let hold_id = self
            .holds
            .for_trip(&trip_id)
            .ok_or(SettlementError::NoHoldForTrip(trip_id))?;
        self.get_hold(caller, hold_id)
    }

    /// Holds the caller is a party to (all of them for administrators),
    /// newest first.
    pub fn list_holds(
        &self,
        caller: &Caller,
        state: Option<HoldState>,
    ) -> Result<Vec<EscrowHold>, SettlementError> {
        let mut holds: Vec<EscrowHold> = self
            .holds
            .snapshots()?
            .into_iter()
            .filter(|h| {
                caller.is_admin() || h.payer == caller.account || h.payee == caller.account
            })
            .filter(|h| state.map_or(true, |s| h.state == s))
            .collect();
        holds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(holds)
    }

    fn entry_reference(hold: &EscrowHold, dispute: Option<DisputeId>) -> EntryReference {
        dispute.map_or(EntryReference::Hold(hold.id), EntryReference::Dispute)
    }

    /// Move the full amount to the payee, less the captured commission.
    pub(crate) fn settle_release(
        &self,
        hold: &mut EscrowHold,
        dispute: Option<DisputeId>,
    ) -> Result<(Released, Vec<LedgerEntry>), SettlementError> {
        let next = advance(hold, HoldEvent::Release)?;
        let amount = hold.amount;
        let commission = Money::new(hold.commission_rate.apply(amount.minor), amount.currency);
        let net = amount.checked_sub(commission)?;
        let reference = Self::entry_reference(hold, dispute);

        let mut payer_drafts = vec![EntryDraft::new(EntryKind::EscrowRelease, amount, reference)
            .escrow(-amount.as_delta())
            .fee(commission, net)
            .describe(format!("escrow released for trip {}", hold.trip_id))];
        if !commission.is_zero() {
            payer_drafts.push(
                EntryDraft::new(EntryKind::Commission, commission, reference).describe(format!(
                    "platform commission at {}",
                    hold.commission_rate
                )),
            );
        }
        let payee_drafts = [EntryDraft::new(EntryKind::EscrowRelease, amount, reference)
            .available(net.as_delta())
            .fee(commission, net)
            .tally(Tally::Earned(net.minor))
            .describe(format!("payment for trip {}", hold.trip_id))];

        let payer = self.wallets.handle(&hold.payer_wallet)?;
        let payee = self.wallets.get_or_create(hold.payee, amount.currency);
        let entries = {
            let (mut payer_book, mut payee_book) = lock_pair(&payer, &payee)?;
            payer_book.check_all(&payer_drafts)?;
            payee_book.check_all(&payee_drafts)?;
            let mut entries = payer_book.post_all(&payer_drafts)?;
            entries.extend(payee_book.post_all(&payee_drafts)?);
            entries
        };

        let now = Utc::now();
        hold.state = next;
        hold.payee_wallet = Some(payee.id);
        hold.updated_at = now;
        hold.settled_at = Some(now);

        let payout = self.payouts.record_completed(
            hold.id,
            hold.trip_id,
            hold.payee,
            payee.id,
            net,
            dispute,
        );
        self.platform.add_commission(commission);

        tracing::info!(
            hold_id = %hold.id,
            payout_id = %payout.id,
            commission = %commission,
            net_payout = %net,
            "escrow released"
        );
        Ok((
            Released {
                hold_id: hold.id,
                commission,
                net_payout: net,
                payout_id: payout.id,
            },
            entries,
        ))
    }

    /// Return the full amount to the payer.
    pub(crate) fn settle_refund(
        &self,
        hold: &mut EscrowHold,
        dispute: Option<DisputeId>,
    ) -> Result<(Refunded, LedgerEntry), SettlementError> {
        let next = advance(hold, HoldEvent::Refund)?;
        let amount = hold.amount;
        let draft = EntryDraft::new(
            EntryKind::EscrowRefund,
            amount,
            Self::entry_reference(hold, dispute),
        )
        .available(amount.as_delta())
        .escrow(-amount.as_delta())
        .describe(format!("escrow refunded for trip {}", hold.trip_id));

        let payer = self.wallets.handle(&hold.payer_wallet)?;
        let entry = payer.lock()?.post(&draft)?;

        let now = Utc::now();
        hold.state = next;
        hold.updated_at = now;
        hold.settled_at = Some(now);

        tracing::info!(hold_id = %hold.id, wallet_id = %payer.id, amount = %amount, "escrow refunded");
        Ok((
            Refunded {
                hold_id: hold.id,
                amount,
            },
            entry,
        ))
    }

    /// Divide a disputed hold between payer and payee; the remainder stays
    /// with the platform.
    pub(crate) fn settle_split(
        &self,
        hold: &mut EscrowHold,
        dispute: DisputeId,
        payer_refund: Money,
        payee_payout: Money,
    ) -> Result<(SplitApplied, Vec<LedgerEntry>), SettlementError> {
        let amount = hold.amount;
        let requested = payer_refund.checked_add(payee_payout)?;
        if requested.currency != amount.currency {
            return Err(CoreError::CurrencyMismatch {
                expected: amount.currency,
                found: requested.currency,
            }
            .into());
        }
        if requested.minor > amount.minor {
            return Err(SettlementError::SplitExceedsHold {
                requested,
                hold_amount: amount,
            });
        }
        let next = advance(hold, HoldEvent::Split)?;
        let retained = amount.checked_sub(requested)?;
        let reference = EntryReference::Dispute(dispute);

        let mut payer_drafts = vec![EntryDraft::new(EntryKind::EscrowRelease, amount, reference)
            .escrow(-amount.as_delta())
            .describe(format!("escrow unlocked by split resolution for trip {}", hold.trip_id))];
        if !payer_refund.is_zero() {
            payer_drafts.push(
                EntryDraft::new(EntryKind::EscrowRefund, payer_refund, reference)
                    .available(payer_refund.as_delta())
                    .describe("shipper share of split resolution"),
            );
        }
        if !retained.is_zero() {
            payer_drafts.push(
                EntryDraft::new(EntryKind::Commission, retained, reference)
                    .describe("platform share of split resolution"),
            );
        }
        let payee_drafts = if payee_payout.is_zero() {
            Vec::new()
        } else {
            vec![EntryDraft::new(EntryKind::EscrowRelease, payee_payout, reference)
                .available(payee_payout.as_delta())
                .tally(Tally::Earned(payee_payout.minor))
                .describe("courier share of split resolution")]
        };

        let payer = self.wallets.handle(&hold.payer_wallet)?;
        let payee = (!payee_drafts.is_empty())
            .then(|| self.wallets.get_or_create(hold.payee, amount.currency));
        let entries = match &payee {
            Some(payee) => {
                let (mut payer_book, mut payee_book) = lock_pair(&payer, payee)?;
                payer_book.check_all(&payer_drafts)?;
                payee_book.check_all(&payee_drafts)?;
                let mut entries = payer_book.post_all(&payer_drafts)?;
                entries.extend(payee_book.post_all(&payee_drafts)?);
                entries
            }
            None => payer.lock()?.post_all(&payer_drafts)?,
        };

        let now = Utc::now();
        hold.state = next;
        hold.updated_at = now;
        hold.settled_at = Some(now);

        let payout_id = payee.as_ref().map(|payee| {
            hold.payee_wallet = Some(payee.id);
            self.payouts
                .record_completed(
                    hold.id,
                    hold.trip_id,
                    hold.payee,
                    payee.id,
                    payee_payout,
                    Some(dispute),
                )
                .id
        });
        self.platform.add_commission(retained);

        tracing::info!(
            hold_id = %hold.id,
            dispute_id = %dispute,
            payer_refund = %payer_refund,
            payee_payout = %payee_payout,
            platform_retained = %retained,
            "escrow split"
        );
        Ok((
            SplitApplied {
                payer_refund,
                payee_payout,
                platform_retained: retained,
                payout_id,
            },
            entries,
        ))
    }
}
