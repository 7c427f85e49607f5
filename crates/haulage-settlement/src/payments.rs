//! Deposits and withdrawals through a mobile-money gateway, reconciled by
//! idempotent callbacks.
//!
//! A deposit is recorded as a pending ledger entry and only credits the
//! wallet when the success callback arrives. A withdrawal debits amount
//! plus fee immediately; any failure (callback, timeout or a synchronous
//! gateway rejection) credits the exact debit back with a compensating
//! entry.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use haulage_core::{AccountId, EntryId, Money, PaymentId, WalletId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::Caller;
use crate::engine::SettlementEngine;
use crate::error::SettlementError;
use crate::gateway::{CollectionRequest, DisbursementRequest, GatewayError, Provider, RemoteStatus};
use crate::ledger::{EntryDraft, EntryKind, EntryReference, EntryStatus, LedgerEntry, Tally};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Customer to platform (deposit).
    Collection,
    /// Platform to customer (withdrawal).
    Disbursement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    Pending,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiated => "initiated",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal outcomes a rail can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl From<CallbackStatus> for PaymentStatus {
    fn from(status: CallbackStatus) -> Self {
        match status {
            CallbackStatus::Success => PaymentStatus::Success,
            CallbackStatus::Failed => PaymentStatus::Failed,
            CallbackStatus::Timeout => PaymentStatus::Timeout,
            CallbackStatus::Cancelled => PaymentStatus::Cancelled,
        }
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        PaymentStatus::from(*self).fmt(f)
    }
}

/// One collection or disbursement attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub direction: PaymentDirection,
    pub account: AccountId,
    pub wallet_id: WalletId,
    pub provider: Provider,
    /// Normalised MSISDN, e.g. `+233241234567`.
    pub handle: String,
    pub amount: Money,
    pub fee: Money,
    /// Globally unique idempotency key shared with the rail.
    pub external_key: String,
    pub provider_reference: Option<String>,
    pub status: PaymentStatus,
    /// The ledger entry this payment completes or fails.
    pub entry_id: EntryId,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub account: AccountId,
    pub amount: Money,
    pub provider: Provider,
    pub payer_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub account: AccountId,
    pub amount: Money,
    pub provider: Provider,
    pub payee_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiated {
    pub payment_id: PaymentId,
    pub external_key: String,
    pub amount: Money,
    pub fee: Money,
    /// Amount the customer receives (withdrawal) or is credited (deposit).
    pub net_amount: Money,
    /// `Pending` normally; terminal if the gateway rejected the request.
    pub status: PaymentStatus,
}

/// Asynchronous notification from the rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub external_key: String,
    pub status: CallbackStatus,
    #[serde(default)]
    pub provider_reference: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackAck {
    Applied {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
    /// A replay of a callback whose outcome was already applied.
    AlreadyProcessed {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
}

/// What one sweep pass did with the stale payments it found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    /// Finalised from the rail's own answer.
    pub reconciled: Vec<PaymentId>,
    /// Forced to `timeout`.
    pub expired: Vec<PaymentId>,
    /// Deposits the rail still reports as open.
    pub awaiting_rail: Vec<PaymentId>,
}

impl SweepOutcome {
    /// Payments this pass moved to a terminal state.
    pub fn finalised(&self) -> impl Iterator<Item = &PaymentId> {
        self.reconciled.iter().chain(self.expired.iter())
    }
}

struct StalePayment {
    id: PaymentId,
    direction: PaymentDirection,
    provider: Provider,
    external_key: String,
}

type PaymentCell = Arc<Mutex<PaymentRecord>>;

/// Payment records with an O(1) index by external key.
#[derive(Default)]
pub(crate) struct PaymentBook {
    payments: DashMap<PaymentId, PaymentCell>,
    by_key: DashMap<String, PaymentId>,
}

impl PaymentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a fresh external key for `payment_id`.
    fn claim_key(&self, direction: PaymentDirection, payment_id: PaymentId) -> String {
        loop {
            let key = external_key(direction);
            if let Entry::Vacant(slot) = self.by_key.entry(key.clone()) {
                slot.insert(payment_id);
                return key;
            }
        }
    }

    fn insert(&self, record: PaymentRecord) {
        self.payments
            .insert(record.id, Arc::new(Mutex::new(record)));
    }

    fn cell(&self, id: &PaymentId) -> Option<PaymentCell> {
        self.payments.get(id).map(|p| p.clone())
    }

    fn by_key(&self, key: &str) -> Option<PaymentCell> {
        let id = *self.by_key.get(key)?;
        self.cell(&id)
    }

    fn cells(&self) -> Vec<PaymentCell> {
        self.payments.iter().map(|p| p.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.payments.len()
    }
}

fn lock_payment(cell: &PaymentCell) -> Result<MutexGuard<'_, PaymentRecord>, SettlementError> {
    cell.lock().map_err(|_| SettlementError::poisoned("payment"))
}

/// `MOMO-<12 hex>` for collections, `MOMO-D-<12 hex>` for disbursements.
fn external_key(direction: PaymentDirection) -> String {
    let simple = uuid::Uuid::now_v7().simple().to_string().to_uppercase();
    // The tail of a v7 UUID is random; the head is a timestamp.
    let suffix = &simple[simple.len() - 12..];
    match direction {
        PaymentDirection::Collection => format!("MOMO-{suffix}"),
        PaymentDirection::Disbursement => format!("MOMO-D-{suffix}"),
    }
}

/// Normalise a Ghana mobile number to `+233XXXXXXXXX`.
///
/// Accepts `+233XXXXXXXXX` or `0XXXXXXXXX`; spaces and dashes are ignored.
pub fn normalize_msisdn(handle: &str) -> Result<String, SettlementError> {
    let compact: String = handle
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let subscriber = if let Some(rest) = compact.strip_prefix("+233") {
        rest
    } else if let Some(rest) = compact.strip_prefix('0') {
        rest
    } else {
        return Err(SettlementError::InvalidHandle(handle.to_string()));
    };
    if subscriber.len() != 9 || !subscriber.chars().all(|c| c.is_ascii_digit()) {
        return Err(SettlementError::InvalidHandle(handle.to_string()));
    }
    Ok(format!("+233{subscriber}"))
}

impl SettlementEngine {
    fn check_limits(&self, amount: Money, min: Money) -> Result<(), SettlementError> {
        let max = self.config.max_transaction(amount.currency);
        if amount.minor < min.minor || amount.minor > max.minor {
            return Err(SettlementError::AmountOutOfRange { amount, min, max });
        }
        Ok(())
    }

    /// Start a mobile-money collection into the account's wallet.
    ///
    /// The wallet is credited only when the success callback arrives.
    pub async fn deposit(
        &self,
        caller: &Caller,
        request: DepositRequest,
    ) -> Result<PaymentInitiated, SettlementError> {
        caller.require_party_or_admin(&[request.account], "deposit into this wallet")?;
        self.check_limits(request.amount, self.config.min_deposit(request.amount.currency))?;
        let handle = normalize_msisdn(&request.payer_handle)?;
        let gateway = self.gateways.get(request.provider)?;

        let amount = request.amount;
        let wallet = self.wallets.get_or_create(request.account, amount.currency);
        let payment_id = PaymentId::new();
        let external_key = self
            .payments
            .claim_key(PaymentDirection::Collection, payment_id);

        let draft = EntryDraft::new(EntryKind::Deposit, amount, EntryReference::Payment(payment_id))
            .available(amount.as_delta())
            .status(EntryStatus::Pending)
            .describe(format!("deposit via {} ({handle})", request.provider));
        let entry = wallet.lock()?.record_unposted(&draft)?;

        let now = Utc::now();
        self.payments.insert(PaymentRecord {
            id: payment_id,
            direction: PaymentDirection::Collection,
            account: request.account,
            wallet_id: wallet.id,
            provider: request.provider,
            handle: handle.clone(),
            amount,
            fee: Money::zero(amount.currency),
            external_key: external_key.clone(),
            provider_reference: None,
            status: PaymentStatus::Initiated,
            entry_id: entry.id,
            message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        });
        self.emit(&[entry]);
        tracing::info!(payment_id = %payment_id, %external_key, amount = %amount, "deposit initiated");

        let outcome = gateway
            .request_collection(&CollectionRequest {
                external_key: external_key.clone(),
                amount,
                payer_handle: handle,
                description: "wallet deposit".into(),
            })
            .await
            .map(|ack| ack.provider_reference);
        let status = self.after_gateway_call(payment_id, outcome)?;

        Ok(PaymentInitiated {
            payment_id,
            external_key,
            amount,
            fee: Money::zero(amount.currency),
            net_amount: amount,
            status,
        })
    }

    /// Debit amount plus fee now and ask the rail to disburse the amount.
    pub async fn withdraw(
        &self,
        caller: &Caller,
        request: WithdrawRequest,
    ) -> Result<PaymentInitiated, SettlementError> {
        caller.require_party_or_admin(&[request.account], "withdraw from this wallet")?;
        self.check_limits(
            request.amount,
            self.config.min_withdrawal(request.amount.currency),
        )?;
        let handle = normalize_msisdn(&request.payee_handle)?;
        let gateway = self.gateways.get(request.provider)?;

        let amount = request.amount;
        let fee = self.config.withdrawal_fee.fee_for(amount);
        let debit = amount.checked_add(fee)?;
        let wallet = self.wallets.get_or_create(request.account, amount.currency);
        let payment_id = PaymentId::new();

        let draft = EntryDraft::new(EntryKind::Withdrawal, amount, EntryReference::Payment(payment_id))
            .available(-debit.as_delta())
            .fee(fee, amount)
            .status(EntryStatus::Processing)
            .tally(Tally::Withdrawn(amount.minor))
            .describe(format!("withdrawal to {} ({handle})", request.provider));
        let entry = wallet.lock()?.post(&draft)?;

        let external_key = self
            .payments
            .claim_key(PaymentDirection::Disbursement, payment_id);
        let now = Utc::now();
        self.payments.insert(PaymentRecord {
            id: payment_id,
            direction: PaymentDirection::Disbursement,
            account: request.account,
            wallet_id: wallet.id,
            provider: request.provider,
            handle: handle.clone(),
            amount,
            fee,
            external_key: external_key.clone(),
            provider_reference: None,
            status: PaymentStatus::Initiated,
            entry_id: entry.id,
            message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        });
        self.emit(&[entry]);
        tracing::info!(
            payment_id = %payment_id,
            %external_key,
            amount = %amount,
            fee = %fee,
            "withdrawal initiated"
        );

        let outcome = gateway
            .request_disbursement(&DisbursementRequest {
                external_key: external_key.clone(),
                amount,
                payee_handle: handle,
                description: "wallet withdrawal".into(),
            })
            .await
            .map(|ack| ack.provider_reference);
        let status = self.after_gateway_call(payment_id, outcome)?;

        Ok(PaymentInitiated {
            payment_id,
            external_key,
            amount,
            fee,
            net_amount: amount,
            status,
        })
    }

    /// Record the gateway's synchronous answer. A rejection takes the same
    /// path as a failed callback.
    fn after_gateway_call(
        &self,
        payment_id: PaymentId,
        outcome: Result<Option<String>, GatewayError>,
    ) -> Result<PaymentStatus, SettlementError> {
        let cell = self
            .payments
            .cell(&payment_id)
            .ok_or_else(|| SettlementError::Internal(format!("payment {payment_id} vanished")))?;
        let mut record = lock_payment(&cell)?;
        match outcome {
            Ok(provider_reference) => {
                // A callback may already have finalised the record.
                if record.status == PaymentStatus::Initiated {
                    record.status = PaymentStatus::Pending;
                    record.updated_at = Utc::now();
                }
                if record.provider_reference.is_none() {
                    record.provider_reference = provider_reference;
                }
                Ok(record.status)
            }
            Err(err) => {
                tracing::warn!(payment_id = %payment_id, external_key = %record.external_key, %err, "gateway rejected payment");
                let entries = self.finalize(&mut record, PaymentStatus::Failed, Some(err.to_string()))?;
                let status = record.status;
                drop(record);
                self.emit(&entries);
                Ok(status)
            }
        }
    }

    /// Apply a rail callback exactly once per external key.
    pub fn payment_callback(
        &self,
        callback: PaymentCallback,
    ) -> Result<CallbackAck, SettlementError> {
        let cell = self
            .payments
            .by_key(&callback.external_key)
            .ok_or_else(|| SettlementError::ExternalPaymentNotFound(callback.external_key.clone()))?;
        let mut record = lock_payment(&cell)?;
        if record.status.is_terminal() {
            tracing::debug!(
                external_key = %callback.external_key,
                status = %record.status,
                "callback already processed"
            );
            return Ok(CallbackAck::AlreadyProcessed {
                payment_id: record.id,
                status: record.status,
            });
        }

        if callback.provider_reference.is_some() {
            record.provider_reference = callback.provider_reference;
        }
        let entries = self.finalize(&mut record, callback.status.into(), callback.message)?;
        let ack = CallbackAck::Applied {
            payment_id: record.id,
            status: record.status,
        };
        drop(record);
        self.emit(&entries);
        Ok(ack)
    }

    /// Reconcile payments still open past the configured window.
    ///
    /// Each stale payment is checked against its rail first. A rail answer
    /// of success or failure is applied as if its callback had arrived. A
    /// withdrawal the rail cannot confirm is forced to `timeout` and
    /// reversed. A deposit is only forced when the rail has no record of
    /// it; otherwise it stays pending so a late success still credits.
    pub async fn expire_stale_payments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, SettlementError> {
        let cutoff = now - self.config.payment_timeout();
        let mut stale = Vec::new();
        for cell in self.payments.cells() {
            let record = lock_payment(&cell)?;
            if record.status.is_terminal() || record.created_at > cutoff {
                continue;
            }
            stale.push(StalePayment {
                id: record.id,
                direction: record.direction,
                provider: record.provider,
                external_key: record.external_key.clone(),
            });
        }

        let mut outcome = SweepOutcome::default();
        for payment in stale {
            let remote = match self.gateways.get(payment.provider) {
                Ok(gateway) => gateway.query_status(&payment.external_key).await,
                Err(err) => Err(GatewayError::Unavailable(err.to_string())),
            };
            let (status, message) = match (payment.direction, remote) {
                (_, Ok(RemoteStatus::Succeeded)) => (PaymentStatus::Success, None),
                (_, Ok(RemoteStatus::Failed(reason))) => (PaymentStatus::Failed, Some(reason)),
                (_, Err(GatewayError::UnknownReference(_))) => (
                    PaymentStatus::Timeout,
                    Some("rail has no record of the payment".to_string()),
                ),
                (PaymentDirection::Disbursement, _) => (
                    PaymentStatus::Timeout,
                    Some("no callback within the payment window".to_string()),
                ),
                (PaymentDirection::Collection, remote) => {
                    tracing::debug!(
                        payment_id = %payment.id,
                        external_key = %payment.external_key,
                        ?remote,
                        "stale deposit still open at the rail"
                    );
                    outcome.awaiting_rail.push(payment.id);
                    continue;
                }
            };

            let Some(cell) = self.payments.cell(&payment.id) else {
                continue;
            };
            let mut record = lock_payment(&cell)?;
            // A callback may have landed while the rail was being queried.
            if record.status.is_terminal() {
                continue;
            }
            if status == PaymentStatus::Timeout {
                tracing::warn!(
                    payment_id = %record.id,
                    external_key = %record.external_key,
                    "payment timed out"
                );
            }
            let entries = self.finalize(&mut record, status, message)?;
            match status {
                PaymentStatus::Timeout => outcome.expired.push(record.id),
                _ => outcome.reconciled.push(record.id),
            }
            drop(record);
            self.emit(&entries);
        }
        Ok(outcome)
    }

    /// Move a non-terminal payment to `status` and apply its ledger effect.
    ///
    /// Caller holds the payment lock; this takes the wallet lock.
    fn finalize(
        &self,
        record: &mut PaymentRecord,
        status: PaymentStatus,
        message: Option<String>,
    ) -> Result<Vec<LedgerEntry>, SettlementError> {
        let wallet = self.wallets.handle(&record.wallet_id)?;
        let mut book = wallet.lock()?;
        let entries = match (record.direction, status) {
            (PaymentDirection::Collection, PaymentStatus::Success) => {
                vec![book.post_recorded(&record.entry_id, EntryStatus::Completed)?]
            }
            (PaymentDirection::Collection, _) => {
                vec![book.set_entry_status(&record.entry_id, EntryStatus::Failed)?]
            }
            (PaymentDirection::Disbursement, PaymentStatus::Success) => {
                self.platform.add_fees(record.fee);
                vec![book.set_entry_status(&record.entry_id, EntryStatus::Completed)?]
            }
            (PaymentDirection::Disbursement, _) => {
                let debit = record.amount.checked_add(record.fee)?;
                let reversal = EntryDraft::new(
                    EntryKind::Adjustment,
                    debit,
                    EntryReference::Entry(record.entry_id),
                )
                .available(debit.as_delta())
                .tally(Tally::WithdrawalReversed(record.amount.minor))
                .compensating()
                .describe(format!("reversal of failed withdrawal {}", record.external_key));
                let failed = book.set_entry_status(&record.entry_id, EntryStatus::Failed)?;
                let reversed = book.post(&reversal)?;
                tracing::warn!(
                    payment_id = %record.id,
                    wallet_id = %record.wallet_id,
                    amount = %debit,
                    "withdrawal reversed"
                );
                vec![failed, reversed]
            }
        };
        drop(book);

        let now = Utc::now();
        record.status = status;
        record.message = message;
        record.updated_at = now;
        record.completed_at = Some(now);
        tracing::info!(
            payment_id = %record.id,
            external_key = %record.external_key,
            status = %status,
            "payment finalised"
        );
        Ok(entries)
    }

    pub fn get_payment(
        &self,
        caller: &Caller,
        payment_id: PaymentId,
    ) -> Result<PaymentRecord, SettlementError> {
        let cell = self
            .payments
            .cell(&payment_id)
            .ok_or_else(|| SettlementError::ExternalPaymentNotFound(payment_id.to_string()))?;
        let record = lock_payment(&cell)?.clone();
        caller.require_party_or_admin(&[record.account], "view this payment")?;
        Ok(record)
    }

    pub fn payment_by_key(
        &self,
        caller: &Caller,
        external_key: &str,
    ) -> Result<PaymentRecord, SettlementError> {
        let cell = self
            .payments
            .by_key(external_key)
            .ok_or_else(|| SettlementError::ExternalPaymentNotFound(external_key.to_string()))?;
        let record = lock_payment(&cell)?.clone();
        caller.require_party_or_admin(&[record.account], "view this payment")?;
        Ok(record)
    }
}
