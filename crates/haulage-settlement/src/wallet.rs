use chrono::{DateTime, Utc};
use dashmap::DashMap;
use haulage_core::{AccountId, CoreError, Currency, EntryId, Money, WalletId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SettlementError;
use crate::ledger::{EntryDraft, EntryKind, EntryStatus, Journal, LedgerEntry, Tally};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Frozen,
    /// Terminal. Wallets are never deleted.
    Closed,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Frozen => write!(f, "frozen"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Per-(account, currency) balance holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub account: AccountId,
    pub currency: Currency,
    pub available: Money,
    /// Funds locked by escrow holds.
    pub escrow: Money,
    pub total_deposited: Money,
    pub total_withdrawn: Money,
    pub total_earned: Money,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    fn new(account: AccountId, currency: Currency) -> Self {
        let now = Utc::now();
        let zero = Money::zero(currency);
        Self {
            id: WalletId::new(),
            account,
            currency,
            available: zero,
            escrow: zero,
            total_deposited: zero,
            total_withdrawn: zero,
            total_earned: zero,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Available plus locked funds.
    pub fn total(&self) -> Money {
        Money::new(
            self.available.minor.saturating_add(self.escrow.minor),
            self.currency,
        )
    }
}

/// A wallet and its journal, always mutated together under one lock.
#[derive(Debug)]
pub struct WalletBook {
    wallet: Wallet,
    journal: Journal,
}

impl WalletBook {
    pub fn new(account: AccountId, currency: Currency) -> Self {
        Self {
            wallet: Wallet::new(account, currency),
            journal: Journal::new(),
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Balances after applying `draft` on top of `(available, escrow)`.
    fn apply(
        &self,
        draft: &EntryDraft,
        available: u64,
        escrow: u64,
    ) -> Result<(u64, u64), SettlementError> {
        if draft.amount.currency != self.wallet.currency {
            return Err(CoreError::CurrencyMismatch {
                expected: self.wallet.currency,
                found: draft.amount.currency,
            }
            .into());
        }
        if !draft.compensating && self.wallet.status != WalletStatus::Active {
            return Err(SettlementError::WalletUnavailable {
                wallet: self.wallet.id,
                status: self.wallet.status,
            });
        }

        let currency = self.wallet.currency;
        let new_available = available as i128 + draft.available_delta as i128;
        if new_available < 0 {
            let required = draft.available_delta.unsigned_abs();
            return Err(SettlementError::InsufficientFunds {
                available: Money::new(available, currency),
                required: Money::new(required, currency),
                shortfall: Money::new(required - available, currency),
            });
        }
        let new_escrow = escrow as i128 + draft.escrow_delta as i128;
        if new_escrow < 0 {
            return Err(SettlementError::Internal(format!(
                "escrow balance of wallet {} would go negative",
                self.wallet.id
            )));
        }
        let new_available = u64::try_from(new_available).map_err(|_| CoreError::Overflow)?;
        let new_escrow = u64::try_from(new_escrow).map_err(|_| CoreError::Overflow)?;
        Ok((new_available, new_escrow))
    }

    /// Validate a sequence of drafts without mutating anything.
    pub(crate) fn check_all(&self, drafts: &[EntryDraft]) -> Result<(), SettlementError> {
        let (mut available, mut escrow) = (self.wallet.available.minor, self.wallet.escrow.minor);
        for draft in drafts {
            (available, escrow) = self.apply(draft, available, escrow)?;
        }
        Ok(())
    }

    /// Apply the draft's deltas and append its entry as one step.
    pub(crate) fn post(&mut self, draft: &EntryDraft) -> Result<LedgerEntry, SettlementError> {
        let (available, escrow) =
            self.apply(draft, self.wallet.available.minor, self.wallet.escrow.minor)?;
        self.set_balances(available, escrow);
        if let Some(tally) = draft.tally {
            self.apply_tally(tally);
        }
        Ok(self
            .journal
            .append(self.wallet.id, draft, true, available, escrow))
    }

    /// Post several drafts; either all of them land or none do.
    pub(crate) fn post_all(
        &mut self,
        drafts: &[EntryDraft],
    ) -> Result<Vec<LedgerEntry>, SettlementError> {
        self.check_all(drafts)?;
        drafts.iter().map(|d| self.post(d)).collect()
    }

    /// Append an entry whose deltas are applied later by [`Self::post_recorded`].
    pub(crate) fn record_unposted(
        &mut self,
        draft: &EntryDraft,
    ) -> Result<LedgerEntry, SettlementError> {
        self.apply(draft, u64::MAX / 2, u64::MAX / 2)?;
        let (available, escrow) = (self.wallet.available.minor, self.wallet.escrow.minor);
        Ok(self
            .journal
            .append(self.wallet.id, draft, false, available, escrow))
    }

    /// Apply the deltas of a previously recorded, unposted entry.
    ///
    /// The funds behind such an entry have already moved outside the
    /// engine, so the wallet status is not consulted.
    pub(crate) fn post_recorded(
        &mut self,
        entry_id: &EntryId,
        status: EntryStatus,
    ) -> Result<LedgerEntry, SettlementError> {
        let entry = self
            .journal
            .get(entry_id)
            .cloned()
            .ok_or_else(|| SettlementError::Internal(format!("unknown ledger entry {entry_id}")))?;
        if entry.is_posted() {
            return Err(SettlementError::Internal(format!(
                "ledger entry {entry_id} is already posted"
            )));
        }

        let mut draft = EntryDraft::new(entry.kind, entry.amount, entry.reference)
            .available(entry.available_delta)
            .escrow(entry.escrow_delta)
            .compensating();
        if entry.kind == EntryKind::Deposit {
            draft = draft.tally(Tally::Deposited(entry.amount.minor));
        }
        let (available, escrow) =
            self.apply(&draft, self.wallet.available.minor, self.wallet.escrow.minor)?;
        self.set_balances(available, escrow);
        if let Some(tally) = draft.tally {
            self.apply_tally(tally);
        }
        self.journal
            .mark_posted(entry_id, status, available, escrow)
            .ok_or_else(|| SettlementError::Internal(format!("unknown ledger entry {entry_id}")))
    }

    /// Change an entry's status without touching balances.
    pub(crate) fn set_entry_status(
        &mut self,
        entry_id: &EntryId,
        status: EntryStatus,
    ) -> Result<LedgerEntry, SettlementError> {
        self.journal
            .set_status(entry_id, status)
            .ok_or_else(|| SettlementError::Internal(format!("unknown ledger entry {entry_id}")))
    }

    pub(crate) fn set_status(&mut self, status: WalletStatus) {
        self.wallet.status = status;
        self.wallet.updated_at = Utc::now();
    }

    /// Verify that the journal reproduces the current balances and that
    /// its digest chain is intact.
    pub fn audit(&self) -> Result<(), SettlementError> {
        let mismatch = |sequence| SettlementError::LedgerMismatch {
            wallet: self.wallet.id,
            sequence,
        };
        if !self.journal.verify_chain() {
            return Err(mismatch(0));
        }
        let (available, escrow) = self.journal.replay().map_err(mismatch)?;
        if available != self.wallet.available.minor || escrow != self.wallet.escrow.minor {
            return Err(mismatch(self.journal.len() as u64));
        }
        Ok(())
    }

    fn set_balances(&mut self, available: u64, escrow: u64) {
        self.wallet.available.minor = available;
        self.wallet.escrow.minor = escrow;
        self.wallet.updated_at = Utc::now();
    }

    fn apply_tally(&mut self, tally: Tally) {
        let w = &mut self.wallet;
        match tally {
            Tally::Deposited(v) => w.total_deposited.minor = w.total_deposited.minor.saturating_add(v),
            Tally::Withdrawn(v) => w.total_withdrawn.minor = w.total_withdrawn.minor.saturating_add(v),
            Tally::WithdrawalReversed(v) => {
                w.total_withdrawn.minor = w.total_withdrawn.minor.saturating_sub(v)
            }
            Tally::Earned(v) => w.total_earned.minor = w.total_earned.minor.saturating_add(v),
        }
    }
}

/// A shareable reference to one wallet's critical section.
#[derive(Clone)]
pub(crate) struct WalletHandle {
    pub id: WalletId,
    cell: Arc<Mutex<WalletBook>>,
}

impl WalletHandle {
    pub fn lock(&self) -> Result<MutexGuard<'_, WalletBook>, SettlementError> {
        self.cell.lock().map_err(|_| SettlementError::poisoned("wallet"))
    }
}

/// Lock two distinct wallets in ascending id order, returning the guards
/// in argument order.
pub(crate) fn lock_pair<'a>(
    first: &'a WalletHandle,
    second: &'a WalletHandle,
) -> Result<(MutexGuard<'a, WalletBook>, MutexGuard<'a, WalletBook>), SettlementError> {
    if first.id == second.id {
        return Err(SettlementError::Internal(format!(
            "wallet {} locked twice",
            first.id
        )));
    }
    if first.id < second.id {
        let a = first.lock()?;
        let b = second.lock()?;
        Ok((a, b))
    } else {
        let b = second.lock()?;
        let a = first.lock()?;
        Ok((a, b))
    }
}

/// All wallets, indexed by id and by owner.
#[derive(Default)]
pub(crate) struct WalletRegistry {
    by_id: DashMap<WalletId, WalletHandle>,
    by_owner: DashMap<(AccountId, Currency), WalletHandle>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the wallet for `(account, currency)`, creating it if absent.
    pub fn get_or_create(&self, account: AccountId, currency: Currency) -> WalletHandle {
        self.by_owner
            .entry((account, currency))
            .or_insert_with(|| {
                let book = WalletBook::new(account, currency);
                let handle = WalletHandle {
                    id: book.wallet.id,
                    cell: Arc::new(Mutex::new(book)),
                };
                self.by_id.insert(handle.id, handle.clone());
                tracing::info!(wallet_id = %handle.id, %account, %currency, "wallet created");
                handle
            })
            .clone()
    }

    pub fn find(&self, account: &AccountId, currency: Currency) -> Option<WalletHandle> {
        self.by_owner.get(&(*account, currency)).map(|h| h.clone())
    }

    pub fn handle(&self, id: &WalletId) -> Result<WalletHandle, SettlementError> {
        self.by_id
            .get(id)
            .map(|h| h.clone())
            .ok_or(SettlementError::WalletNotFound(*id))
    }

    pub fn snapshot(&self, id: &WalletId) -> Result<Wallet, SettlementError> {
        Ok(self.handle(id)?.lock()?.wallet.clone())
    }

    /// Snapshots of every wallet owned by `account`.
    pub fn owned_by(&self, account: &AccountId) -> Result<Vec<Wallet>, SettlementError> {
        let handles: Vec<WalletHandle> = self
            .by_owner
            .iter()
            .filter(|e| e.key().0 == *account)
            .map(|e| e.value().clone())
            .collect();
        let mut wallets = handles
            .iter()
            .map(|h| Ok(h.lock()?.wallet.clone()))
            .collect::<Result<Vec<_>, SettlementError>>()?;
        wallets.sort_by_key(|w| w.currency.code());
        Ok(wallets)
    }

    pub fn handles(&self) -> Vec<WalletHandle> {
        self.by_id.iter().map(|h| h.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EntryReference;
    use haulage_core::HoldId;

    fn ghs(minor: u64) -> Money {
        Money::new(minor, Currency::GHS)
    }

    fn funded_book(minor: u64) -> WalletBook {
        let mut book = WalletBook::new(AccountId::new(), Currency::GHS);
        let deposit = EntryDraft::new(EntryKind::Deposit, ghs(minor), EntryReference::Manual)
            .available(minor as i64)
            .tally(Tally::Deposited(minor));
        book.post(&deposit).unwrap();
        book
    }

    #[test]
    fn test_post_moves_funds_and_records_snapshot() {
        let mut book = funded_book(100_000);
        let hold = EntryDraft::new(
            EntryKind::EscrowHold,
            ghs(40_000),
            EntryReference::Hold(HoldId::new()),
        )
        .available(-40_000)
        .escrow(40_000);
        let entry = book.post(&hold).unwrap();

        assert_eq!(entry.available_after, 60_000);
        assert_eq!(entry.escrow_after, 40_000);
        assert_eq!(book.wallet().available, ghs(60_000));
        assert_eq!(book.wallet().escrow, ghs(40_000));
        assert_eq!(book.wallet().total_deposited, ghs(100_000));
        book.audit().unwrap();
    }

    #[test]
    fn test_insufficient_funds_reports_shortfall() {
        let mut book = funded_book(10_000);
        let draft = EntryDraft::new(EntryKind::Withdrawal, ghs(15_000), EntryReference::Manual)
            .available(-15_000);
        match book.post(&draft) {
            Err(SettlementError::InsufficientFunds {
                available,
                required,
                shortfall,
            }) => {
                assert_eq!(available, ghs(10_000));
                assert_eq!(required, ghs(15_000));
                assert_eq!(shortfall, ghs(5_000));
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        // Nothing committed.
        assert_eq!(book.journal().len(), 1);
        assert_eq!(book.wallet().available, ghs(10_000));
    }

    #[test]
    fn test_frozen_wallet_rejects_all_but_compensating_entries() {
        let mut book = funded_book(10_000);
        book.set_status(WalletStatus::Frozen);

        let debit = EntryDraft::new(EntryKind::Withdrawal, ghs(1_000), EntryReference::Manual)
            .available(-1_000);
        assert!(matches!(
            book.post(&debit),
            Err(SettlementError::WalletUnavailable {
                status: WalletStatus::Frozen,
                ..
            })
        ));

        let credit_back = EntryDraft::new(EntryKind::Adjustment, ghs(1_000), EntryReference::Manual)
            .available(1_000)
            .compensating();
        assert!(book.post(&credit_back).is_ok());
    }

    #[test]
    fn test_post_all_is_all_or_nothing() {
        let mut book = funded_book(10_000);
        let drafts = [
            EntryDraft::new(EntryKind::Withdrawal, ghs(6_000), EntryReference::Manual)
                .available(-6_000),
            EntryDraft::new(EntryKind::Withdrawal, ghs(6_000), EntryReference::Manual)
                .available(-6_000),
        ];
        assert!(book.post_all(&drafts).is_err());
        assert_eq!(book.wallet().available, ghs(10_000));
        assert_eq!(book.journal().len(), 1);
    }

    #[test]
    fn test_pending_entry_posts_later() {
        let mut book = WalletBook::new(AccountId::new(), Currency::GHS);
        let pending = EntryDraft::new(EntryKind::Deposit, ghs(2_500), EntryReference::Manual)
            .available(2_500)
            .status(EntryStatus::Pending);
        let entry = book.record_unposted(&pending).unwrap();
        assert_eq!(book.wallet().available, ghs(0));
        assert!(!entry.is_posted());

        let posted = book.post_recorded(&entry.id, EntryStatus::Completed).unwrap();
        assert_eq!(posted.available_after, 2_500);
        assert_eq!(book.wallet().total_deposited, ghs(2_500));
        assert!(book.post_recorded(&entry.id, EntryStatus::Completed).is_err());
        book.audit().unwrap();
    }

    #[test]
    fn test_currency_mismatch_rejected() {
        let mut book = funded_book(10_000);
        let draft = EntryDraft::new(
            EntryKind::Deposit,
            Money::new(100, Currency::NGN),
            EntryReference::Manual,
        )
        .available(100);
        assert!(matches!(
            book.post(&draft),
            Err(SettlementError::Core(CoreError::CurrencyMismatch { .. }))
        ));
    }

    #[test]
    fn test_registry_get_or_create_is_idempotent() {
        let registry = WalletRegistry::new();
        let account = AccountId::new();
        let a = registry.get_or_create(account, Currency::GHS);
        let b = registry.get_or_create(account, Currency::GHS);
        let c = registry.get_or_create(account, Currency::KES);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.owned_by(&account).unwrap().len(), 2);
        assert!(registry.find(&account, Currency::USD).is_none());
    }

    #[test]
    fn test_lock_pair_orders_and_rejects_same_wallet() {
        let registry = WalletRegistry::new();
        let a = registry.get_or_create(AccountId::new(), Currency::GHS);
        let b = registry.get_or_create(AccountId::new(), Currency::GHS);
        {
            let (ga, gb) = lock_pair(&b, &a).unwrap();
            assert_eq!(ga.wallet().id, b.id);
            assert_eq!(gb.wallet().id, a.id);
        }
        assert!(lock_pair(&a, &a).is_err());
    }
}
