use dashmap::DashMap;
use haulage_core::{AccountId, Currency, EngineConfig, Money, PayoutId, WalletId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::Caller;
use crate::dispute::DisputeBook;
use crate::error::SettlementError;
use crate::escrow::HoldBook;
use crate::gateway::GatewayRegistry;
use crate::ledger::{EntrySink, HistoryQuery, LedgerEntry, Page};
use crate::payments::PaymentBook;
use crate::payout::{PayoutBook, PayoutRecord};
use crate::trips::TripDirectory;
use crate::wallet::{Wallet, WalletRegistry, WalletStatus};

/// Cumulative platform revenue in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRevenue {
    pub currency: Currency,
    /// Commission and split remainders retained from escrow holds.
    pub commission: Money,
    /// Fees on withdrawals that completed.
    pub withdrawal_fees: Money,
}

#[derive(Default)]
pub(crate) struct PlatformAccount {
    commission: DashMap<Currency, u64>,
    fees: DashMap<Currency, u64>,
}

impl PlatformAccount {
    pub fn add_commission(&self, amount: Money) {
        if !amount.is_zero() {
            *self.commission.entry(amount.currency).or_default() += amount.minor;
        }
    }

    pub fn add_fees(&self, amount: Money) {
        if !amount.is_zero() {
            *self.fees.entry(amount.currency).or_default() += amount.minor;
        }
    }

    pub fn revenue(&self, currency: Currency) -> PlatformRevenue {
        let read = |map: &DashMap<Currency, u64>| map.get(&currency).map(|v| *v).unwrap_or(0);
        PlatformRevenue {
            currency,
            commission: Money::new(read(&self.commission), currency),
            withdrawal_fees: Money::new(read(&self.fees), currency),
        }
    }
}

/// The settlement engine.
///
/// Construct once per process and share behind an `Arc`. Every operation
/// takes the caller identity the edge authenticated; role and ownership
/// checks happen here.
pub struct SettlementEngine {
    pub(crate) config: EngineConfig,
    pub(crate) wallets: WalletRegistry,
    pub(crate) holds: HoldBook,
    pub(crate) payouts: PayoutBook,
    pub(crate) disputes: DisputeBook,
    pub(crate) payments: PaymentBook,
    pub(crate) platform: PlatformAccount,
    pub(crate) trips: Arc<dyn TripDirectory>,
    pub(crate) gateways: GatewayRegistry,
    sink: Option<Arc<dyn EntrySink>>,
}

impl SettlementEngine {
    pub fn new(
        config: EngineConfig,
        trips: Arc<dyn TripDirectory>,
        gateways: GatewayRegistry,
    ) -> Self {
        tracing::info!(
            commission_rate = %config.commission_rate,
            providers = ?gateways.providers(),
            "settlement engine ready"
        );
        Self {
            config,
            wallets: WalletRegistry::new(),
            holds: HoldBook::new(),
            payouts: PayoutBook::new(),
            disputes: DisputeBook::new(),
            payments: PaymentBook::new(),
            platform: PlatformAccount::default(),
            trips,
            gateways,
            sink: None,
        }
    }

    /// Forward every appended or updated ledger entry to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EntrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn emit(&self, entries: &[LedgerEntry]) {
        if let Some(sink) = &self.sink {
            for entry in entries {
                sink.record(entry);
            }
        }
    }

    pub fn get_or_create_wallet(
        &self,
        caller: &Caller,
        account: AccountId,
        currency: Currency,
    ) -> Result<Wallet, SettlementError> {
        caller.require_party_or_admin(&[account], "open a wallet")?;
        let handle = self.wallets.get_or_create(account, currency);
        let wallet = handle.lock()?.wallet().clone();
        Ok(wallet)
    }

    /// Every wallet the account owns, locked funds included.
    pub fn wallet_summary(
        &self,
        caller: &Caller,
        account: AccountId,
    ) -> Result<Vec<Wallet>, SettlementError> {
        caller.require_party_or_admin(&[account], "view wallets")?;
        self.wallets.owned_by(&account)
    }

    pub fn get_wallet(&self, caller: &Caller, wallet_id: WalletId) -> Result<Wallet, SettlementError> {
        let wallet = self.wallets.snapshot(&wallet_id)?;
        caller.require_party_or_admin(&[wallet.account], "view this wallet")?;
        Ok(wallet)
    }

    pub fn transaction_history(
        &self,
        caller: &Caller,
        wallet_id: WalletId,
        query: &HistoryQuery,
    ) -> Result<Page<LedgerEntry>, SettlementError> {
        let handle = self.wallets.handle(&wallet_id)?;
        let book = handle.lock()?;
        caller.require_party_or_admin(&[book.wallet().account], "view transaction history")?;
        Ok(book.journal().query(query))
    }

    /// Freeze, unfreeze or close a wallet. Administrators only.
    ///
    /// Closing is permanent and needs both balances at zero.
    pub fn set_wallet_status(
        &self,
        caller: &Caller,
        wallet_id: WalletId,
        status: WalletStatus,
    ) -> Result<Wallet, SettlementError> {
        caller.require_admin("change wallet status")?;
        let handle = self.wallets.handle(&wallet_id)?;
        let mut book = handle.lock()?;
        let wallet = book.wallet();
        if wallet.status == WalletStatus::Closed {
            return Err(SettlementError::WalletUnavailable {
                wallet: wallet_id,
                status: WalletStatus::Closed,
            });
        }
        if status == WalletStatus::Closed && !wallet.total().is_zero() {
            return Err(SettlementError::Validation(format!(
                "wallet {wallet_id} still holds {} available and {} in escrow",
                wallet.available, wallet.escrow
            )));
        }
        let previous = wallet.status;
        book.set_status(status);
        tracing::info!(wallet_id = %wallet_id, from = %previous, to = %status, "wallet status changed");
        Ok(book.wallet().clone())
    }

    /// Replay the wallet's journal and check it against the live balances.
    pub fn audit_wallet(&self, caller: &Caller, wallet_id: WalletId) -> Result<(), SettlementError> {
        caller.require_admin("audit a wallet")?;
        self.wallets.handle(&wallet_id)?.lock()?.audit()
    }

    /// Audit every wallet; returns how many were checked.
    pub fn audit_all(&self) -> Result<usize, SettlementError> {
        let handles = self.wallets.handles();
        for handle in &handles {
            handle.lock()?.audit()?;
        }
        Ok(handles.len())
    }

    /// Snapshots of all wallets, for reconciliation.
    pub fn all_wallets(&self) -> Result<Vec<Wallet>, SettlementError> {
        self.wallets
            .handles()
            .iter()
            .map(|h| Ok(h.lock()?.wallet().clone()))
            .collect()
    }

    pub fn platform_revenue(&self, currency: Currency) -> PlatformRevenue {
        self.platform.revenue(currency)
    }

    /// Payouts received by `payee`, newest first.
    pub fn list_payouts(
        &self,
        caller: &Caller,
        payee: AccountId,
    ) -> Result<Vec<PayoutRecord>, SettlementError> {
        caller.require_party_or_admin(&[payee], "view payouts")?;
        Ok(self.payouts.for_payee(&payee))
    }

    pub fn get_payout(
        &self,
        caller: &Caller,
        payout_id: PayoutId,
    ) -> Result<PayoutRecord, SettlementError> {
        let payout = self
            .payouts
            .get(&payout_id)
            .ok_or(SettlementError::PayoutNotFound(payout_id))?;
        caller.require_party_or_admin(&[payout.payee], "view this payout")?;
        Ok(payout)
    }

    /// Counts of tracked records: wallets, holds, disputes, payments, payouts.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            wallets: self.wallets.len(),
            holds: self.holds.len(),
            disputes: self.disputes.len(),
            payments: self.payments.len(),
            payouts: self.payouts.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub wallets: usize,
    pub holds: usize,
    pub disputes: usize,
    pub payments: usize,
    pub payouts: usize,
}
