//! Shared harness for cross-crate settlement scenarios.
//!
//! Wires a [`SettlementEngine`] to an in-memory trip directory and one
//! sandbox rail per provider, and tracks the money that entered and left
//! the system so tests can check conservation.

use haulage_core::{AccountId, Currency, EngineConfig, Money, PaymentId, TripId};
use haulage_settlement::adapters::SandboxGateway;
use haulage_settlement::{
    CallbackAck, CallbackStatus, Caller, DepositRequest, GatewayRegistry, InMemoryTrips,
    PaymentDirection, PaymentInitiated, PaymentStatus, Provider, SettlementEngine,
    SettlementError, SweepOutcome, TripSnapshot, TripStatus, WithdrawRequest,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub fn ghs(minor: u64) -> Money {
    Money::new(minor, Currency::GHS)
}

pub const PHONE: &str = "0241234567";

pub struct Harness {
    pub engine: Arc<SettlementEngine>,
    pub trips: Arc<InMemoryTrips>,
    pub rails: HashMap<Provider, Arc<SandboxGateway>>,
    pub admin: Caller,
    /// Minor units credited by successful deposits.
    deposited: AtomicU64,
    /// Minor units paid out by successful withdrawals.
    withdrawn: AtomicU64,
    /// Debits (amount plus fee) of withdrawals still waiting on the rail.
    in_flight: Mutex<HashMap<PaymentId, u64>>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let trips = Arc::new(InMemoryTrips::new());
        let mut registry = GatewayRegistry::new();
        let mut rails = HashMap::new();
        for provider in Provider::ALL {
            let rail = Arc::new(SandboxGateway::new(provider));
            registry.register(rail.clone());
            rails.insert(provider, rail);
        }
        let engine = Arc::new(SettlementEngine::new(config, trips.clone(), registry));
        Self {
            engine,
            trips,
            rails,
            admin: Caller::admin(AccountId::new()),
            deposited: AtomicU64::new(0),
            withdrawn: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn rail(&self, provider: Provider) -> &SandboxGateway {
        &self.rails[&provider]
    }

    /// Deposit through the MTN sandbox and confirm it.
    pub async fn fund(&self, caller: &Caller, minor: u64) -> PaymentInitiated {
        let initiated = self
            .engine
            .deposit(
                caller,
                DepositRequest {
                    account: caller.account,
                    amount: ghs(minor),
                    provider: Provider::Mtn,
                    payer_handle: PHONE.into(),
                },
            )
            .await
            .expect("deposit accepted");
        self.settle(Provider::Mtn, &initiated.external_key, CallbackStatus::Success);
        initiated
    }

    pub async fn withdraw(
        &self,
        caller: &Caller,
        minor: u64,
    ) -> Result<PaymentInitiated, SettlementError> {
        let initiated = self
            .engine
            .withdraw(
                caller,
                WithdrawRequest {
                    account: caller.account,
                    amount: ghs(minor),
                    provider: Provider::Mtn,
                    payee_handle: PHONE.into(),
                },
            )
            .await?;
        if !initiated.status.is_terminal() {
            self.in_flight.lock().unwrap().insert(
                initiated.payment_id,
                initiated.amount.minor + initiated.fee.minor,
            );
        }
        Ok(initiated)
    }

    /// Deliver the sandbox callback for `external_key` and account for the
    /// money that crossed the system boundary.
    pub fn settle(&self, provider: Provider, external_key: &str, status: CallbackStatus) -> CallbackAck {
        let callback = self
            .rail(provider)
            .settle(external_key, status)
            .expect("sandbox knows the key");
        let ack = self
            .engine
            .payment_callback(callback)
            .expect("callback applied");
        if let CallbackAck::Applied { payment_id, .. } = &ack {
            self.account_for(*payment_id, status == CallbackStatus::Success);
        }
        ack
    }

    /// Run the timeout sweep as of `now`.
    pub async fn sweep(&self, now: chrono::DateTime<chrono::Utc>) -> SweepOutcome {
        let outcome = self
            .engine
            .expire_stale_payments(now)
            .await
            .expect("sweep runs");
        for payment_id in &outcome.reconciled {
            let status = self
                .engine
                .get_payment(&self.admin, *payment_id)
                .expect("payment exists")
                .status;
            self.account_for(*payment_id, status == PaymentStatus::Success);
        }
        for payment_id in &outcome.expired {
            self.account_for(*payment_id, false);
        }
        outcome
    }

    fn account_for(&self, payment_id: PaymentId, succeeded: bool) {
        let record = self
            .engine
            .get_payment(&self.admin, payment_id)
            .expect("payment exists");
        if record.direction == PaymentDirection::Disbursement {
            self.in_flight.lock().unwrap().remove(&payment_id);
        }
        if succeeded {
            let counter = match record.direction {
                PaymentDirection::Collection => &self.deposited,
                PaymentDirection::Disbursement => &self.withdrawn,
            };
            counter.fetch_add(record.amount.minor, Ordering::SeqCst);
        }
    }

    /// Publish a trip whose accepted bid is `price`.
    pub fn trip(
        &self,
        shipper: AccountId,
        courier: AccountId,
        price: Money,
        status: TripStatus,
    ) -> TripId {
        let trip_id = TripId::new();
        self.trips.upsert(TripSnapshot {
            trip_id,
            shipper,
            courier,
            agreed_price: price,
            status,
        });
        trip_id
    }

    pub fn set_trip(&self, trip_id: TripId, status: TripStatus) {
        assert!(self.trips.set_status(&trip_id, status), "unknown trip");
    }

    /// `(available, escrow)` in minor units of the account's GHS wallet.
    pub fn balances(&self, account: AccountId) -> (u64, u64) {
        let wallets = self
            .engine
            .wallet_summary(&self.admin, account)
            .expect("wallet summary");
        wallets
            .iter()
            .find(|w| w.currency == Currency::GHS)
            .map(|w| (w.available.minor, w.escrow.minor))
            .unwrap_or((0, 0))
    }

    /// Sum of available and escrow balances over every wallet.
    pub fn money_in_wallets(&self) -> u64 {
        self.engine
            .all_wallets()
            .expect("wallets")
            .iter()
            .map(|w| w.available.minor + w.escrow.minor)
            .sum()
    }

    /// Commission plus withdrawal fees retained by the platform.
    pub fn platform_revenue(&self) -> u64 {
        let revenue = self.engine.platform_revenue(Currency::GHS);
        revenue.commission.minor + revenue.withdrawal_fees.minor
    }

    /// Money debited for withdrawals the rail has not settled yet.
    pub fn in_flight_withdrawals(&self) -> u64 {
        self.in_flight.lock().unwrap().values().sum()
    }

    pub fn deposited(&self) -> u64 {
        self.deposited.load(Ordering::SeqCst)
    }

    /// Every minor unit that came in is in a wallet, retained by the
    /// platform, paid out, or on its way out.
    pub fn assert_conserved(&self) {
        let inside = self.money_in_wallets()
            + self.platform_revenue()
            + self.withdrawn.load(Ordering::SeqCst)
            + self.in_flight_withdrawals();
        assert_eq!(
            inside,
            self.deposited(),
            "money was created or destroyed"
        );
        self.engine.audit_all().expect("every wallet replays cleanly");
    }
}
