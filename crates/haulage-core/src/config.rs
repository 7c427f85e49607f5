use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{Bps, Currency, Money};

/// Withdrawal fee: a percentage of the amount, clamped to `[min, max]`.
///
/// The clamps are hundredths of a major unit and scale with the currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeePolicy {
    pub rate: Bps,
    pub min_cents: u64,
    pub max_cents: u64,
}

impl FeePolicy {
    pub fn fee_for(&self, amount: Money) -> Money {
        let currency = amount.currency;
        let min = currency.from_cents(self.min_cents);
        let max = currency.from_cents(self.max_cents).max(min);
        Money::new(self.rate.apply(amount.minor).clamp(min, max), currency)
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            rate: Bps(100),
            min_cents: 50,
            max_cents: 1_000,
        }
    }
}

/// Tunables for the settlement engine.
///
/// Monetary limits are hundredths of a major unit (1.00 = 100) and are
/// scaled to each currency's minor unit when applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Platform commission captured on every new escrow hold.
    pub commission_rate: Bps,
    pub withdrawal_fee: FeePolicy,
    pub min_deposit_cents: u64,
    pub min_withdrawal_cents: u64,
    pub max_transaction_cents: u64,
    /// Seconds a payment may stay pending before the sweeper acts on it.
    pub payment_timeout_secs: u64,
    pub default_currency: Currency,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commission_rate: Bps(500),
            withdrawal_fee: FeePolicy::default(),
            min_deposit_cents: 100,
            min_withdrawal_cents: 500,
            max_transaction_cents: 5_000_000,
            payment_timeout_secs: 15 * 60,
            default_currency: Currency::GHS,
        }
    }
}

impl EngineConfig {
    pub fn payment_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_timeout_secs as i64)
    }

    pub fn min_deposit(&self, currency: Currency) -> Money {
        Money::new(currency.from_cents(self.min_deposit_cents), currency)
    }

    pub fn min_withdrawal(&self, currency: Currency) -> Money {
        Money::new(currency.from_cents(self.min_withdrawal_cents), currency)
    }

    pub fn max_transaction(&self, currency: Currency) -> Money {
        Money::new(currency.from_cents(self.max_transaction_cents), currency)
    }

    /// Reject settings that would make settlement fail later.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.commission_rate.is_valid() {
            return Err(CoreError::InvalidConfig(format!(
                "commission_rate {} exceeds 100%",
                self.commission_rate.0
            )));
        }
        if !self.withdrawal_fee.rate.is_valid() {
            return Err(CoreError::InvalidConfig(format!(
                "withdrawal_fee.rate {} exceeds 100%",
                self.withdrawal_fee.rate.0
            )));
        }
        if self.withdrawal_fee.min_cents > self.withdrawal_fee.max_cents {
            return Err(CoreError::InvalidConfig(
                "withdrawal_fee.min_cents is above max_cents".into(),
            ));
        }
        let max = self.max_transaction_cents;
        if self.min_deposit_cents > max || self.min_withdrawal_cents > max {
            return Err(CoreError::InvalidConfig(
                "minimum deposit and withdrawal must not exceed max_transaction_cents".into(),
            ));
        }
        if self.payment_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "payment_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
