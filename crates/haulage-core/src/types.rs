use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new time-ordered identifier (UUID v7).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// A customer account (shipper, courier, or administrator).
    AccountId
);
define_id!(
    /// A wallet: one per (account, currency).
    WalletId
);
define_id!(
    /// An escrow hold bound to exactly one trip.
    HoldId
);
define_id!(
    /// A freight trip, owned by the trip lifecycle service.
    TripId
);
define_id!(
    /// An immutable ledger entry.
    EntryId
);
define_id!(DisputeId);
define_id!(PayoutId);
define_id!(
    /// An external mobile-money payment attempt.
    PaymentId
);

/// Currencies the settlement engine can hold balances in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Ghana cedi.
    GHS,
    /// Nigerian naira.
    NGN,
    /// Kenyan shilling.
    KES,
    /// West African CFA franc.
    XOF,
    /// US dollar.
    USD,
}

impl Currency {
    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GHS => "GHS",
            Self::NGN => "NGN",
            Self::KES => "KES",
            Self::XOF => "XOF",
            Self::USD => "USD",
        }
    }

    /// Number of digits in the minor unit.
    pub fn decimals(&self) -> u32 {
        match self {
            Self::XOF => 0,
            _ => 2,
        }
    }

    /// Parse from an ISO 4217 code (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "GHS" => Some(Self::GHS),
            "NGN" => Some(Self::NGN),
            "KES" => Some(Self::KES),
            "XOF" => Some(Self::XOF),
            "USD" => Some(Self::USD),
            _ => None,
        }
    }

    fn scale(&self) -> u64 {
        10u64.pow(self.decimals())
    }

    /// Convert hundredths of a major unit into this currency's minor unit,
    /// rounding half-up. `50` is 50 pesewas in GHS and 1 franc in XOF.
    pub fn from_cents(&self, cents: u64) -> u64 {
        match self.decimals() {
            2 => cents,
            d if d > 2 => cents.saturating_mul(10u64.pow(d - 2)),
            d => {
                let div = 10u64.pow(2 - d);
                cents.saturating_add(div / 2) / div
            }
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::GHS
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| CoreError::UnknownCurrency(s.to_string()))
    }
}

/// A non-negative amount of money in the smallest unit of its currency
/// (pesewas, kobo, cents, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Value in minor units.
    pub minor: u64,
    pub currency: Currency,
}

impl Money {
    pub fn new(minor: u64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    /// Parse a decimal string such as `"505.00"` or `"12.5"`.
    ///
    /// More fractional digits than the currency's minor unit is rejected
    /// rather than rounded.
    pub fn parse(input: &str, currency: Currency) -> Result<Self, CoreError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CoreError::InvalidAmount("empty amount".into()));
        }
        let (whole, frac) = match input.split_once('.') {
            Some((w, f)) => (w, f),
            None => (input, ""),
        };
        let decimals = currency.decimals() as usize;
        if frac.len() > decimals {
            return Err(CoreError::InvalidAmount(format!(
                "{input} has more than {decimals} decimal places for {currency}"
            )));
        }
        let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if whole.is_empty() || !digits_ok(whole) || !digits_ok(frac) {
            return Err(CoreError::InvalidAmount(format!("not a decimal amount: {input}")));
        }

        let whole: u64 = whole
            .parse()
            .map_err(|_| CoreError::InvalidAmount(format!("amount too large: {input}")))?;
        let mut frac_minor: u64 = 0;
        if !frac.is_empty() {
            let padded = format!("{frac:0<decimals$}");
            frac_minor = padded
                .parse()
                .map_err(|_| CoreError::InvalidAmount(format!("not a decimal amount: {input}")))?;
        }

        let minor = whole
            .checked_mul(currency.scale())
            .and_then(|v| v.checked_add(frac_minor))
            .ok_or(CoreError::Overflow)?;
        Ok(Self { minor, currency })
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), CoreError> {
        if self.currency != other.currency {
            return Err(CoreError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: Money) -> Result<Money, CoreError> {
        self.ensure_same_currency(&other)?;
        let minor = self.minor.checked_add(other.minor).ok_or(CoreError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    /// Subtract, failing if the result would be negative.
    pub fn checked_sub(&self, other: Money) -> Result<Money, CoreError> {
        self.ensure_same_currency(&other)?;
        let minor = self.minor.checked_sub(other.minor).ok_or_else(|| {
            CoreError::InvalidAmount(format!("{other} exceeds {self}"))
        })?;
        Ok(Money::new(minor, self.currency))
    }

    /// The amount as a signed delta in minor units.
    pub fn as_delta(&self) -> i64 {
        i64::try_from(self.minor).unwrap_or(i64::MAX)
    }

    /// Render the amount without the currency code, e.g. `505.00`.
    pub fn format_amount(&self) -> String {
        let decimals = self.currency.decimals() as usize;
        if decimals == 0 {
            return self.minor.to_string();
        }
        let scale = self.currency.scale();
        format!("{}.{:0decimals$}", self.minor / scale, self.minor % scale)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.format_amount())
    }
}

/// A rate in basis points (1 bps = 0.01%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bps(pub u32);

impl Bps {
    pub const MAX: Bps = Bps(10_000);

    /// Apply the rate to an amount in minor units, rounding half-up.
    pub fn apply(&self, minor: u64) -> u64 {
        let scaled = minor as u128 * self.0 as u128 + 5_000;
        (scaled / 10_000) as u64
    }

    pub fn is_valid(&self) -> bool {
        *self <= Self::MAX
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 100 == 0 {
            write!(f, "{}%", self.0 / 100)
        } else {
            write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
        }
    }
}
