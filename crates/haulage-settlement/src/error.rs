use haulage_core::{
    CoreError, DisputeId, DisputeStatus, HoldId, HoldState, Money, PayoutId, TripId, WalletId,
};

use crate::gateway::{GatewayError, Provider};
use crate::trips::TripStatus;
use crate::wallet::WalletStatus;

/// Settlement-engine errors.
///
/// Precondition failures carry enough context (current state, required
/// state, exact amounts) for the caller to render a precise message.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("wallet {wallet} is {status}")]
    WalletUnavailable {
        wallet: WalletId,
        status: WalletStatus,
    },

    #[error("insufficient funds: available {available}, required {required}, short by {shortfall}")]
    InsufficientFunds {
        available: Money,
        required: Money,
        shortfall: Money,
    },

    #[error("trip {trip} already has an escrow hold")]
    DuplicateHold { trip: TripId },

    #[error("escrow hold {hold} is {current}, must be {required}")]
    InvalidHoldState {
        hold: HoldId,
        current: HoldState,
        required: String,
    },

    #[error("dispute {dispute} is {current}, must be {required}")]
    InvalidDisputeState {
        dispute: DisputeId,
        current: DisputeStatus,
        required: String,
    },

    #[error("split of {requested} exceeds the held amount {hold_amount}")]
    SplitExceedsHold { requested: Money, hold_amount: Money },

    #[error("not authorized to {action}")]
    Unauthorized { action: String },

    #[error("no external payment with key {0}")]
    ExternalPaymentNotFound(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("escrow hold not found: {0}")]
    HoldNotFound(HoldId),

    #[error("trip not found: {0}")]
    TripNotFound(TripId),

    #[error("trip {0} has no escrow hold")]
    NoHoldForTrip(TripId),

    #[error("dispute not found: {0}")]
    DisputeNotFound(DisputeId),

    #[error("payout not found: {0}")]
    PayoutNotFound(PayoutId),

    #[error("trip {trip} is {current}, must be {required}")]
    TripNotEligible {
        trip: TripId,
        current: TripStatus,
        required: String,
    },

    #[error("trip {trip} already has an active dispute {dispute}")]
    ActiveDisputeExists { trip: TripId, dispute: DisputeId },

    #[error("amount {amount} outside the allowed range {min} to {max}")]
    AmountOutOfRange { amount: Money, min: Money, max: Money },

    #[error("invalid mobile money handle: {0}")]
    InvalidHandle(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no payment gateway registered for provider {0}")]
    GatewayNotRegistered(Provider),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("ledger replay diverges from wallet {wallet} at sequence {sequence}")]
    LedgerMismatch { wallet: WalletId, sequence: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    pub(crate) fn unauthorized(action: impl Into<String>) -> Self {
        Self::Unauthorized {
            action: action.into(),
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{what} lock poisoned"))
    }
}
