use crate::state_machine::{DisputeEvent, DisputeStatus, HoldEvent, HoldState};
use crate::types::Currency;

/// Core domain errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid hold transition: cannot apply {event} to a hold in state {from}")]
    InvalidHoldTransition { from: HoldState, event: HoldEvent },

    #[error("invalid dispute transition: cannot apply {event} to a dispute in status {from}")]
    InvalidDisputeTransition {
        from: DisputeStatus,
        event: DisputeEvent,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("arithmetic overflow")]
    Overflow,
}
