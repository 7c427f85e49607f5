pub mod config;
pub mod error;
pub mod state_machine;
pub mod types;

pub use config::{EngineConfig, FeePolicy};
pub use error::CoreError;
pub use state_machine::{
    DisputeEvent, DisputeStateMachine, DisputeStatus, HoldEvent, HoldState, HoldStateMachine,
};
pub use types::{
    AccountId, Bps, Currency, DisputeId, EntryId, HoldId, Money, PaymentId, PayoutId, TripId,
    WalletId,
};
