//! Haulage Settlement Engine
//!
//! Holds customer funds while a freight trip is in flight. Every balance
//! change goes through a per-wallet ledger; escrow holds are released,
//! refunded or split by dispute resolution; deposits and withdrawals are
//! reconciled against asynchronous mobile-money callbacks exactly once.

pub mod adapters;
pub mod auth;
pub mod dispute;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod gateway;
pub mod ledger;
pub mod payments;
pub mod payout;
pub mod trips;
pub mod wallet;

pub use auth::{Caller, Role};
pub use dispute::{Dispute, DisputeReason, OpenDispute, Resolution, ResolutionRecord};
pub use engine::{EngineStats, PlatformRevenue, SettlementEngine};
pub use error::SettlementError;
pub use escrow::{EscrowHold, HoldCreated, Refunded, Released};
pub use gateway::{
    CollectionRequest, DisbursementRequest, GatewayAck, GatewayError, GatewayRegistry,
    PaymentGateway, Provider, RemoteStatus,
};
pub use ledger::{
    EntryKind, EntryReference, EntrySink, EntryStatus, HistoryQuery, Journal, LedgerEntry, Page,
};
pub use payments::{
    normalize_msisdn, CallbackAck, CallbackStatus, DepositRequest, PaymentCallback,
    PaymentDirection, PaymentInitiated, PaymentRecord, PaymentStatus, SweepOutcome,
    WithdrawRequest,
};
pub use payout::{PayoutRecord, PayoutStatus};
pub use trips::{InMemoryTrips, TripDirectory, TripSnapshot, TripStatus};
pub use wallet::{Wallet, WalletBook, WalletStatus};
