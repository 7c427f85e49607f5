use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// States of an escrow hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    /// Funds are locked in the payer's escrow balance.
    Held,
    /// Funds were paid out to the payee (minus commission). Final.
    Released,
    /// Funds were returned to the payer. Final.
    Refunded,
    /// A dispute froze the hold pending admin resolution.
    Disputed,
    /// A dispute split the funds between payer, payee and platform. Final.
    PartiallyReleased,
}

impl HoldState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Released | Self::Refunded | Self::PartiallyReleased
        )
    }

    /// Whether the hold's amount still sits in the payer's escrow balance.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Held | Self::Disputed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Released => "released",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
            Self::PartiallyReleased => "partially_released",
        }
    }
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that move an escrow hold between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldEvent {
    /// Pay the payee: normal release, or a dispute resolved for the payee.
    Release,
    /// Return everything to the payer.
    Refund,
    /// A dispute was opened on the trip.
    Dispute,
    /// A dispute was resolved with an explicit split.
    Split,
}

impl fmt::Display for HoldEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release => f.write_str("release"),
            Self::Refund => f.write_str("refund"),
            Self::Dispute => f.write_str("dispute"),
            Self::Split => f.write_str("split"),
        }
    }
}

/// Escrow hold transitions.
///
/// Valid transitions:
/// - Held → Released (Release)
/// - Held → Refunded (Refund)
/// - Held → Disputed (Dispute)
/// - Disputed → Released (Release)
/// - Disputed → Refunded (Refund)
/// - Disputed → PartiallyReleased (Split)
pub struct HoldStateMachine;

impl HoldStateMachine {
    pub fn transition(current: HoldState, event: HoldEvent) -> Result<HoldState, CoreError> {
        let next = match (current, event) {
            (HoldState::Held, HoldEvent::Release) => HoldState::Released,
            (HoldState::Held, HoldEvent::Refund) => HoldState::Refunded,
            (HoldState::Held, HoldEvent::Dispute) => HoldState::Disputed,

            (HoldState::Disputed, HoldEvent::Release) => HoldState::Released,
            (HoldState::Disputed, HoldEvent::Refund) => HoldState::Refunded,
            (HoldState::Disputed, HoldEvent::Split) => HoldState::PartiallyReleased,

            _ => {
                return Err(CoreError::InvalidHoldTransition {
                    from: current,
                    event,
                })
            }
        };
        tracing::trace!(from = %current, to = %next, %event, "hold transition");
        Ok(next)
    }

    /// Source states from which `event` is accepted.
    pub fn sources(event: HoldEvent) -> &'static [HoldState] {
        match event {
            HoldEvent::Release | HoldEvent::Refund => &[HoldState::Held, HoldState::Disputed],
            HoldEvent::Dispute => &[HoldState::Held],
            HoldEvent::Split => &[HoldState::Disputed],
        }
    }
}

/// Lifecycle of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    /// Raised for senior review.
    Escalated,
    /// Resolved with a full refund to the payer.
    ResolvedPayer,
    /// Resolved with a normal release to the payee.
    ResolvedPayee,
    /// Resolved with an explicit split.
    ResolvedSplit,
}

impl DisputeStatus {
    /// Open, under review or escalated: blocks a second dispute on the trip.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::UnderReview | Self::Escalated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::UnderReview => "under_review",
            Self::Escalated => "escalated",
            Self::ResolvedPayer => "resolved_payer",
            Self::ResolvedPayee => "resolved_payee",
            Self::ResolvedSplit => "resolved_split",
        }
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeEvent {
    BeginReview,
    Escalate,
    ResolveForPayer,
    ResolveForPayee,
    ResolveSplit,
}

impl fmt::Display for DisputeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginReview => f.write_str("begin_review"),
            Self::Escalate => f.write_str("escalate"),
            Self::ResolveForPayer => f.write_str("resolve_for_payer"),
            Self::ResolveForPayee => f.write_str("resolve_for_payee"),
            Self::ResolveSplit => f.write_str("resolve_split"),
        }
    }
}

/// Dispute transitions.
///
/// Valid transitions:
/// - Open → UnderReview (BeginReview)
/// - Open | UnderReview → Escalated (Escalate)
/// - Open | UnderReview | Escalated → ResolvedPayer | ResolvedPayee | ResolvedSplit
pub struct DisputeStateMachine;

impl DisputeStateMachine {
    pub fn transition(
        current: DisputeStatus,
        event: DisputeEvent,
    ) -> Result<DisputeStatus, CoreError> {
        use DisputeStatus::*;

        let next = match (current, event) {
            (Open, DisputeEvent::BeginReview) => UnderReview,
            (Open | UnderReview, DisputeEvent::Escalate) => Escalated,
            (s, DisputeEvent::ResolveForPayer) if s.is_active() => ResolvedPayer,
            (s, DisputeEvent::ResolveForPayee) if s.is_active() => ResolvedPayee,
            (s, DisputeEvent::ResolveSplit) if s.is_active() => ResolvedSplit,
            _ => {
                return Err(CoreError::InvalidDisputeTransition {
                    from: current,
                    event,
                })
            }
        };
        Ok(next)
    }
}
