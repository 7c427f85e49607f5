//! Boundary to the trip lifecycle service.

use dashmap::DashMap;
use haulage_core::{AccountId, Money, TripId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trip statuses the settlement engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Bid accepted, waiting for pickup. Escrow is created here.
    PickupPending,
    InTransit,
    Delivered,
    /// Shipper confirmed delivery. Escrow may be released.
    Confirmed,
    Disputed,
    Cancelled,
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PickupPending => "pickup_pending",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Confirmed => "confirmed",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub trip_id: TripId,
    /// Pays for the trip (payer of the escrow hold).
    pub shipper: AccountId,
    /// Carries the freight (payee of the escrow hold).
    pub courier: AccountId,
    /// Price of the accepted bid; the amount escrowed for the trip.
    pub agreed_price: Money,
    pub status: TripStatus,
}

/// Read access to trip state, plus the one write the engine performs on it.
pub trait TripDirectory: Send + Sync {
    fn trip(&self, trip_id: &TripId) -> Option<TripSnapshot>;

    /// Move the trip into its disputed state when a dispute opens.
    fn mark_disputed(&self, trip_id: &TripId);
}

/// Trip directory fed by trip lifecycle signals.
#[derive(Default)]
pub struct InMemoryTrips {
    trips: DashMap<TripId, TripSnapshot>,
}

impl InMemoryTrips {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, snapshot: TripSnapshot) {
        tracing::debug!(trip_id = %snapshot.trip_id, status = %snapshot.status, "trip signal");
        self.trips.insert(snapshot.trip_id, snapshot);
    }

    /// Returns `false` if the trip is unknown.
    pub fn set_status(&self, trip_id: &TripId, status: TripStatus) -> bool {
        match self.trips.get_mut(trip_id) {
            Some(mut trip) => {
                trip.status = status;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }
}

impl TripDirectory for InMemoryTrips {
    fn trip(&self, trip_id: &TripId) -> Option<TripSnapshot> {
        self.trips.get(trip_id).map(|t| t.clone())
    }

    fn mark_disputed(&self, trip_id: &TripId) {
        self.set_status(trip_id, TripStatus::Disputed);
    }
}
