//! Integration test: escrow holds from bid acceptance to settlement.
//!
//! Drives deposits through the sandbox rail, then holds, releases and
//! refunds, checking that money is conserved at every step.

use std::sync::Arc;

use haulage_core::{AccountId, HoldState};
use haulage_integration_tests::{ghs, Harness};
use haulage_settlement::{Caller, PayoutStatus, SettlementError, TripStatus};

fn parties() -> (Caller, Caller) {
    (
        Caller::shipper(AccountId::new()),
        Caller::courier(AccountId::new()),
    )
}

// =========================================================================
// Happy path
// =========================================================================

#[tokio::test]
async fn test_hold_release_pays_courier_minus_commission() {
    let h = Harness::new();
    let (shipper, courier) = parties();
    h.fund(&shipper, 200_000).await;

    let trip = h.trip(shipper.account, courier.account, ghs(80_000), TripStatus::PickupPending);
    let hold = h.engine.hold_for_trip(&shipper, trip).unwrap();
    assert_eq!(hold.status, HoldState::Held);
    assert_eq!(h.balances(shipper.account), (120_000, 80_000));
    h.assert_conserved();

    h.set_trip(trip, TripStatus::InTransit);
    h.set_trip(trip, TripStatus::Delivered);
    h.set_trip(trip, TripStatus::Confirmed);

    let released = h.engine.release(&shipper, hold.id).unwrap();
    assert_eq!(released.commission, ghs(4_000));
    assert_eq!(released.net_payout, ghs(76_000));

    assert_eq!(h.balances(shipper.account), (120_000, 0));
    assert_eq!(h.balances(courier.account), (76_000, 0));
    assert_eq!(h.platform_revenue(), 4_000);

    let payouts = h.engine.list_payouts(&courier, courier.account).unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, ghs(76_000));
    assert_eq!(payouts[0].status, PayoutStatus::Completed);

    let settled = h.engine.get_hold(&courier, hold.id).unwrap();
    assert_eq!(settled.state, HoldState::Released);
    assert!(settled.settled_at.is_some());
    h.assert_conserved();
}

#[tokio::test]
async fn test_admin_refund_returns_everything() {
    let h = Harness::new();
    let (shipper, courier) = parties();
    h.fund(&shipper, 50_000).await;

    let trip = h.trip(shipper.account, courier.account, ghs(50_000), TripStatus::PickupPending);
    let hold = h.engine.hold_for_trip(&shipper, trip).unwrap();
    h.set_trip(trip, TripStatus::Cancelled);

    let refunded = h.engine.refund(&h.admin, hold.id).unwrap();
    assert_eq!(refunded.amount, ghs(50_000));
    assert_eq!(h.balances(shipper.account), (50_000, 0));
    assert_eq!(h.platform_revenue(), 0);
    h.assert_conserved();
}

// =========================================================================
// Preconditions
// =========================================================================

#[tokio::test]
async fn test_second_hold_on_trip_is_rejected() {
    let h = Harness::new();
    let (shipper, courier) = parties();
    h.fund(&shipper, 100_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(30_000), TripStatus::PickupPending);

    h.engine.hold_for_trip(&shipper, trip).unwrap();
    let err = h.engine.hold_for_trip(&shipper, trip).unwrap_err();
    assert!(matches!(err, SettlementError::DuplicateHold { trip: t } if t == trip));
    assert_eq!(h.balances(shipper.account), (70_000, 30_000));
    h.assert_conserved();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_holds_on_one_trip_exactly_one_wins() {
    let h = Arc::new(Harness::new());
    let (shipper, courier) = parties();
    h.fund(&shipper, 100_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(10_000), TripStatus::PickupPending);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            let shipper = shipper.clone();
            tokio::spawn(async move {
                h.engine.hold_for_trip(&shipper, trip)
            })
        })
        .collect();

    let mut won = 0;
    for task in futures::future::join_all(tasks).await {
        match task.unwrap() {
            Ok(_) => won += 1,
            Err(SettlementError::DuplicateHold { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(h.balances(shipper.account), (90_000, 10_000));
    h.assert_conserved();
}

#[tokio::test]
async fn test_hold_requires_pickup_pending_trip() {
    let h = Harness::new();
    let (shipper, courier) = parties();
    h.fund(&shipper, 10_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(5_000), TripStatus::InTransit);

    let err = h.engine.hold_for_trip(&shipper, trip).unwrap_err();
    assert!(matches!(
        err,
        SettlementError::TripNotEligible { current: TripStatus::InTransit, .. }
    ));
    assert_eq!(h.balances(shipper.account), (10_000, 0));
}

#[tokio::test]
async fn test_hold_shortfall_is_reported_and_retryable() {
    let h = Harness::new();
    let (shipper, courier) = parties();
    h.fund(&shipper, 10_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(25_000), TripStatus::PickupPending);

    let err = h.engine.hold_for_trip(&shipper, trip).unwrap_err();
    match err {
        SettlementError::InsufficientFunds { shortfall, .. } => assert_eq!(shortfall, ghs(15_000)),
        other => panic!("unexpected error: {other}"),
    }

    // The failed attempt does not claim the trip.
    h.fund(&shipper, 15_000).await;
    h.engine.hold_for_trip(&shipper, trip).unwrap();
    assert_eq!(h.balances(shipper.account), (0, 25_000));
    h.assert_conserved();
}

#[tokio::test]
async fn test_release_is_not_repeatable() {
    let h = Harness::new();
    let (shipper, courier) = parties();
    h.fund(&shipper, 20_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(20_000), TripStatus::PickupPending);
    let hold = h.engine.hold_for_trip(&shipper, trip).unwrap();

    // Not confirmed yet.
    h.set_trip(trip, TripStatus::Delivered);
    assert!(matches!(
        h.engine.release(&shipper, hold.id),
        Err(SettlementError::TripNotEligible { .. })
    ));

    h.set_trip(trip, TripStatus::Confirmed);
    h.engine.release(&shipper, hold.id).unwrap();

    let err = h.engine.release(&shipper, hold.id).unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidHoldState { current: HoldState::Released, .. }
    ));
    assert!(matches!(
        h.engine.refund(&h.admin, hold.id),
        Err(SettlementError::InvalidHoldState { .. })
    ));
    assert_eq!(h.platform_revenue(), 1_000);
    h.assert_conserved();
}

#[tokio::test]
async fn test_outsiders_cannot_touch_a_hold() {
    let h = Harness::new();
    let (shipper, courier) = parties();
    let stranger = Caller::shipper(AccountId::new());
    h.fund(&shipper, 20_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(20_000), TripStatus::PickupPending);
    let hold = h.engine.hold_for_trip(&shipper, trip).unwrap();
    h.set_trip(trip, TripStatus::Confirmed);

    assert!(matches!(
        h.engine.get_hold(&stranger, hold.id),
        Err(SettlementError::Unauthorized { .. })
    ));
    assert!(matches!(
        h.engine.release(&courier, hold.id),
        Err(SettlementError::Unauthorized { .. })
    ));
    assert!(matches!(
        h.engine.refund(&shipper, hold.id),
        Err(SettlementError::Unauthorized { .. })
    ));
    assert_eq!(h.engine.get_hold(&shipper, hold.id).unwrap().state, HoldState::Held);
}
