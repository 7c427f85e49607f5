//! Integration test: many callers hitting the same wallets at once.
//!
//! Runs on the multi-threaded runtime so operations genuinely interleave.

use std::sync::Arc;

use haulage_core::AccountId;
use haulage_integration_tests::{ghs, Harness};
use haulage_settlement::{CallbackStatus, Caller, Provider, Role, SettlementError, TripStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let h = Arc::new(Harness::new());
    let courier = Caller::courier(AccountId::new());
    h.fund(&courier, 100_000).await;

    // Each withdrawal debits 10_100; at most nine fit.
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let h = h.clone();
            let courier = courier.clone();
            tokio::spawn(async move { h.withdraw(&courier, 10_000).await })
        })
        .collect();

    let mut accepted = Vec::new();
    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(initiated) => accepted.push(initiated),
            Err(SettlementError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted.len(), 9);
    assert_eq!(h.balances(courier.account), (100_000 - 9 * 10_100, 0));
    h.assert_conserved();

    // Settle half, fail the rest.
    for (i, initiated) in accepted.iter().enumerate() {
        let status = if i % 2 == 0 {
            CallbackStatus::Success
        } else {
            CallbackStatus::Failed
        };
        h.settle(Provider::Mtn, &initiated.external_key, status);
    }
    assert_eq!(h.balances(courier.account), (100_000 - 5 * 10_100, 0));
    assert_eq!(h.platform_revenue(), 5 * 100);
    h.assert_conserved();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_parallel_trips_settle_independently() {
    let h = Arc::new(Harness::new());
    let shipper = Caller::shipper(AccountId::new());
    let couriers: Vec<Caller> = (0..10).map(|_| Caller::courier(AccountId::new())).collect();
    h.fund(&shipper, 500_000).await;

    let trips: Vec<_> = couriers
        .iter()
        .map(|c| h.trip(shipper.account, c.account, ghs(40_000), TripStatus::PickupPending))
        .collect();

    let tasks: Vec<_> = trips
        .iter()
        .map(|&trip_id| {
            let h = h.clone();
            let shipper = shipper.clone();
            tokio::spawn(async move {
                h.engine
                    .hold_for_trip(&shipper, trip_id)
                    .and_then(|hold| {
                        h.set_trip(trip_id, TripStatus::Confirmed);
                        h.engine.release(&shipper, hold.id)
                    })
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        let released = result.unwrap().unwrap();
        assert_eq!(released.net_payout, ghs(38_000));
    }

    assert_eq!(h.balances(shipper.account), (100_000, 0));
    for courier in &couriers {
        assert_eq!(h.balances(courier.account), (38_000, 0));
    }
    assert_eq!(h.platform_revenue(), 10 * 2_000);
    h.assert_conserved();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cross_payments_do_not_deadlock() {
    // Two accounts act as shipper and courier for each other at once, so
    // releases lock the same wallet pair in opposite roles.
    let h = Arc::new(Harness::new());
    let a = Caller::new(AccountId::new(), vec![Role::Shipper, Role::Courier]);
    let b = Caller::new(AccountId::new(), vec![Role::Shipper, Role::Courier]);
    h.fund(&a, 200_000).await;
    h.fund(&b, 200_000).await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let (payer, payee) = if i % 2 == 0 {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        let trip_id = h.trip(
            payer.account,
            payee.account,
            ghs(10_000),
            TripStatus::PickupPending,
        );
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.engine
                .hold_for_trip(&payer, trip_id)
                .and_then(|hold| {
                    h.set_trip(trip_id, TripStatus::Confirmed);
                    h.engine.release(&payer, hold.id)
                })
        }));
    }
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    // Each side paid 10 x 10_000 and received 10 x 9_500.
    assert_eq!(h.balances(a.account), (200_000 - 100_000 + 95_000, 0));
    assert_eq!(h.balances(b.account), (200_000 - 100_000 + 95_000, 0));
    h.assert_conserved();
}
