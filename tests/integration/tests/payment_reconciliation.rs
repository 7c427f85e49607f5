//! Integration test: mobile-money deposits and withdrawals reconciled
//! against rail callbacks, synchronous rejections and the timeout sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};
use haulage_core::{AccountId, Currency, WalletId};
use haulage_integration_tests::{ghs, Harness, PHONE};
use haulage_settlement::{
    CallbackAck, CallbackStatus, Caller, DepositRequest, EntryKind, EntryStatus, GatewayError,
    HistoryQuery, LedgerEntry, PaymentStatus, Provider, SettlementError, SweepOutcome,
};

fn wallet_id(h: &Harness, account: AccountId) -> WalletId {
    h.engine
        .wallet_summary(&h.admin, account)
        .unwrap()
        .into_iter()
        .find(|w| w.currency == Currency::GHS)
        .unwrap()
        .id
}

/// Full journal, oldest first.
fn entries(h: &Harness, account: AccountId) -> Vec<LedgerEntry> {
    let query = HistoryQuery {
        newest_first: false,
        per_page: HistoryQuery::MAX_PER_PAGE,
        ..HistoryQuery::default()
    };
    h.engine
        .transaction_history(&h.admin, wallet_id(h, account), &query)
        .unwrap()
        .items
}

// =========================================================================
// Deposits
// =========================================================================

#[tokio::test]
async fn test_deposit_credits_only_on_success_callback() {
    let h = Harness::new();
    let shipper = Caller::shipper(AccountId::new());

    let initiated = h
        .engine
        .deposit(
            &shipper,
            DepositRequest {
                account: shipper.account,
                amount: ghs(15_000),
                provider: Provider::Vodafone,
                payer_handle: "+233 20 123 4567".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(initiated.status, PaymentStatus::Pending);
    assert!(initiated.external_key.starts_with("MOMO-"));
    assert!(!initiated.external_key.starts_with("MOMO-D-"));
    assert_eq!(h.balances(shipper.account), (0, 0));

    let journal = entries(&h, shipper.account);
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].status, EntryStatus::Pending);
    assert!(!journal[0].is_posted());

    let ack = h.settle(Provider::Vodafone, &initiated.external_key, CallbackStatus::Success);
    assert!(matches!(ack, CallbackAck::Applied { status: PaymentStatus::Success, .. }));
    assert_eq!(h.balances(shipper.account), (15_000, 0));

    let record = h.engine.get_payment(&shipper, initiated.payment_id).unwrap();
    assert_eq!(record.handle, "+233201234567");
    assert!(record.provider_reference.is_some());
    assert!(record.completed_at.is_some());
    h.assert_conserved();
}

#[tokio::test]
async fn test_replayed_callback_applies_once() {
    let h = Harness::new();
    let shipper = Caller::shipper(AccountId::new());
    let initiated = h.fund(&shipper, 10_000).await;

    let ack = h.settle(Provider::Mtn, &initiated.external_key, CallbackStatus::Success);
    assert!(matches!(ack, CallbackAck::AlreadyProcessed { status: PaymentStatus::Success, .. }));

    // A contradicting replay is also ignored.
    let ack = h.settle(Provider::Mtn, &initiated.external_key, CallbackStatus::Failed);
    assert!(matches!(ack, CallbackAck::AlreadyProcessed { status: PaymentStatus::Success, .. }));

    assert_eq!(h.balances(shipper.account), (10_000, 0));
    h.assert_conserved();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callbacks_apply_once() {
    let h = Arc::new(Harness::new());
    let shipper = Caller::shipper(AccountId::new());
    let initiated = h
        .engine
        .deposit(
            &shipper,
            DepositRequest {
                account: shipper.account,
                amount: ghs(7_500),
                provider: Provider::Mtn,
                payer_handle: PHONE.into(),
            },
        )
        .await
        .unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let h = h.clone();
            let key = initiated.external_key.clone();
            tokio::spawn(async move { h.settle(Provider::Mtn, &key, CallbackStatus::Success) })
        })
        .collect();
    let acks: Vec<CallbackAck> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let applied = acks
        .iter()
        .filter(|a| matches!(a, CallbackAck::Applied { .. }))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(h.balances(shipper.account), (7_500, 0));
    h.assert_conserved();
}

#[tokio::test]
async fn test_failed_deposit_never_credits() {
    let h = Harness::new();
    let shipper = Caller::shipper(AccountId::new());
    let initiated = h
        .engine
        .deposit(
            &shipper,
            DepositRequest {
                account: shipper.account,
                amount: ghs(5_000),
                provider: Provider::Mtn,
                payer_handle: PHONE.into(),
            },
        )
        .await
        .unwrap();

    h.settle(Provider::Mtn, &initiated.external_key, CallbackStatus::Failed);
    let late = h.settle(Provider::Mtn, &initiated.external_key, CallbackStatus::Success);
    assert!(matches!(late, CallbackAck::AlreadyProcessed { status: PaymentStatus::Failed, .. }));

    assert_eq!(h.balances(shipper.account), (0, 0));
    assert_eq!(entries(&h, shipper.account)[0].status, EntryStatus::Failed);
    h.assert_conserved();
}

#[tokio::test]
async fn test_deposit_validation() {
    let h = Harness::new();
    let shipper = Caller::shipper(AccountId::new());
    let request = |minor: u64, handle: &str| DepositRequest {
        account: shipper.account,
        amount: ghs(minor),
        provider: Provider::Mtn,
        payer_handle: handle.into(),
    };

    assert!(matches!(
        h.engine.deposit(&shipper, request(50, PHONE)).await,
        Err(SettlementError::AmountOutOfRange { .. })
    ));
    assert!(matches!(
        h.engine.deposit(&shipper, request(6_000_000, PHONE)).await,
        Err(SettlementError::AmountOutOfRange { .. })
    ));
    assert!(matches!(
        h.engine.deposit(&shipper, request(1_000, "12345")).await,
        Err(SettlementError::InvalidHandle(_))
    ));

    let other = Caller::shipper(AccountId::new());
    assert!(matches!(
        h.engine.deposit(&other, request(1_000, PHONE)).await,
        Err(SettlementError::Unauthorized { .. })
    ));
    assert_eq!(h.rail(Provider::Mtn).request_count(), 0);
}

// =========================================================================
// Withdrawals
// =========================================================================

#[tokio::test]
async fn test_withdrawal_debits_amount_plus_fee() {
    let h = Harness::new();
    let courier = Caller::courier(AccountId::new());
    h.fund(&courier, 50_000).await;

    let initiated = h.withdraw(&courier, 20_000).await.unwrap();
    assert!(initiated.external_key.starts_with("MOMO-D-"));
    assert_eq!(initiated.fee, ghs(200));
    assert_eq!(initiated.net_amount, ghs(20_000));
    assert_eq!(h.balances(courier.account), (29_800, 0));
    h.assert_conserved();

    h.settle(Provider::Mtn, &initiated.external_key, CallbackStatus::Success);
    assert_eq!(h.balances(courier.account), (29_800, 0));
    assert_eq!(h.platform_revenue(), 200);

    let withdrawal = entries(&h, courier.account)
        .into_iter()
        .find(|e| e.kind == EntryKind::Withdrawal)
        .unwrap();
    assert_eq!(withdrawal.status, EntryStatus::Completed);
    h.assert_conserved();
}

#[tokio::test]
async fn test_withdrawal_fee_is_clamped() {
    let h = Harness::new();
    let courier = Caller::courier(AccountId::new());
    h.fund(&courier, 2_000_000).await;

    assert_eq!(h.withdraw(&courier, 1_000).await.unwrap().fee, ghs(50));
    assert_eq!(h.withdraw(&courier, 500_000).await.unwrap().fee, ghs(1_000));
    assert!(matches!(
        h.withdraw(&courier, 499).await,
        Err(SettlementError::AmountOutOfRange { .. })
    ));
    h.assert_conserved();
}

#[tokio::test]
async fn test_failed_withdrawal_is_reversed() {
    let h = Harness::new();
    let courier = Caller::courier(AccountId::new());
    h.fund(&courier, 30_000).await;

    let initiated = h.withdraw(&courier, 10_000).await.unwrap();
    assert_eq!(h.balances(courier.account), (19_900, 0));

    h.settle(Provider::Mtn, &initiated.external_key, CallbackStatus::Failed);
    assert_eq!(h.balances(courier.account), (30_000, 0));
    assert_eq!(h.platform_revenue(), 0);

    let journal = entries(&h, courier.account);
    let kinds: Vec<EntryKind> = journal.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EntryKind::Deposit, EntryKind::Withdrawal, EntryKind::Adjustment]
    );
    assert_eq!(journal[1].status, EntryStatus::Failed);
    assert_eq!(journal[2].amount, ghs(10_100));
    assert_eq!(journal[2].available_after, 30_000);
    h.assert_conserved();
}

#[tokio::test]
async fn test_synchronous_rejection_reverses_immediately() {
    let h = Harness::new();
    let courier = Caller::courier(AccountId::new());
    h.fund(&courier, 30_000).await;

    h.rail(Provider::Mtn)
        .reject_next(GatewayError::Rejected("payee not registered".into()));
    let initiated = h.withdraw(&courier, 10_000).await.unwrap();
    assert_eq!(initiated.status, PaymentStatus::Failed);
    assert_eq!(h.balances(courier.account), (30_000, 0));

    let record = h.engine.get_payment(&courier, initiated.payment_id).unwrap();
    assert!(record.message.unwrap().contains("payee not registered"));
    h.assert_conserved();
}

#[tokio::test]
async fn test_overdraw_is_rejected_without_a_payment() {
    let h = Harness::new();
    let courier = Caller::courier(AccountId::new());
    h.fund(&courier, 10_000).await;

    let err = h.withdraw(&courier, 10_000).await.unwrap_err();
    match err {
        SettlementError::InsufficientFunds {
            available,
            required,
            shortfall,
        } => {
            assert_eq!(available, ghs(10_000));
            assert_eq!(required, ghs(10_100));
            assert_eq!(shortfall, ghs(100));
        }
        other => panic!("unexpected error: {other}"),
    }
    // Only the deposit reached the rail.
    assert_eq!(h.rail(Provider::Mtn).request_count(), 1);
    assert_eq!(h.balances(courier.account), (10_000, 0));
}

// =========================================================================
// Timeout sweep
// =========================================================================

#[tokio::test]
async fn test_sweep_times_out_withdrawals_but_waits_on_deposits() {
    let h = Harness::new();
    let courier = Caller::courier(AccountId::new());
    h.fund(&courier, 40_000).await;

    let pending_deposit = h
        .engine
        .deposit(
            &courier,
            DepositRequest {
                account: courier.account,
                amount: ghs(5_000),
                provider: Provider::Mtn,
                payer_handle: PHONE.into(),
            },
        )
        .await
        .unwrap();
    let pending_withdrawal = h.withdraw(&courier, 10_000).await.unwrap();
    assert_eq!(h.balances(courier.account), (29_900, 0));

    // Nothing is stale yet.
    assert_eq!(h.sweep(Utc::now()).await, SweepOutcome::default());

    let outcome = h.sweep(Utc::now() + Duration::minutes(16)).await;
    assert_eq!(outcome.expired, vec![pending_withdrawal.payment_id]);
    assert_eq!(outcome.awaiting_rail, vec![pending_deposit.payment_id]);
    assert_eq!(h.balances(courier.account), (40_000, 0));
    let withdrawal = h.engine.get_payment(&courier, pending_withdrawal.payment_id).unwrap();
    assert_eq!(withdrawal.status, PaymentStatus::Timeout);
    let deposit = h.engine.get_payment(&courier, pending_deposit.payment_id).unwrap();
    assert_eq!(deposit.status, PaymentStatus::Pending);

    // The customer paid late: the deposit is still credited.
    let late = h.settle(Provider::Mtn, &pending_deposit.external_key, CallbackStatus::Success);
    assert!(matches!(late, CallbackAck::Applied { status: PaymentStatus::Success, .. }));
    assert_eq!(h.balances(courier.account), (45_000, 0));

    // A late answer for the expired withdrawal changes nothing.
    let late = h.settle(Provider::Mtn, &pending_withdrawal.external_key, CallbackStatus::Success);
    assert!(matches!(late, CallbackAck::AlreadyProcessed { status: PaymentStatus::Timeout, .. }));
    assert_eq!(h.balances(courier.account), (45_000, 0));
    assert_eq!(h.sweep(Utc::now() + Duration::minutes(30)).await, SweepOutcome::default());
    h.assert_conserved();
}

#[tokio::test]
async fn test_sweep_credits_deposit_whose_callback_was_lost() {
    let h = Harness::new();
    let shipper = Caller::shipper(AccountId::new());
    let initiated = h
        .engine
        .deposit(
            &shipper,
            DepositRequest {
                account: shipper.account,
                amount: ghs(8_000),
                provider: Provider::Vodafone,
                payer_handle: PHONE.into(),
            },
        )
        .await
        .unwrap();
    // The rail completed the collection but the callback never arrived.
    h.rail(Provider::Vodafone)
        .settle(&initiated.external_key, CallbackStatus::Success)
        .unwrap();

    let outcome = h.sweep(Utc::now() + Duration::minutes(16)).await;
    assert_eq!(outcome.reconciled, vec![initiated.payment_id]);
    assert_eq!(h.balances(shipper.account), (8_000, 0));
    h.assert_conserved();
}

#[tokio::test]
async fn test_unknown_external_key() {
    let h = Harness::new();
    let callback = haulage_settlement::PaymentCallback {
        external_key: "MOMO-000000000000".into(),
        status: CallbackStatus::Success,
        provider_reference: None,
        message: None,
    };
    assert!(matches!(
        h.engine.payment_callback(callback),
        Err(SettlementError::ExternalPaymentNotFound(_))
    ));
}
