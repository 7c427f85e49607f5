//! Integration test: disputes freezing a hold and their admin resolution.

use haulage_core::{AccountId, DisputeStatus, HoldId, HoldState, TripId};
use haulage_integration_tests::{ghs, Harness};
use haulage_settlement::{
    Caller, Dispute, DisputeReason, OpenDispute, Resolution, SettlementError, TripStatus,
};

struct Disputed {
    shipper: Caller,
    courier: Caller,
    trip: TripId,
    hold: HoldId,
    dispute: Dispute,
}

/// Fund a shipper, hold `minor` for a delivered trip and open a dispute on it.
async fn disputed(h: &Harness, minor: u64) -> Disputed {
    let shipper = Caller::shipper(AccountId::new());
    let courier = Caller::courier(AccountId::new());
    h.fund(&shipper, minor).await;
    let trip = h.trip(shipper.account, courier.account, ghs(minor), TripStatus::PickupPending);
    let hold = h.engine.hold_for_trip(&shipper, trip).unwrap().id;
    h.set_trip(trip, TripStatus::Delivered);
    let dispute = h
        .engine
        .open_dispute(&shipper, open(trip, DisputeReason::DamagedGoods))
        .unwrap();
    Disputed {
        shipper,
        courier,
        trip,
        hold,
        dispute,
    }
}

fn open(trip_id: TripId, reason: DisputeReason) -> OpenDispute {
    OpenDispute {
        trip_id,
        reason,
        description: "two of the ten cement bags arrived split open".into(),
        evidence: vec!["photo-1.jpg".into()],
    }
}

// =========================================================================
// Opening
// =========================================================================

#[tokio::test]
async fn test_opening_freezes_hold_and_trip() {
    let h = Harness::new();
    let d = disputed(&h, 40_000).await;

    assert_eq!(d.dispute.status, DisputeStatus::Open);
    assert_eq!(d.dispute.raised_by, d.shipper.account);
    assert_eq!(d.dispute.counterparty, d.courier.account);
    assert_eq!(d.dispute.hold_id, d.hold);
    assert_eq!(h.engine.get_hold(&d.courier, d.hold).unwrap().state, HoldState::Disputed);

    // A disputed trip can no longer be released through the normal path.
    assert!(h.engine.release(&d.shipper, d.hold).is_err());
    h.assert_conserved();
}

#[tokio::test]
async fn test_one_active_dispute_per_trip() {
    let h = Harness::new();
    let d = disputed(&h, 40_000).await;

    // The trip is now disputed, so restore an eligible status to reach the
    // active-dispute check.
    h.set_trip(d.trip, TripStatus::Delivered);
    let err = h
        .engine
        .open_dispute(&d.courier, open(d.trip, DisputeReason::Overcharge))
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::ActiveDisputeExists { dispute, .. } if dispute == d.dispute.id
    ));
}

#[tokio::test]
async fn test_dispute_needs_delivered_trip_and_real_description() {
    let h = Harness::new();
    let shipper = Caller::shipper(AccountId::new());
    let courier = Caller::courier(AccountId::new());
    h.fund(&shipper, 10_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(10_000), TripStatus::PickupPending);
    h.engine.hold_for_trip(&shipper, trip).unwrap();

    h.set_trip(trip, TripStatus::InTransit);
    assert!(matches!(
        h.engine.open_dispute(&shipper, open(trip, DisputeReason::LateDelivery)),
        Err(SettlementError::TripNotEligible { .. })
    ));

    h.set_trip(trip, TripStatus::Delivered);
    let mut short = open(trip, DisputeReason::LateDelivery);
    short.description = "late".into();
    assert!(matches!(
        h.engine.open_dispute(&shipper, short),
        Err(SettlementError::Validation(_))
    ));

    let outsider = Caller::shipper(AccountId::new());
    assert!(matches!(
        h.engine.open_dispute(&outsider, open(trip, DisputeReason::Fraud)),
        Err(SettlementError::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn test_only_trip_parties_open_disputes() {
    let h = Harness::new();
    let shipper = Caller::shipper(AccountId::new());
    let courier = Caller::courier(AccountId::new());
    h.fund(&shipper, 20_000).await;
    let trip = h.trip(shipper.account, courier.account, ghs(20_000), TripStatus::PickupPending);
    h.engine.hold_for_trip(&shipper, trip).unwrap();
    h.set_trip(trip, TripStatus::Delivered);

    assert!(matches!(
        h.engine.open_dispute(&h.admin, open(trip, DisputeReason::Fraud)),
        Err(SettlementError::Unauthorized { .. })
    ));

    // Raised by the courier, the shipper is the counterparty and can act on it.
    let dispute = h
        .engine
        .open_dispute(&courier, open(trip, DisputeReason::Overcharge))
        .unwrap();
    assert_eq!(dispute.raised_by, courier.account);
    assert_eq!(dispute.counterparty, shipper.account);
    assert!(h.engine.get_dispute(&shipper, dispute.id).is_ok());
    let escalated = h
        .engine
        .escalate_dispute(&shipper, dispute.id, Some("price was agreed upfront".into()))
        .unwrap();
    assert_eq!(escalated.status, DisputeStatus::Escalated);
}

// =========================================================================
// Resolution
// =========================================================================

#[tokio::test]
async fn test_admin_refund_of_disputed_hold_resolves_dispute() {
    let h = Harness::new();
    let d = disputed(&h, 35_000).await;

    let refunded = h.engine.refund(&h.admin, d.hold).unwrap();
    assert_eq!(refunded.amount, ghs(35_000));
    assert_eq!(h.balances(d.shipper.account), (35_000, 0));
    assert_eq!(h.engine.get_hold(&h.admin, d.hold).unwrap().state, HoldState::Refunded);

    let dispute = h.engine.get_dispute(&d.shipper, d.dispute.id).unwrap();
    assert_eq!(dispute.status, DisputeStatus::ResolvedPayer);
    assert!(matches!(
        h.engine.resolve_dispute(&h.admin, d.dispute.id, Resolution::FavorPayee, None),
        Err(SettlementError::InvalidDisputeState { .. })
    ));

    // The trip's dispute slot is free again; the hold itself is final.
    h.set_trip(d.trip, TripStatus::Delivered);
    assert!(matches!(
        h.engine.open_dispute(&d.courier, open(d.trip, DisputeReason::Other)),
        Err(SettlementError::InvalidHoldState { .. })
    ));
    h.assert_conserved();
}

#[tokio::test]
async fn test_split_shares_add_up_to_hold() {
    let h = Harness::new();
    let d = disputed(&h, 100_000).await;

    let resolved = h
        .engine
        .resolve_dispute(
            &h.admin,
            d.dispute.id,
            Resolution::Split {
                payer_refund: ghs(30_000),
                payee_payout: ghs(60_000),
            },
            Some("partial damage confirmed".into()),
        )
        .unwrap();
    assert_eq!(resolved.status, DisputeStatus::ResolvedSplit);

    let record = resolved.resolution.unwrap();
    assert_eq!(record.payer_refund, ghs(30_000));
    assert_eq!(record.payee_payout, ghs(60_000));
    assert_eq!(record.platform_retained, ghs(10_000));
    assert_eq!(
        record.payer_refund.minor + record.payee_payout.minor + record.platform_retained.minor,
        100_000
    );
    assert_eq!(record.resolved_by, h.admin.account);
    assert!(record.payout_id.is_some());

    assert_eq!(h.balances(d.shipper.account), (30_000, 0));
    assert_eq!(h.balances(d.courier.account), (60_000, 0));
    assert_eq!(h.platform_revenue(), 10_000);
    assert_eq!(
        h.engine.get_hold(&h.admin, d.hold).unwrap().state,
        HoldState::PartiallyReleased
    );
    h.assert_conserved();
}

#[tokio::test]
async fn test_oversized_split_changes_nothing() {
    let h = Harness::new();
    let d = disputed(&h, 50_000).await;

    let err = h
        .engine
        .resolve_dispute(
            &h.admin,
            d.dispute.id,
            Resolution::Split {
                payer_refund: ghs(30_000),
                payee_payout: ghs(30_000),
            },
            None,
        )
        .unwrap_err();
    match err {
        SettlementError::SplitExceedsHold {
            requested,
            hold_amount,
        } => {
            assert_eq!(requested, ghs(60_000));
            assert_eq!(hold_amount, ghs(50_000));
        }
        other => panic!("unexpected error: {other}"),
    }

    let dispute = h.engine.get_dispute(&d.shipper, d.dispute.id).unwrap();
    assert_eq!(dispute.status, DisputeStatus::Open);
    assert!(dispute.resolution.is_none());
    assert_eq!(h.engine.get_hold(&h.admin, d.hold).unwrap().state, HoldState::Disputed);
    assert_eq!(h.balances(d.shipper.account), (0, 50_000));
    h.assert_conserved();
}

#[tokio::test]
async fn test_favor_payer_refunds_in_full() {
    let h = Harness::new();
    let d = disputed(&h, 25_000).await;

    let resolved = h
        .engine
        .resolve_dispute(&h.admin, d.dispute.id, Resolution::FavorPayer, None)
        .unwrap();
    assert_eq!(resolved.status, DisputeStatus::ResolvedPayer);
    assert_eq!(h.balances(d.shipper.account), (25_000, 0));
    assert_eq!(h.balances(d.courier.account), (0, 0));
    assert_eq!(h.engine.get_hold(&h.admin, d.hold).unwrap().state, HoldState::Refunded);

    // Resolving frees the trip for a new dispute, but the hold is final.
    h.set_trip(d.trip, TripStatus::Delivered);
    assert!(matches!(
        h.engine.open_dispute(&d.courier, open(d.trip, DisputeReason::Other)),
        Err(SettlementError::InvalidHoldState { .. })
    ));
    h.assert_conserved();
}

#[tokio::test]
async fn test_favor_payee_takes_commission() {
    let h = Harness::new();
    let d = disputed(&h, 40_000).await;

    let resolved = h
        .engine
        .resolve_dispute(&h.admin, d.dispute.id, Resolution::FavorPayee, None)
        .unwrap();
    assert_eq!(resolved.status, DisputeStatus::ResolvedPayee);
    let record = resolved.resolution.unwrap();
    assert_eq!(record.payee_payout, ghs(38_000));
    assert_eq!(record.platform_retained, ghs(2_000));
    assert_eq!(h.balances(d.courier.account), (38_000, 0));
    h.assert_conserved();
}

#[tokio::test]
async fn test_review_escalate_then_resolve() {
    let h = Harness::new();
    let d = disputed(&h, 30_000).await;

    // Parties may escalate but not review or resolve.
    assert!(matches!(
        h.engine.begin_review(&d.courier, d.dispute.id, None),
        Err(SettlementError::Unauthorized { .. })
    ));
    let reviewed = h
        .engine
        .begin_review(&h.admin, d.dispute.id, Some("collecting photos".into()))
        .unwrap();
    assert_eq!(reviewed.status, DisputeStatus::UnderReview);

    let escalated = h
        .engine
        .escalate_dispute(&d.courier, d.dispute.id, Some("shipper unresponsive".into()))
        .unwrap();
    assert_eq!(escalated.status, DisputeStatus::Escalated);
    assert_eq!(escalated.escalation_reason.as_deref(), Some("shipper unresponsive"));

    // Escalated disputes cannot go back to review or be escalated again.
    assert!(matches!(
        h.engine.begin_review(&h.admin, d.dispute.id, None),
        Err(SettlementError::InvalidDisputeState { .. })
    ));
    assert!(matches!(
        h.engine.escalate_dispute(&d.shipper, d.dispute.id, None),
        Err(SettlementError::InvalidDisputeState { .. })
    ));

    assert!(matches!(
        h.engine.resolve_dispute(&d.shipper, d.dispute.id, Resolution::FavorPayer, None),
        Err(SettlementError::Unauthorized { .. })
    ));
    h.engine
        .resolve_dispute(&h.admin, d.dispute.id, Resolution::FavorPayer, None)
        .unwrap();

    let err = h
        .engine
        .resolve_dispute(&h.admin, d.dispute.id, Resolution::FavorPayee, None)
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::InvalidDisputeState { current: DisputeStatus::ResolvedPayer, .. }
    ));
    h.assert_conserved();
}

#[tokio::test]
async fn test_dispute_listing_is_scoped_to_parties() {
    let h = Harness::new();
    let first = disputed(&h, 10_000).await;
    let _second = disputed(&h, 12_000).await;

    assert_eq!(h.engine.list_disputes(&h.admin, None).unwrap().len(), 2);
    let mine = h.engine.list_disputes(&first.courier, None).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, first.dispute.id);
    assert!(h
        .engine
        .list_disputes(&h.admin, Some(DisputeStatus::Escalated))
        .unwrap()
        .is_empty());
}
