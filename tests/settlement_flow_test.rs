//! Capture and payout orchestration: fee splits, idempotent capture, the
//! compensating payout-failure transition, and the stays-paid rule for a
//! missing payout destination.

mod common;

use assert_matches::assert_matches;
use common::TestHarness;
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use atelier_api::entities::order::OrderState;
use atelier_api::errors::OrderError;
use atelier_api::repositories::OrderStore;

#[tokio::test]
async fn capture_and_payout_settle_a_ten_percent_fee_order() {
    let harness = TestHarness::with_fee(dec!(10));
    let (_, project_id) = harness.seed_listing(dec!(100.00));
    let buyer_id = Uuid::new_v4();

    let intent = harness
        .service
        .create_purchase_intent(buyer_id, project_id)
        .await
        .expect("intent should be created");

    assert_eq!(intent.amount_total, dec!(100.00));
    assert_eq!(intent.currency, "USD");
    assert!(intent.approve_link.contains(&intent.gateway_order_id));

    let order = harness
        .store
        .find_by_id(intent.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.platform_fee, dec!(10.00));
    assert_eq!(order.seller_amount, dec!(90.00));
    assert_eq!(order.state, OrderState::Created);

    let status = harness
        .service
        .capture(buyer_id, &intent.gateway_order_id)
        .await
        .expect("capture should settle");

    assert_eq!(status.status, OrderState::PayoutSent);
    assert!(status.gateway_capture_id.is_some());

    let settled = harness
        .store
        .find_by_id(intent.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.state, OrderState::PayoutSent);
    assert!(settled.gateway_capture_id.is_some());
    assert!(settled.payout_batch_id.is_some());
    assert!(settled.payout_item_id.is_some());

    // Settlement marks the project sold (informational, not a lock).
    assert!(harness.catalog.get(project_id).unwrap().is_sold);
}

#[tokio::test]
async fn second_capture_short_circuits_without_calling_gateway() {
    let harness = TestHarness::new();
    let (_, project_id) = harness.seed_listing(dec!(49.99));
    let buyer_id = Uuid::new_v4();

    let intent = harness
        .service
        .create_purchase_intent(buyer_id, project_id)
        .await
        .unwrap();

    harness
        .service
        .capture(buyer_id, &intent.gateway_order_id)
        .await
        .expect("first capture settles");
    assert_eq!(harness.gateway.capture_call_count(), 1);

    let err = harness
        .service
        .capture(buyer_id, &intent.gateway_order_id)
        .await
        .expect_err("second capture must short-circuit");

    assert_matches!(
        err,
        OrderError::OrderAlreadyProcessed {
            state: OrderState::PayoutSent,
            ..
        }
    );
    // The fast path refused before touching the gateway again.
    assert_eq!(harness.gateway.capture_call_count(), 1);
}

#[tokio::test]
async fn payout_failure_flags_order_instead_of_reverting_capture() {
    let harness = TestHarness::new();
    let (_, project_id) = harness.seed_listing(dec!(75.00));
    let buyer_id = Uuid::new_v4();

    let intent = harness
        .service
        .create_purchase_intent(buyer_id, project_id)
        .await
        .unwrap();
    harness.gateway.set_fail_payout(true);

    let err = harness
        .service
        .capture(buyer_id, &intent.gateway_order_id)
        .await
        .expect_err("payout failure surfaces to caller");
    assert_matches!(err, OrderError::PayoutFailed(_));

    let order = harness
        .store
        .find_by_id(intent.order_id)
        .await
        .unwrap()
        .unwrap();
    // Money moved: the order must end settled, never back in an open or
    // canceled state.
    assert_eq!(order.state, OrderState::PayoutFailed);
    assert!(order.gateway_capture_id.is_some());
    assert!(order.payout_batch_id.is_none());
}

#[tokio::test]
async fn missing_payout_destination_leaves_order_paid() {
    let harness = TestHarness::new();
    let (seller_id, project_id) = harness.seed_listing(dec!(60.00));
    let buyer_id = Uuid::new_v4();

    let intent = harness
        .service
        .create_purchase_intent(buyer_id, project_id)
        .await
        .unwrap();

    // Seller removes their payout destination between intent and capture.
    harness.payees.remove(seller_id);

    let err = harness
        .service
        .capture(buyer_id, &intent.gateway_order_id)
        .await
        .expect_err("capture reports the missing destination");
    assert_matches!(err, OrderError::SellerPayoutMissing);

    let order = harness
        .store
        .find_by_id(intent.order_id)
        .await
        .unwrap()
        .unwrap();
    // Captured but payout never attempted; retried out-of-band.
    assert_eq!(order.state, OrderState::Paid);
    assert_eq!(harness.gateway.payout_call_count(), 0);
}

#[tokio::test]
async fn declined_capture_leaves_order_unchanged_and_retryable() {
    let harness = TestHarness::new();
    let (_, project_id) = harness.seed_listing(dec!(25.00));
    let buyer_id = Uuid::new_v4();

    let intent = harness
        .service
        .create_purchase_intent(buyer_id, project_id)
        .await
        .unwrap();

    harness.gateway.set_capture_status("DECLINED");
    let err = harness
        .service
        .capture(buyer_id, &intent.gateway_order_id)
        .await
        .expect_err("declined capture fails");
    assert_matches!(err, OrderError::CaptureFailed { ref gateway_status } if gateway_status == "DECLINED");

    let order = harness
        .store
        .find_by_id(intent.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.state, OrderState::Created);
    assert!(order.gateway_capture_id.is_none());

    // Gateway recovers; the same order settles on retry.
    harness.gateway.set_capture_status("COMPLETED");
    let status = harness
        .service
        .capture(buyer_id, &intent.gateway_order_id)
        .await
        .expect("retry settles");
    assert_eq!(status.status, OrderState::PayoutSent);
}

#[tokio::test]
async fn capture_by_another_user_is_denied_before_the_gateway_call() {
    let harness = TestHarness::new();
    let (_, project_id) = harness.seed_listing(dec!(19.00));
    let buyer_id = Uuid::new_v4();

    let intent = harness
        .service
        .create_purchase_intent(buyer_id, project_id)
        .await
        .unwrap();

    let err = harness
        .service
        .capture(Uuid::new_v4(), &intent.gateway_order_id)
        .await
        .expect_err("other users cannot capture");
    assert_matches!(err, OrderError::AccessDenied);
    assert_eq!(harness.gateway.capture_call_count(), 0);
}

#[tokio::test]
async fn capture_of_unknown_gateway_order_is_not_found() {
    let harness = TestHarness::new();
    let err = harness
        .service
        .capture(Uuid::new_v4(), "GW-unknown")
        .await
        .expect_err("unknown gateway order");
    assert_matches!(err, OrderError::OrderNotFound);
}

#[rstest]
#[case(dec!(100.00), Decimal::ZERO, dec!(0.00), dec!(100.00))]
#[case(dec!(100.00), dec!(10), dec!(10.00), dec!(90.00))]
#[case(dec!(19.99), dec!(12.5), dec!(2.50), dec!(17.49))]
#[case(dec!(33.33), dec!(2.9), dec!(0.97), dec!(32.36))]
#[tokio::test]
async fn fee_and_seller_amount_always_reconcile(
    #[case] price: Decimal,
    #[case] fee_percent: Decimal,
    #[case] expected_fee: Decimal,
    #[case] expected_seller: Decimal,
) {
    let harness = TestHarness::with_fee(fee_percent);
    let (_, project_id) = harness.seed_listing(price);
    let buyer_id = Uuid::new_v4();

    let intent = harness
        .service
        .create_purchase_intent(buyer_id, project_id)
        .await
        .unwrap();

    let order = harness
        .store
        .find_by_id(intent.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.platform_fee, expected_fee);
    assert_eq!(order.seller_amount, expected_seller);
    assert_eq!(order.platform_fee + order.seller_amount, order.amount_total);
}
