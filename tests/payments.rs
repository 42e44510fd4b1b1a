mod common;

use std::sync::Arc;

use agrimarket_orderservice::{
    api::{GatewayOutcome, Gateways},
    app_error::AppError,
    models::{OrderEntity, PaymentEntity},
    schema::{orders, payments},
    services::{
        checkout::{self, CheckoutRequest},
        payments::{self as payment_service, Applied, CreatePaymentInput},
    },
    status::{PaymentMethod, PaymentStatus},
};
use common::FakeGateway;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

const BUYER: i32 = 9_101;
const SELLER: i32 = 601;

/// Places a single-seller MoMo order and returns its id and total.
async fn momo_order(conn: &mut AsyncPgConnection) -> (i32, i64) {
    let tea = common::product(conn, SELLER, 30_000, None, 20).await;
    common::add_to_cart(conn, BUYER, tea.id, 2).await;

    let summaries = checkout::create_orders(
        conn,
        &common::checkout_settings(),
        BUYER,
        CheckoutRequest {
            shipping_address: "8 Tran Phu, Da Lat".into(),
            payment_method: Some(PaymentMethod::Momo),
        },
    )
    .await
    .unwrap()
    .value;
    (summaries[0].order_id, summaries[0].total_amount)
}

async fn payment_for(conn: &mut AsyncPgConnection, order_id: i32) -> PaymentEntity {
    payments::table
        .filter(payments::order_id.eq(order_id))
        .select(PaymentEntity::as_select())
        .first(conn)
        .await
        .unwrap()
}

async fn order(conn: &mut AsyncPgConnection, order_id: i32) -> OrderEntity {
    orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .first(conn)
        .await
        .unwrap()
}

fn input(order_id: i32, amount: Option<i64>) -> CreatePaymentInput {
    CreatePaymentInput {
        order_id,
        amount,
        client_ip: None,
    }
}

#[tokio::test]
async fn webhook_settles_payment_exactly_once() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let (order_id, total) = momo_order(conn).await;
    let redirect = payment_service::create_payment_request(
        conn,
        gateway.clone(),
        &common::payment_settings(),
        input(order_id, Some(total)),
    )
    .await
    .unwrap();
    assert_eq!(redirect.amount, total);
    assert!(redirect.link.pay_url.is_some());

    let callback = common::signed_callback(&redirect.transaction_id, total, true);
    let first = payment_service::apply_webhook(conn, gateway.clone(), callback.clone())
        .await
        .unwrap();
    assert_eq!(first.value, Applied::Transitioned(PaymentStatus::Paid));
    assert!(first.notifications.iter().any(|n| n.user_id == BUYER));
    assert!(first.notifications.iter().any(|n| n.user_id == SELLER));

    let payment = payment_for(conn, order_id).await;
    assert_eq!(payment.payment_status, "paid");
    assert!(payment.paid_at.is_some());
    assert_eq!(
        payment.gateway_trans_id,
        Some(format!("GW-{}", redirect.transaction_id))
    );
    assert_eq!(order(conn, order_id).await.status, "processing");

    let replay = payment_service::apply_webhook(conn, gateway, callback)
        .await
        .unwrap();
    assert_eq!(replay.value, Applied::AlreadyFinal(PaymentStatus::Paid));
    assert!(replay.notifications.is_empty());
    assert_eq!(payment_for(conn, order_id).await.paid_at, payment.paid_at);
}

#[tokio::test]
async fn tampered_webhook_changes_nothing() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let (order_id, total) = momo_order(conn).await;
    let redirect = payment_service::create_payment_request(
        conn,
        gateway.clone(),
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();

    // Signed for a failure, replayed as a success.
    let genuine = common::signed_callback(&redirect.transaction_id, total, false);
    let body: serde_json::Value = serde_json::from_slice(&genuine.body).unwrap();
    let forged = common::callback_with_signature(
        &redirect.transaction_id,
        total,
        true,
        body["signature"].as_str().unwrap().to_string(),
    );

    let err = payment_service::apply_webhook(conn, gateway, forged)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidSignature(_)));

    let payment = payment_for(conn, order_id).await;
    assert_eq!(payment.payment_status, "pending");
    assert!(payment.paid_at.is_none());
    assert_eq!(order(conn, order_id).await.status, "pending");
}

#[tokio::test]
async fn failed_callback_marks_payment_failed() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let (order_id, total) = momo_order(conn).await;
    let redirect = payment_service::create_payment_request(
        conn,
        gateway.clone(),
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();

    let callback = common::signed_callback(&redirect.transaction_id, total, false);
    let outcome = payment_service::apply_webhook(conn, gateway, callback)
        .await
        .unwrap();
    assert_eq!(outcome.value, Applied::Transitioned(PaymentStatus::Failed));
    assert!(outcome.notifications.is_empty());
    assert_eq!(payment_for(conn, order_id).await.payment_status, "failed");
    assert_eq!(order(conn, order_id).await.status, "pending");
}

#[tokio::test]
async fn retrying_payment_reuses_the_single_row() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let (order_id, _) = momo_order(conn).await;
    let first = payment_service::create_payment_request(
        conn,
        gateway.clone(),
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();
    let second = payment_service::create_payment_request(
        conn,
        gateway,
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();

    assert_ne!(first.transaction_id, second.transaction_id);
    let rows: i64 = payments::table
        .filter(payments::order_id.eq(order_id))
        .count()
        .get_result(conn)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(
        payment_for(conn, order_id).await.transaction_id,
        Some(second.transaction_id)
    );
}

#[tokio::test]
async fn amount_must_match_order_total() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let (order_id, total) = momo_order(conn).await;
    let err = payment_service::create_payment_request(
        conn,
        gateway,
        &common::payment_settings(),
        input(order_id, Some(total - 1)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(
        payment_for(conn, order_id).await.transaction_id,
        Some(format!("MOMO_PENDING_{order_id}"))
    );
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let callback = common::signed_callback("FAKE0_missing", 10_000, true);
    let err = payment_service::apply_webhook(&mut conn, gateway, callback)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn verification_applies_gateway_answer() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let paying = Arc::new(FakeGateway::answering(GatewayOutcome::Paid {
        gateway_trans_id: Some("GW-verify".into()),
    }));
    let gateways = Gateways::new(paying.clone(), paying.clone());

    let (order_id, _) = momo_order(conn).await;
    payment_service::create_payment_request(
        conn,
        paying,
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();

    let outcome = payment_service::verify_payment(conn, gateways.clone(), order_id)
        .await
        .unwrap();
    assert!(outcome.value.is_paid);
    assert_eq!(outcome.value.payment.gateway_trans_id.as_deref(), Some("GW-verify"));
    assert!(!outcome.notifications.is_empty());

    let again = payment_service::verify_payment(conn, gateways, order_id)
        .await
        .unwrap();
    assert!(again.value.is_paid);
    assert!(again.notifications.is_empty());
}

#[tokio::test]
async fn unreachable_gateway_leaves_payment_pending() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let down = Arc::new(FakeGateway::unreachable());
    let gateways = Gateways::new(down.clone(), down.clone());

    let (order_id, _) = momo_order(conn).await;
    payment_service::create_payment_request(
        conn,
        down,
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();

    let err = payment_service::verify_payment(conn, gateways, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ServiceUnreachable(_)));
    assert_eq!(payment_for(conn, order_id).await.payment_status, "pending");
}

#[tokio::test]
async fn verification_before_any_attempt_skips_the_gateway() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    // A gateway that has never heard of the order answers "not found".
    let unaware = Arc::new(FakeGateway::answering(GatewayOutcome::Failed {
        code: "42".into(),
        message: "orderId not found".into(),
    }));
    let gateways = Gateways::new(unaware.clone(), unaware);

    let (order_id, _) = momo_order(conn).await;
    let outcome = payment_service::verify_payment(conn, gateways, order_id)
        .await
        .unwrap();

    assert!(!outcome.value.is_paid);
    assert_eq!(outcome.value.payment.payment_status, "pending");
    assert!(outcome.notifications.is_empty());
    let payment = payment_for(conn, order_id).await;
    assert_eq!(payment.payment_status, "pending");
    assert_eq!(payment.transaction_id, Some(format!("MOMO_PENDING_{order_id}")));
}

#[tokio::test]
async fn callback_with_wrong_amount_is_not_applied() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let (order_id, total) = momo_order(conn).await;
    let redirect = payment_service::create_payment_request(
        conn,
        gateway.clone(),
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();

    let callback = common::signed_callback(&redirect.transaction_id, total / 10, true);
    let outcome = payment_service::apply_webhook(conn, gateway, callback)
        .await
        .unwrap();
    assert_eq!(
        outcome.value,
        Applied::AmountMismatch {
            expected: total,
            received: total / 10,
        }
    );
    assert!(outcome.notifications.is_empty());

    let payment = payment_for(conn, order_id).await;
    assert_eq!(payment.payment_status, "pending");
    assert!(payment.paid_at.is_none());
    assert_eq!(order(conn, order_id).await.status, "pending");
}

#[tokio::test]
async fn callback_for_a_replaced_attempt_is_unknown() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let gateway = Arc::new(FakeGateway::answering(GatewayOutcome::Pending));

    let (order_id, total) = momo_order(conn).await;
    let stale = payment_service::create_payment_request(
        conn,
        gateway.clone(),
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();
    payment_service::create_payment_request(
        conn,
        gateway.clone(),
        &common::payment_settings(),
        input(order_id, None),
    )
    .await
    .unwrap();

    let callback = common::signed_callback(&stale.transaction_id, total, true);
    let err = payment_service::apply_webhook(conn, gateway, callback)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(payment_for(conn, order_id).await.payment_status, "pending");
}
