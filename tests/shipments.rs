mod common;

use agrimarket_orderservice::{
    app_error::AppError,
    services::{
        checkout::{self, CheckoutRequest, OrderSummary},
        shipments::{self, SellerLineUpdate},
    },
    status::{OrderStatus, ShippingStatus},
};
use diesel_async::AsyncPgConnection;

const BUYER: i32 = 9_201;
const SELLER: i32 = 701;
const OTHER_SELLER: i32 = 702;

/// One order with two lines from the same seller.
async fn two_line_order(conn: &mut AsyncPgConnection) -> (OrderSummary, i32, i32) {
    let mango = common::product(conn, SELLER, 80_000, None, 10).await;
    let durian = common::product(conn, SELLER, 120_000, None, 10).await;
    common::add_to_cart(conn, BUYER, mango.id, 1).await;
    common::add_to_cart(conn, BUYER, durian.id, 1).await;

    let mut summaries = checkout::create_orders(
        conn,
        &common::checkout_settings(),
        BUYER,
        CheckoutRequest {
            shipping_address: "45 Le Loi, Can Tho".into(),
            payment_method: None,
        },
    )
    .await
    .unwrap()
    .value;
    (summaries.remove(0), mango.id, durian.id)
}

fn update(seller_id: i32, status: ShippingStatus) -> SellerLineUpdate {
    SellerLineUpdate {
        seller_id,
        status,
        shipping_company: None,
        tracking_number: None,
    }
}

#[tokio::test]
async fn order_status_follows_its_lines() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let (order, mango, durian) = two_line_order(conn).await;

    let shipped = shipments::update_line_status(
        conn,
        order.order_id,
        mango,
        SellerLineUpdate {
            shipping_company: Some("GHN".into()),
            tracking_number: Some("GHN123456".into()),
            ..update(SELLER, ShippingStatus::Shipped)
        },
    )
    .await
    .unwrap();
    assert!(shipped.value.changed);
    assert_eq!(shipped.value.order_status, OrderStatus::Shipped);
    assert!(shipped.value.shipping.shipped_at.is_some());
    assert_eq!(shipped.value.shipping.tracking_number.as_deref(), Some("GHN123456"));
    assert_eq!(shipped.notifications.len(), 1);
    assert_eq!(shipped.notifications[0].user_id, BUYER);

    let delivered = shipments::update_line_status(
        conn,
        order.order_id,
        durian,
        update(SELLER, ShippingStatus::Delivered),
    )
    .await
    .unwrap();
    assert_eq!(delivered.value.order_status, OrderStatus::Delivered);

    let received = shipments::update_order_status_by_buyer(
        conn,
        order.order_id,
        BUYER,
        ShippingStatus::Received,
    )
    .await
    .unwrap();
    assert_eq!(received.value.updated_lines, 2);
    assert_eq!(received.value.order.status, "received");
    assert_eq!(received.notifications[0].user_id, SELLER);
}

#[tokio::test]
async fn repeating_a_status_is_a_silent_no_op() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let (order, mango, _) = two_line_order(conn).await;

    shipments::update_line_status(conn, order.order_id, mango, update(SELLER, ShippingStatus::Processing))
        .await
        .unwrap();
    let again = shipments::update_line_status(
        conn,
        order.order_id,
        mango,
        update(SELLER, ShippingStatus::Processing),
    )
    .await
    .unwrap();
    assert!(!again.value.changed);
    assert!(again.notifications.is_empty());
}

#[tokio::test]
async fn seller_cannot_touch_another_sellers_line() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let (order, mango, _) = two_line_order(conn).await;

    let err = shipments::update_line_status(
        conn,
        order.order_id,
        mango,
        update(OTHER_SELLER, ShippingStatus::Shipped),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenResource(_)));
}

#[tokio::test]
async fn lines_never_move_backwards() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let (order, mango, _) = two_line_order(conn).await;

    shipments::update_line_status(conn, order.order_id, mango, update(SELLER, ShippingStatus::Shipped))
        .await
        .unwrap();
    let err = shipments::update_line_status(
        conn,
        order.order_id,
        mango,
        update(SELLER, ShippingStatus::Processing),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

#[tokio::test]
async fn only_the_buyer_may_settle_an_order() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let (order, _, _) = two_line_order(conn).await;

    let err = shipments::update_order_status_by_buyer(
        conn,
        order.order_id,
        BUYER + 1,
        ShippingStatus::Cancelled,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenResource(_)));
}

#[tokio::test]
async fn admin_cancellation_freezes_the_order() {
    let Some(mut conn) = common::connection().await else {
        return;
    };
    let conn = &mut conn;
    let (order, mango, _) = two_line_order(conn).await;

    let cancelled = shipments::cancel_order_by_admin(
        conn,
        order.order_id,
        common::ADMIN_ID,
        Some("Suspected fraud".into()),
    )
    .await
    .unwrap();
    assert_eq!(cancelled.value.order.status, "cancelled");
    assert_eq!(cancelled.notifications.len(), 2);
    assert!(cancelled.notifications[0].message.contains("Suspected fraud"));

    let err = shipments::update_line_status(
        conn,
        order.order_id,
        mango,
        update(SELLER, ShippingStatus::Shipped),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let err = shipments::cancel_order_by_admin(conn, order.order_id, common::ADMIN_ID, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}
