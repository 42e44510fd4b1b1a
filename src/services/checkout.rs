//! Cart checkout: one order per seller, all-or-nothing.

use chrono::Utc;
use diesel::SelectableHelper;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Outcome, cart, inventory};
use crate::{
    app_error::AppError,
    config::CheckoutSettings,
    models::{
        CreateNotificationEntity, CreateOrderEntity, CreateOrderItemEntity, CreatePaymentEntity,
        CreateShippingInfoEntity, OrderEntity,
    },
    notifications::NotificationKind,
    schema::{order_items, orders, payments, shipping_info},
    status::{OrderStatus, PaymentMethod, PaymentStatus, ShippingStatus},
};

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct CheckoutRequest {
    pub shipping_address: String,
    /// Defaults to cash on delivery.
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

impl CheckoutRequest {
    pub fn method(&self) -> PaymentMethod {
        self.payment_method.unwrap_or(PaymentMethod::Cod)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct OrderSummary {
    pub order_id: i32,
    pub seller_id: i32,
    pub total_amount: i64,
    pub item_count: usize,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
}

/// Body of a successful checkout.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct CheckoutResponse {
    pub order_ids: Vec<i32>,
    pub payment_method: PaymentMethod,
    pub orders: Vec<OrderSummary>,
}

impl CheckoutResponse {
    pub fn new(payment_method: PaymentMethod, orders: Vec<OrderSummary>) -> Self {
        Self {
            order_ids: orders.iter().map(|order| order.order_id).collect(),
            payment_method,
            orders,
        }
    }
}

/// Placeholder reference stored until a gateway assigns a real one.
pub fn initial_transaction_id(method: PaymentMethod, order_id: i32, millis: i64) -> String {
    match method {
        PaymentMethod::Cod => format!("COD-{order_id}-{millis}"),
        PaymentMethod::Momo => format!("MOMO_PENDING_{order_id}"),
        PaymentMethod::Vnpay => format!("VNPAY_PENDING_{order_id}"),
    }
}

/// True while a gateway payment still carries the checkout placeholder,
/// i.e. no payment attempt has reached the gateway yet.
pub fn is_placeholder_transaction_id(
    method: PaymentMethod,
    order_id: i32,
    transaction_id: &str,
) -> bool {
    method.is_gateway() && transaction_id == initial_transaction_id(method, order_id, 0)
}

/// Cash on delivery counts as settled the moment the order is placed.
pub fn initial_payment_status(method: PaymentMethod) -> PaymentStatus {
    match method {
        PaymentMethod::Cod => PaymentStatus::Paid,
        PaymentMethod::Momo | PaymentMethod::Vnpay => PaymentStatus::Pending,
    }
}

/// Converts the buyer's cart into one order per seller.
///
/// Stock is locked, checked and deducted inside a single transaction; any
/// failure leaves products, orders and the cart exactly as they were.
pub async fn create_orders(
    conn: &mut AsyncPgConnection,
    settings: &CheckoutSettings,
    buyer_id: i32,
    request: CheckoutRequest,
) -> Result<Outcome<Vec<OrderSummary>>, AppError> {
    let shipping_address = request.shipping_address.trim().to_string();
    if shipping_address.is_empty() {
        return Err(AppError::BadRequest("Shipping address is required".into()));
    }
    let method = request.method();
    let settings = settings.clone();

    conn.transaction(move |conn| {
        Box::pin(async move {
            let groups = cart::split_cart_by_seller(conn, buyer_id).await?;
            let product_ids: Vec<i32> = groups.iter().flat_map(|g| g.product_ids()).collect();
            let locked = inventory::lock_products(conn, &product_ids).await?;

            // Validate every line before writing anything.
            for line in groups.iter().flat_map(|g| g.lines.iter()) {
                let product = locked.get(&line.product_id).ok_or_else(|| {
                    AppError::NotFound(format!("Product #{} no longer exists", line.product_id))
                })?;
                inventory::check_available(product, line.quantity)?;
            }

            let mut summaries = Vec::with_capacity(groups.len());
            let mut notifications = Vec::new();
            let now = Utc::now();

            for group in &groups {
                let mut total_amount = 0i64;
                for line in &group.lines {
                    if let Some(product) = locked.get(&line.product_id) {
                        total_amount += product.effective_price() * i64::from(line.quantity);
                    }
                }

                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        buyer_id,
                        seller_id: group.seller_id,
                        total_amount,
                        shipping_address: shipping_address.clone(),
                        status: OrderStatus::Pending.as_str().to_string(),
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await?;

                for line in &group.lines {
                    let Some(product) = locked.get(&line.product_id) else {
                        continue;
                    };

                    diesel::insert_into(order_items::table)
                        .values(CreateOrderItemEntity {
                            order_id: order.id,
                            product_id: product.id,
                            quantity: line.quantity,
                            price_per_item: product.effective_price(),
                            product_name: product.name.clone(),
                            product_image_url: product.image_url.clone(),
                        })
                        .execute(conn)
                        .await?;

                    diesel::insert_into(shipping_info::table)
                        .values(CreateShippingInfoEntity {
                            order_id: order.id,
                            product_id: product.id,
                            shipping_status: ShippingStatus::Pending.as_str().to_string(),
                        })
                        .execute(conn)
                        .await?;

                    let updated = inventory::deduct_stock(conn, product, line.quantity).await?;
                    if updated.quantity <= settings.low_stock_threshold {
                        notifications.push(
                            CreateNotificationEntity::new(
                                group.seller_id,
                                NotificationKind::InventoryWarning,
                                "Low stock",
                                format!(
                                    "\"{}\" has {} left in stock",
                                    updated.name, updated.quantity
                                ),
                            )
                            .for_product(updated.id),
                        );
                    }
                }

                let payment_status = initial_payment_status(method);
                let transaction_id =
                    initial_transaction_id(method, order.id, now.timestamp_millis());
                diesel::insert_into(payments::table)
                    .values(CreatePaymentEntity {
                        order_id: order.id,
                        payment_method: method.as_str().to_string(),
                        payment_status: payment_status.as_str().to_string(),
                        amount: total_amount,
                        transaction_id: Some(transaction_id.clone()),
                        paid_at: (payment_status == PaymentStatus::Paid).then_some(now),
                    })
                    .execute(conn)
                    .await?;

                notifications.push(
                    CreateNotificationEntity::new(
                        group.seller_id,
                        NotificationKind::OrderTracking,
                        "New order",
                        format!(
                            "Order #{} with {} item(s) is waiting for you",
                            order.id,
                            group.lines.len()
                        ),
                    )
                    .from_sender(buyer_id)
                    .for_order(order.id),
                );

                tracing::info!(
                    order_id = order.id,
                    buyer_id,
                    seller_id = group.seller_id,
                    total_amount,
                    "Order created"
                );

                summaries.push(OrderSummary {
                    order_id: order.id,
                    seller_id: group.seller_id,
                    total_amount,
                    item_count: group.lines.len(),
                    payment_method: method,
                    payment_status,
                    transaction_id,
                });
            }

            cart::clear(conn, buyer_id).await?;

            let order_ids = summaries
                .iter()
                .map(|s| format!("#{}", s.order_id))
                .collect::<Vec<_>>()
                .join(", ");
            notifications.push(CreateNotificationEntity::new(
                settings.admin_user_id,
                NotificationKind::System,
                "New orders",
                format!("Buyer #{buyer_id} placed order(s) {order_ids}"),
            ));
            notifications.push(CreateNotificationEntity::new(
                buyer_id,
                NotificationKind::OrderTracking,
                "Order placed",
                format!(
                    "Your order was split into {} order(s): {order_ids}",
                    summaries.len()
                ),
            ));

            Ok::<Outcome<Vec<OrderSummary>>, AppError>(Outcome::new(summaries, notifications))
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cod_is_settled_up_front() {
        assert_eq!(initial_payment_status(PaymentMethod::Cod), PaymentStatus::Paid);
        assert_eq!(initial_payment_status(PaymentMethod::Momo), PaymentStatus::Pending);
        assert_eq!(initial_payment_status(PaymentMethod::Vnpay), PaymentStatus::Pending);
    }

    #[test]
    fn placeholder_transaction_ids() {
        assert_eq!(
            initial_transaction_id(PaymentMethod::Cod, 12, 1_700_000_000_000),
            "COD-12-1700000000000"
        );
        assert_eq!(initial_transaction_id(PaymentMethod::Momo, 12, 0), "MOMO_PENDING_12");
        assert_eq!(initial_transaction_id(PaymentMethod::Vnpay, 12, 0), "VNPAY_PENDING_12");
    }

    #[test]
    fn only_gateway_placeholders_count_as_unsent() {
        assert!(is_placeholder_transaction_id(PaymentMethod::Momo, 12, "MOMO_PENDING_12"));
        assert!(is_placeholder_transaction_id(PaymentMethod::Vnpay, 12, "VNPAY_PENDING_12"));
        assert!(!is_placeholder_transaction_id(PaymentMethod::Momo, 13, "MOMO_PENDING_12"));
        assert!(!is_placeholder_transaction_id(PaymentMethod::Momo, 12, "MOMO12_1700000000000"));
        assert!(!is_placeholder_transaction_id(PaymentMethod::Cod, 12, "COD-12-0"));
    }

    #[test]
    fn checkout_response_lists_order_ids_at_the_top() {
        let summary = |order_id, seller_id| OrderSummary {
            order_id,
            seller_id,
            total_amount: 50_000,
            item_count: 1,
            payment_method: PaymentMethod::Momo,
            payment_status: PaymentStatus::Pending,
            transaction_id: initial_transaction_id(PaymentMethod::Momo, order_id, 0),
        };
        let response = CheckoutResponse::new(PaymentMethod::Momo, vec![summary(7, 2), summary(8, 3)]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["order_ids"], serde_json::json!([7, 8]));
        assert_eq!(json["payment_method"], "momo");
        assert_eq!(json["orders"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn payment_method_defaults_to_cod() {
        let request: CheckoutRequest =
            serde_json::from_str(r#"{"shipping_address":"12 Nguyen Hue, District 1"}"#).unwrap();
        assert_eq!(request.payment_method, None);
        let request: CheckoutRequest =
            serde_json::from_str(r#"{"shipping_address":"x","payment_method":"vnpay"}"#).unwrap();
        assert_eq!(request.payment_method, Some(PaymentMethod::Vnpay));
    }
}
