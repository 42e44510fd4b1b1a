//! Per-line shipping updates and the order status they roll up into.

use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Outcome;
use crate::{
    app_error::AppError,
    models::{CreateNotificationEntity, OrderEntity, ShippingInfoEntity},
    notifications::NotificationKind,
    schema::{order_items, orders, products, shipping_info},
    status::{Actor, OrderStatus, ShippingStatus},
};

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct SellerLineUpdate {
    pub seller_id: i32,
    pub status: ShippingStatus,
    pub shipping_company: Option<String>,
    pub tracking_number: Option<String>,
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct LineUpdateResult {
    pub shipping: ShippingInfoEntity,
    pub order_status: OrderStatus,
    pub changed: bool,
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct OrderUpdateResult {
    pub order: OrderEntity,
    pub updated_lines: usize,
}

/// Timestamps stamped the first time a line reaches shipped or delivered.
pub fn milestone_timestamps(
    status: ShippingStatus,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let shipped_at = match status {
        ShippingStatus::Shipped | ShippingStatus::Delivered => shipped_at.or(Some(now)),
        _ => shipped_at,
    };
    let delivered_at = match status {
        ShippingStatus::Delivered => delivered_at.or(Some(now)),
        _ => delivered_at,
    };
    (shipped_at, delivered_at)
}

fn seller_message(order_id: i32, product_name: &str, status: ShippingStatus) -> String {
    match status {
        ShippingStatus::Processing => {
            format!("\"{product_name}\" in order #{order_id} is being prepared")
        }
        ShippingStatus::Shipped => format!("\"{product_name}\" in order #{order_id} has shipped"),
        ShippingStatus::Delivered => {
            format!("\"{product_name}\" in order #{order_id} was delivered, please confirm receipt")
        }
        other => format!("\"{product_name}\" in order #{order_id} is now {other}"),
    }
}

async fn lock_order(conn: &mut AsyncPgConnection, order_id: i32) -> Result<OrderEntity, AppError> {
    orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Order #{order_id} not found")))
}

/// Re-derives the order status from its lines and stores it.
pub async fn recompute_order_status(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<OrderEntity, AppError> {
    let raw: Vec<String> = shipping_info::table
        .filter(shipping_info::order_id.eq(order_id))
        .select(shipping_info::shipping_status)
        .load(conn)
        .await?;
    let lines = raw
        .iter()
        .map(|s| s.parse::<ShippingStatus>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| AppError::Other(anyhow::anyhow!("Order #{order_id}: {err}")))?;

    let status = OrderStatus::derive(&lines);
    let order = diesel::update(orders::table.find(order_id))
        .set((
            orders::status.eq(status.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .returning(OrderEntity::as_returning())
        .get_result(conn)
        .await?;

    Ok(order)
}

/// A seller advances one line of an order they sell into.
pub async fn update_line_status(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    product_id: i32,
    update: SellerLineUpdate,
) -> Result<Outcome<LineUpdateResult>, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;

            let product_name: String = order_items::table
                .filter(order_items::order_id.eq(order_id))
                .filter(order_items::product_id.eq(product_id))
                .select(order_items::product_name)
                .first(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "Product #{product_id} is not part of order #{order_id}"
                    ))
                })?;

            let owner: i32 = products::table
                .find(product_id)
                .select(products::seller_id)
                .first(conn)
                .await
                .optional()?
                .unwrap_or(order.seller_id);
            if owner != update.seller_id {
                return Err(AppError::ForbiddenResource(format!(
                    "Seller #{} does not sell product #{product_id}",
                    update.seller_id
                )));
            }

            let existing: Option<ShippingInfoEntity> = shipping_info::table
                .filter(shipping_info::order_id.eq(order_id))
                .filter(shipping_info::product_id.eq(product_id))
                .select(ShippingInfoEntity::as_select())
                .for_update()
                .first(conn)
                .await
                .optional()?;

            let current = match &existing {
                Some(line) => line.status()?,
                None => ShippingStatus::Pending,
            };
            let changed = current.check_transition(update.status, Actor::Seller)?;

            let now = Utc::now();
            let (shipped_at, delivered_at) = milestone_timestamps(
                update.status,
                existing.as_ref().and_then(|l| l.shipped_at),
                existing.as_ref().and_then(|l| l.delivered_at),
                now,
            );
            let shipping_company = update
                .shipping_company
                .clone()
                .or_else(|| existing.as_ref().and_then(|l| l.shipping_company.clone()));
            let tracking_number = update
                .tracking_number
                .clone()
                .or_else(|| existing.as_ref().and_then(|l| l.tracking_number.clone()));

            let shipping = diesel::insert_into(shipping_info::table)
                .values((
                    shipping_info::order_id.eq(order_id),
                    shipping_info::product_id.eq(product_id),
                    shipping_info::shipping_status.eq(update.status.as_str()),
                    shipping_info::shipping_company.eq(&shipping_company),
                    shipping_info::tracking_number.eq(&tracking_number),
                    shipping_info::shipped_at.eq(shipped_at),
                    shipping_info::delivered_at.eq(delivered_at),
                    shipping_info::updated_at.eq(now),
                ))
                .on_conflict((shipping_info::order_id, shipping_info::product_id))
                .do_update()
                .set((
                    shipping_info::shipping_status.eq(update.status.as_str()),
                    shipping_info::shipping_company.eq(&shipping_company),
                    shipping_info::tracking_number.eq(&tracking_number),
                    shipping_info::shipped_at.eq(shipped_at),
                    shipping_info::delivered_at.eq(delivered_at),
                    shipping_info::updated_at.eq(now),
                ))
                .returning(ShippingInfoEntity::as_returning())
                .get_result(conn)
                .await?;

            let order = recompute_order_status(conn, order_id).await?;
            let order_status = order.status()?;

            let mut notifications = Vec::new();
            if changed {
                tracing::info!(
                    order_id,
                    product_id,
                    from = %current,
                    to = %update.status,
                    "Shipping line advanced"
                );
                notifications.push(
                    CreateNotificationEntity::new(
                        order.buyer_id,
                        NotificationKind::OrderTracking,
                        "Shipping update",
                        seller_message(order_id, &product_name, update.status),
                    )
                    .from_sender(update.seller_id)
                    .for_order(order_id)
                    .for_product(product_id),
                );
            }

            Ok::<Outcome<LineUpdateResult>, AppError>(Outcome::new(
                LineUpdateResult {
                    shipping,
                    order_status,
                    changed,
                },
                notifications,
            ))
        })
    })
    .await
}

/// Moves every still-open line of an order to `status`.
async fn settle_open_lines(
    conn: &mut AsyncPgConnection,
    order: &OrderEntity,
    status: ShippingStatus,
    actor: Actor,
) -> Result<(OrderEntity, usize), AppError> {
    if order.status()?.is_terminal() {
        return Err(AppError::InvalidTransition(format!(
            "Order #{} is already {}",
            order.id, order.status
        )));
    }

    let lines: Vec<ShippingInfoEntity> = shipping_info::table
        .filter(shipping_info::order_id.eq(order.id))
        .select(ShippingInfoEntity::as_select())
        .for_update()
        .load(conn)
        .await?;

    for line in &lines {
        let current = line.status()?;
        if !current.is_terminal() {
            current.check_transition(status, actor)?;
        }
    }

    let terminal: Vec<&str> = ShippingStatus::ALL
        .iter()
        .filter(|s| s.is_terminal())
        .map(|s| s.as_str())
        .collect();
    let updated = diesel::update(
        shipping_info::table
            .filter(shipping_info::order_id.eq(order.id))
            .filter(shipping_info::shipping_status.ne_all(terminal)),
    )
    .set((
        shipping_info::shipping_status.eq(status.as_str()),
        shipping_info::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;

    let order = recompute_order_status(conn, order.id).await?;
    Ok((order, updated))
}

fn require_buyer_status(status: ShippingStatus) -> Result<(), AppError> {
    match status {
        ShippingStatus::Received | ShippingStatus::Cancelled => Ok(()),
        other => Err(AppError::BadRequest(format!(
            "Buyers may only mark an order received or cancelled, not {other}"
        ))),
    }
}

/// The buyer confirms receipt of, or cancels, a whole order.
pub async fn update_order_status_by_buyer(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    buyer_id: i32,
    status: ShippingStatus,
) -> Result<Outcome<OrderUpdateResult>, AppError> {
    require_buyer_status(status)?;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            if order.buyer_id != buyer_id {
                return Err(AppError::ForbiddenResource(format!(
                    "Order #{order_id} does not belong to buyer #{buyer_id}"
                )));
            }

            let (order, updated_lines) =
                settle_open_lines(conn, &order, status, Actor::Buyer).await?;

            let message = match status {
                ShippingStatus::Received => format!("The buyer confirmed receipt of order #{order_id}"),
                _ => format!("The buyer cancelled order #{order_id}"),
            };
            tracing::info!(order_id, buyer_id, status = %status, "Buyer updated order");

            let notification = CreateNotificationEntity::new(
                order.seller_id,
                NotificationKind::OrderTracking,
                "Order update",
                message,
            )
            .from_sender(buyer_id)
            .for_order(order_id);

            Ok::<Outcome<OrderUpdateResult>, AppError>(Outcome::new(
                OrderUpdateResult {
                    order,
                    updated_lines,
                },
                vec![notification],
            ))
        })
    })
    .await
}

/// Administrative cancellation; both parties are told.
pub async fn cancel_order_by_admin(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    admin_id: i32,
    reason: Option<String>,
) -> Result<Outcome<OrderUpdateResult>, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            let (order, updated_lines) =
                settle_open_lines(conn, &order, ShippingStatus::Cancelled, Actor::Admin).await?;

            let message = match reason.as_deref().map(str::trim) {
                Some(reason) if !reason.is_empty() => {
                    format!("Order #{order_id} was cancelled by an administrator: {reason}")
                }
                _ => format!("Order #{order_id} was cancelled by an administrator"),
            };
            tracing::info!(order_id, admin_id, "Admin cancelled order");

            let notifications = [order.buyer_id, order.seller_id]
                .into_iter()
                .map(|user_id| {
                    CreateNotificationEntity::new(
                        user_id,
                        NotificationKind::System,
                        "Order cancelled",
                        message.clone(),
                    )
                    .from_sender(admin_id)
                    .for_order(order_id)
                })
                .collect();

            Ok::<Outcome<OrderUpdateResult>, AppError>(Outcome::new(
                OrderUpdateResult {
                    order,
                    updated_lines,
                },
                notifications,
            ))
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn shipped_at_is_set_once() {
        let first = Utc::now() - Duration::days(2);
        let now = Utc::now();
        assert_eq!(
            milestone_timestamps(ShippingStatus::Shipped, None, None, now),
            (Some(now), None)
        );
        assert_eq!(
            milestone_timestamps(ShippingStatus::Delivered, Some(first), None, now),
            (Some(first), Some(now))
        );
    }

    #[test]
    fn processing_stamps_nothing() {
        let now = Utc::now();
        assert_eq!(
            milestone_timestamps(ShippingStatus::Processing, None, None, now),
            (None, None)
        );
    }

    #[test]
    fn buyer_statuses_are_restricted() {
        assert!(require_buyer_status(ShippingStatus::Received).is_ok());
        assert!(require_buyer_status(ShippingStatus::Cancelled).is_ok());
        assert!(matches!(
            require_buyer_status(ShippingStatus::Shipped),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn messages_name_the_product() {
        let text = seller_message(5, "Ca Mau crab", ShippingStatus::Shipped);
        assert!(text.contains("Ca Mau crab"));
        assert!(text.contains("#5"));
    }
}
