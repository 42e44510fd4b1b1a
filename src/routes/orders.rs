use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{OrderEntity, OrderItemEntity, PaymentEntity, ShippingInfoEntity},
    schema::{order_items, orders, payments, shipping_info},
    services::{
        checkout::{self, CheckoutRequest, CheckoutResponse},
        shipments::{self, LineUpdateResult, OrderUpdateResult, SellerLineUpdate},
    },
    status::ShippingStatus,
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_orders))
            .routes(utoipa_axum::routes!(update_order_status))
            .routes(utoipa_axum::routes!(update_line_status))
            .routes(utoipa_axum::routes!(get_buyer_orders))
            .routes(utoipa_axum::routes!(get_seller_orders))
            .routes(utoipa_axum::routes!(get_order_details)),
    )
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OrderLine {
    #[serde(flatten)]
    pub item: OrderItemEntity,
    pub shipping: Option<ShippingInfoEntity>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OrderDetails {
    pub order: OrderEntity,
    pub items: Vec<OrderLine>,
    pub payment: Option<PaymentEntity>,
}

/// Attaches items, shipping lines and payments to a page of orders.
pub(crate) async fn load_details(
    conn: &mut AsyncPgConnection,
    orders: Vec<OrderEntity>,
) -> Result<Vec<OrderDetails>, AppError> {
    let order_ids: Vec<i32> = orders.iter().map(|o| o.id).collect();

    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .order_by(order_items::id.asc())
        .select(OrderItemEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get order items")?;

    let shipping: Vec<ShippingInfoEntity> = shipping_info::table
        .filter(shipping_info::order_id.eq_any(&order_ids))
        .select(ShippingInfoEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get shipping lines")?;

    let payments: Vec<PaymentEntity> = payments::table
        .filter(payments::order_id.eq_any(&order_ids))
        .select(PaymentEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get payments")?;

    let mut shipping_by_line: HashMap<(i32, i32), ShippingInfoEntity> = shipping
        .into_iter()
        .map(|s| ((s.order_id, s.product_id), s))
        .collect();
    let mut payment_by_order: HashMap<i32, PaymentEntity> =
        payments.into_iter().map(|p| (p.order_id, p)).collect();
    let mut items_by_order: HashMap<i32, Vec<OrderLine>> = HashMap::new();
    for item in items {
        let shipping = shipping_by_line.remove(&(item.order_id, item.product_id));
        items_by_order
            .entry(item.order_id)
            .or_default()
            .push(OrderLine { item, shipping });
    }

    Ok(orders
        .into_iter()
        .map(|order| OrderDetails {
            items: items_by_order.remove(&order.id).unwrap_or_default(),
            payment: payment_by_order.remove(&order.id),
            order,
        })
        .collect())
}

/// Check out the buyer's cart, creating one order per seller.
#[utoipa::path(
    post,
    path = "/{id}",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Buyer whose cart is checked out")
    ),
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Orders created", body = StdResponse<CheckoutResponse, String>),
        (status = 400, description = "Empty cart, bad address or insufficient stock")
    )
)]
async fn create_orders(
    Path(buyer_id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let method = body.method();
    let outcome = checkout::create_orders(conn, &state.config.checkout, buyer_id, body).await?;
    state.emitter.emit(outcome.notifications);

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(CheckoutResponse::new(method, outcome.value)),
            message: Some("Orders created successfully"),
        },
    ))
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct BuyerStatusReq {
    pub buyer_id: i32,
    pub status: ShippingStatus,
}

/// Buyer confirms receipt of, or cancels, a whole order.
#[utoipa::path(
    put,
    path = "/{id}/status",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID")
    ),
    request_body = BuyerStatusReq,
    responses(
        (status = 200, description = "Order updated", body = StdResponse<OrderUpdateResult, String>),
        (status = 403, description = "Order belongs to another buyer"),
        (status = 409, description = "Order is already final")
    )
)]
async fn update_order_status(
    Path(order_id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<BuyerStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let outcome =
        shipments::update_order_status_by_buyer(conn, order_id, body.buyer_id, body.status).await?;
    state.emitter.emit(outcome.notifications);

    Ok(StdResponse {
        data: Some(outcome.value),
        message: Some("Order status updated"),
    })
}

/// Seller advances the shipping status of one product line.
#[utoipa::path(
    put,
    path = "/{id}/product/{product_id}/status",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID"),
        ("product_id" = i32, Path, description = "Product line to update")
    ),
    request_body = SellerLineUpdate,
    responses(
        (status = 200, description = "Line updated", body = StdResponse<LineUpdateResult, String>),
        (status = 403, description = "Seller does not own the product"),
        (status = 409, description = "Transition not allowed")
    )
)]
async fn update_line_status(
    Path((order_id, product_id)): Path<(i32, i32)>,
    State(state): State<AppState>,
    Json(body): Json<SellerLineUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let outcome = shipments::update_line_status(conn, order_id, product_id, body).await?;
    state.emitter.emit(outcome.notifications);

    let message = if outcome.value.changed {
        "Shipping status updated"
    } else {
        "Shipping status unchanged"
    };
    Ok(StdResponse {
        data: Some(outcome.value),
        message: Some(message),
    })
}

/// Orders placed by a buyer, newest first.
#[utoipa::path(
    get,
    path = "/buyer/{buyer_id}",
    tags = ["Orders"],
    params(
        ("buyer_id" = i32, Path, description = "Buyer ID")
    ),
    responses(
        (status = 200, description = "List buyer orders", body = StdResponse<Vec<OrderDetails>, String>)
    )
)]
async fn get_buyer_orders(
    Path(buyer_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders: Vec<OrderEntity> = orders::table
        .filter(orders::buyer_id.eq(buyer_id))
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get buyer orders")?;

    Ok(StdResponse {
        data: Some(load_details(conn, orders).await?),
        message: Some("Get orders successfully"),
    })
}

/// Orders a seller has to fulfil, newest first.
#[utoipa::path(
    get,
    path = "/seller/{seller_id}",
    tags = ["Orders"],
    params(
        ("seller_id" = i32, Path, description = "Seller ID")
    ),
    responses(
        (status = 200, description = "List seller orders", body = StdResponse<Vec<OrderDetails>, String>)
    )
)]
async fn get_seller_orders(
    Path(seller_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders: Vec<OrderEntity> = orders::table
        .filter(orders::seller_id.eq(seller_id))
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get seller orders")?;

    Ok(StdResponse {
        data: Some(load_details(conn, orders).await?),
        message: Some("Get orders successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/detail/{order_id}",
    tags = ["Orders"],
    params(
        ("order_id" = i32, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with items, shipping and payment", body = StdResponse<OrderDetails, String>),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order_details(
    Path(order_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: OrderEntity = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Order #{order_id} not found")))?;

    let details = load_details(conn, vec![order])
        .await?
        .pop()
        .ok_or_else(|| AppError::NotFound(format!("Order #{order_id} not found")))?;

    Ok(StdResponse {
        data: Some(details),
        message: Some("Get order successfully"),
    })
}
