use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{
    ExpressionMethods, QueryDsl, SelectableHelper,
    dsl::{count_star, sql},
    sql_types::BigInt,
};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use super::orders::{OrderDetails, load_details};
use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, AdminId},
    models::OrderEntity,
    schema::orders,
    services::shipments::{self, OrderUpdateResult},
    status::OrderStatus,
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

/// Defines routes with OpenAPI specs. Every route requires the admin role.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/admin/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(list_orders))
            .routes(utoipa_axum::routes!(order_statistics))
            .routes(utoipa_axum::routes!(cancel_order))
            .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
    )
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
}

#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct CancelOrderReq {
    pub reason: Option<String>,
}

/// All orders, newest first, optionally filtered by status.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Admin"],
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "List orders", body = StdResponse<Vec<OrderDetails>, String>),
        (status = 403, description = "Caller is not an admin")
    )
)]
async fn list_orders(
    Query(query): Query<ListOrdersQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let mut select = orders::table
        .order_by(orders::created_at.desc())
        .limit(limit)
        .select(OrderEntity::as_select())
        .into_boxed();
    if let Some(status) = query.status {
        select = select.filter(orders::status.eq(status.as_str()));
    }

    let orders: Vec<OrderEntity> = select
        .load(conn)
        .await
        .context("Failed to get orders")?;

    Ok(StdResponse {
        data: Some(load_details(conn, orders).await?),
        message: Some("Get orders successfully"),
    })
}

#[derive(Serialize, Debug, Default, PartialEq, Eq, ToSchema)]
pub struct OrderStatistics {
    pub total_orders: i64,
    pub success_orders: i64,
    pub cancelled_orders: i64,
    /// Sum of delivered and received orders.
    pub revenue: i64,
}

impl OrderStatistics {
    /// Folds `(status, order count, amount sum)` groups.
    pub fn from_groups(groups: &[(String, i64, i64)]) -> Self {
        groups
            .iter()
            .fold(Self::default(), |mut stats, (status, count, amount)| {
                stats.total_orders += count;
                match status.parse::<OrderStatus>() {
                    Ok(OrderStatus::Delivered | OrderStatus::Received) => {
                        stats.success_orders += count;
                        stats.revenue += amount;
                    }
                    Ok(OrderStatus::Cancelled) => stats.cancelled_orders += count,
                    _ => {}
                }
                stats
            })
    }
}

/// Marketplace-wide order counters.
#[utoipa::path(
    get,
    path = "/statistics",
    tags = ["Admin"],
    responses(
        (status = 200, description = "Order statistics", body = StdResponse<OrderStatistics, String>),
        (status = 403, description = "Caller is not an admin")
    )
)]
async fn order_statistics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let groups: Vec<(String, i64, i64)> = orders::table
        .group_by(orders::status)
        .select((
            orders::status,
            count_star(),
            sql::<BigInt>("COALESCE(SUM(total_amount), 0)::BIGINT"),
        ))
        .load(conn)
        .await
        .context("Failed to aggregate orders")?;

    Ok(StdResponse {
        data: Some(OrderStatistics::from_groups(&groups)),
        message: Some("Get statistics successfully"),
    })
}

/// Cancel every open line of an order.
#[utoipa::path(
    put,
    path = "/{order_id}/cancel",
    tags = ["Admin"],
    params(
        ("order_id" = i32, Path, description = "Order ID")
    ),
    request_body = CancelOrderReq,
    responses(
        (status = 200, description = "Order cancelled", body = StdResponse<OrderUpdateResult, String>),
        (status = 403, description = "Caller is not an admin"),
        (status = 409, description = "Order is already final")
    )
)]
async fn cancel_order(
    Path(order_id): Path<i32>,
    State(state): State<AppState>,
    Extension(AdminId(admin_id)): Extension<AdminId>,
    body: Option<Json<CancelOrderReq>>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let reason = body.and_then(|Json(req)| req.reason);
    let outcome = shipments::cancel_order_by_admin(conn, order_id, admin_id, reason).await?;
    state.emitter.emit(outcome.notifications);

    Ok(StdResponse {
        data: Some(outcome.value),
        message: Some("Order cancelled"),
    })
}
