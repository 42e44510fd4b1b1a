use anyhow::Context;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{BoolExpressionMethods, ExpressionMethods, JoinOnDsl, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::ShippingInfoEntity,
    schema::{order_items, orders, shipping_info},
    status::OrderStatus,
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/shipping",
        OpenApiRouter::new().routes(utoipa_axum::routes!(get_order_shipping)),
    )
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ShippingLine {
    pub product_name: String,
    pub quantity: i32,
    #[serde(flatten)]
    pub shipping: ShippingInfoEntity,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OrderShipping {
    pub order_id: i32,
    pub order_status: OrderStatus,
    pub lines: Vec<ShippingLine>,
}

/// Per-product shipping progress for one order.
#[utoipa::path(
    get,
    path = "/{order_id}",
    tags = ["Shipping"],
    params(
        ("order_id" = i32, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Shipping lines", body = StdResponse<OrderShipping, String>),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order_shipping(
    Path(order_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let status: String = orders::table
        .find(order_id)
        .select(orders::status)
        .first(conn)
        .await
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                AppError::NotFound(format!("Order #{order_id} not found"))
            }
            other => other.into(),
        })?;

    let rows: Vec<(ShippingInfoEntity, String, i32)> = shipping_info::table
        .inner_join(
            order_items::table.on(order_items::order_id
                .eq(shipping_info::order_id)
                .and(order_items::product_id.eq(shipping_info::product_id))),
        )
        .filter(shipping_info::order_id.eq(order_id))
        .order_by(shipping_info::product_id.asc())
        .select((
            ShippingInfoEntity::as_select(),
            order_items::product_name,
            order_items::quantity,
        ))
        .load(conn)
        .await
        .context("Failed to get shipping lines")?;

    Ok(StdResponse {
        data: Some(OrderShipping {
            order_id,
            order_status: status.parse::<OrderStatus>()?,
            lines: rows
                .into_iter()
                .map(|(shipping, product_name, quantity)| ShippingLine {
                    product_name,
                    quantity,
                    shipping,
                })
                .collect(),
        }),
        message: Some("Get shipping successfully"),
    })
}
