use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::CartItemEntity,
    services::cart::{self, CartView},
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/carts",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_cart, clear_cart))
            .routes(utoipa_axum::routes!(add_to_cart))
            .routes(utoipa_axum::routes!(update_cart_item))
            .routes(utoipa_axum::routes!(remove_cart_item)),
    )
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CartItemReq {
    pub user_id: i32,
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ClearCartRes {
    pub removed_items: usize,
}

/// Fetch a user's cart with current prices.
#[utoipa::path(
    get,
    path = "/{user_id}",
    tags = ["Carts"],
    params(
        ("user_id" = i32, Path, description = "Cart owner")
    ),
    responses(
        (status = 200, description = "Get cart successfully", body = StdResponse<CartView, String>)
    )
)]
async fn get_cart(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    Ok(StdResponse {
        data: Some(cart::get_cart(conn, user_id).await?),
        message: Some("Get cart successfully"),
    })
}

/// Add units of a product, merging with an existing line.
#[utoipa::path(
    post,
    path = "/add",
    tags = ["Carts"],
    request_body = CartItemReq,
    responses(
        (status = 200, description = "Item added", body = StdResponse<CartItemEntity, String>),
        (status = 400, description = "Not enough stock or product not for sale"),
        (status = 404, description = "Product not found")
    )
)]
async fn add_to_cart(
    State(state): State<AppState>,
    Json(body): Json<CartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item = cart::add_item(conn, body.user_id, body.product_id, body.quantity).await?;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Added to cart"),
    })
}

/// Set the quantity of a cart line; zero removes it.
#[utoipa::path(
    put,
    path = "/update",
    tags = ["Carts"],
    request_body = CartItemReq,
    responses(
        (status = 200, description = "Cart updated", body = StdResponse<CartItemEntity, String>),
        (status = 404, description = "Line not in cart")
    )
)]
async fn update_cart_item(
    State(state): State<AppState>,
    Json(body): Json<CartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item = cart::set_quantity(conn, body.user_id, body.product_id, body.quantity).await?;
    let message = if item.is_some() {
        "Cart updated"
    } else {
        "Item removed from cart"
    };

    Ok(StdResponse {
        data: item,
        message: Some(message),
    })
}

#[utoipa::path(
    delete,
    path = "/{user_id}/{product_id}",
    tags = ["Carts"],
    params(
        ("user_id" = i32, Path, description = "Cart owner"),
        ("product_id" = i32, Path, description = "Product to remove")
    ),
    responses(
        (status = 200, description = "Item removed", body = StdResponse<String, String>),
        (status = 404, description = "Line not in cart")
    )
)]
async fn remove_cart_item(
    Path((user_id, product_id)): Path<(i32, i32)>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    cart::remove_item(conn, user_id, product_id).await?;

    Ok(StdResponse::<(), &str> {
        data: None,
        message: Some("Item removed from cart"),
    })
}

#[utoipa::path(
    delete,
    path = "/{user_id}",
    tags = ["Carts"],
    params(
        ("user_id" = i32, Path, description = "Cart owner")
    ),
    responses(
        (status = 200, description = "Cart cleared", body = StdResponse<ClearCartRes, String>)
    )
)]
async fn clear_cart(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let removed_items = cart::clear(conn, user_id).await?;

    Ok(StdResponse {
        data: Some(ClearCartRes { removed_items }),
        message: Some("Cart cleared"),
    })
}
