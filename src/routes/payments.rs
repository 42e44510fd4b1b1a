use std::collections::BTreeMap;

use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    api::{CallbackReply, RawCallback},
    app_error::{AppError, StdResponse},
    app_state::AppState,
    services::payments::{self, CreatePaymentInput, PaymentRedirect, PaymentStatusView},
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_payment))
            .routes(utoipa_axum::routes!(provider_callback, provider_callback_get))
            .routes(utoipa_axum::routes!(verify_payment))
            .routes(utoipa_axum::routes!(get_payment_status))
            .routes(utoipa_axum::routes!(check_payment_status)),
    )
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct OrderRef {
    pub order_id: i32,
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Start a gateway payment for an order.
#[utoipa::path(
    post,
    path = "/{provider}/create-payment",
    tags = ["Payments"],
    params(
        ("provider" = String, Path, description = "momo or vnpay")
    ),
    request_body = CreatePaymentInput,
    responses(
        (status = 200, description = "Payment link created", body = StdResponse<PaymentRedirect, String>),
        (status = 400, description = "Invalid amount, cancelled order or gateway rejection"),
        (status = 502, description = "Gateway unreachable")
    )
)]
async fn create_payment(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut body): Json<CreatePaymentInput>,
) -> Result<impl IntoResponse, AppError> {
    let gateway = state.gateways.by_name(&provider)?;
    body.client_ip = client_ip(&headers);

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let redirect =
        payments::create_payment_request(conn, gateway, &state.config.payments, body).await?;

    Ok(StdResponse {
        data: Some(redirect),
        message: Some("Payment created"),
    })
}

async fn handle_callback(
    state: AppState,
    provider: String,
    callback: RawCallback,
) -> Result<Response, AppError> {
    let gateway = state.gateways.by_name(&provider)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let reply = match payments::apply_webhook(conn, gateway.clone(), callback).await {
        Ok(outcome) => {
            state.emitter.emit(outcome.notifications);
            outcome.value.reply()
        }
        Err(AppError::InvalidSignature(_)) => CallbackReply::InvalidSignature,
        Err(AppError::NotFound(message)) => {
            tracing::warn!(provider = %provider, "Callback rejected: {}", message);
            CallbackReply::UnknownTransaction
        }
        Err(err) => return Err(err),
    };

    let (status, body) = gateway.reply(reply);
    Ok((status, Json(body)).into_response())
}

/// Gateway server-to-server notification (MoMo posts JSON).
#[utoipa::path(
    post,
    path = "/{provider}/callback",
    tags = ["Payments"],
    params(
        ("provider" = String, Path, description = "momo or vnpay")
    ),
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Callback acknowledged"),
        (status = 400, description = "Amount differs from the stored payment"),
        (status = 403, description = "Invalid signature"),
        (status = 404, description = "Unknown transaction")
    )
)]
async fn provider_callback(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
    body: String,
) -> Result<Response, AppError> {
    handle_callback(
        state,
        provider,
        RawCallback {
            query,
            body: body.into_bytes(),
        },
    )
    .await
}

/// Gateway notification delivered as a GET (VNPay IPN).
#[utoipa::path(
    get,
    path = "/{provider}/callback",
    tags = ["Payments"],
    params(
        ("provider" = String, Path, description = "momo or vnpay")
    ),
    responses(
        (status = 200, description = "Callback acknowledged"),
        (status = 403, description = "Invalid signature"),
        (status = 404, description = "Unknown transaction")
    )
)]
async fn provider_callback_get(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<Response, AppError> {
    handle_callback(
        state,
        provider,
        RawCallback {
            query,
            body: Vec::new(),
        },
    )
    .await
}

/// Ask the gateway about a pending payment and apply its answer.
#[utoipa::path(
    post,
    path = "/verify",
    tags = ["Payments"],
    request_body = OrderRef,
    responses(
        (status = 200, description = "Current payment state", body = StdResponse<PaymentStatusView, String>),
        (status = 404, description = "No payment for the order"),
        (status = 502, description = "Gateway unreachable, nothing changed")
    )
)]
async fn verify_payment(
    State(state): State<AppState>,
    Json(body): Json<OrderRef>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let outcome = payments::verify_payment(conn, state.gateways.clone(), body.order_id).await?;
    state.emitter.emit(outcome.notifications);

    let message = if outcome.value.is_paid {
        "Payment confirmed"
    } else {
        "Payment not completed"
    };
    Ok(StdResponse {
        data: Some(outcome.value),
        message: Some(message),
    })
}

#[utoipa::path(
    get,
    path = "/status/{order_id}",
    tags = ["Payments"],
    params(
        ("order_id" = i32, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Stored payment state", body = StdResponse<PaymentStatusView, String>),
        (status = 404, description = "No payment for the order")
    )
)]
async fn get_payment_status(
    Path(order_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    Ok(StdResponse {
        data: Some(payments::payment_status(conn, order_id).await?),
        message: Some("Get payment status successfully"),
    })
}

/// Polling endpoint for the checkout page; reads local state only.
#[utoipa::path(
    post,
    path = "/check-payment-status",
    tags = ["Payments"],
    request_body = OrderRef,
    responses(
        (status = 200, description = "Stored payment state", body = StdResponse<PaymentStatusView, String>),
        (status = 404, description = "No payment for the order")
    )
)]
async fn check_payment_status(
    State(state): State<AppState>,
    Json(body): Json<OrderRef>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    Ok(StdResponse {
        data: Some(payments::payment_status(conn, body.order_id).await?),
        message: Some("Get payment status successfully"),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn callback_documents_a_raw_json_body() {
        let doc = serde_json::to_value(routes_with_openapi().get_openapi()).unwrap();
        let body = &doc["paths"]["/payments/{provider}/callback"]["post"]["requestBody"];
        assert!(body["content"]["application/json"].is_object());
    }
}
