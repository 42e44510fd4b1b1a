use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Standard success envelope used by every JSON route.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T, M> IntoResponse for StdResponse<T, M>
where
    T: Serialize,
    M: Serialize,
{
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ForbiddenResource(String),

    #[error("Cart is empty, nothing to check out")]
    EmptyCart,

    #[error("Product \"{name}\" (#{product_id}) has insufficient stock: {available} left, {requested} requested")]
    InsufficientStock {
        product_id: i32,
        name: String,
        available: i32,
        requested: i32,
    },

    #[error("Product \"{name}\" (#{product_id}) is not available for sale")]
    ProductUnavailable { product_id: i32, name: String },

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Invalid signature from {0}")]
    InvalidSignature(String),

    #[error("Payment rejected by {provider} (code {code}): {message}")]
    PaymentRejected {
        provider: String,
        code: String,
        message: String,
    },

    #[error("{0}")]
    ServiceUnreachable(String),

    #[error("Concurrent update conflict: {0}")]
    Concurrency(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::EmptyCart
            | AppError::InsufficientStock { .. }
            | AppError::ProductUnavailable { .. }
            | AppError::PaymentRejected { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ForbiddenResource(_) | AppError::InvalidSignature(_) => {
                StatusCode::FORBIDDEN
            }
            AppError::InvalidTransition(_) | AppError::Concurrency(_) => StatusCode::CONFLICT,
            AppError::ServiceUnreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::ForbiddenResource(_) => "forbidden",
            AppError::EmptyCart => "empty_cart",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::ProductUnavailable { .. } => "product_unavailable",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::InvalidSignature(_) => "payment_signature_error",
            AppError::PaymentRejected { .. } => "payment_rejected",
            AppError::ServiceUnreachable(_) => "payment_gateway_error",
            AppError::Concurrency(_) => "concurrency_error",
            AppError::Other(_) => "internal_error",
        }
    }
}

impl From<DieselError> for AppError {
    fn from(err: DieselError) -> Self {
        match &err {
            DieselError::NotFound => AppError::NotFound("Record not found".into()),
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
                AppError::Concurrency(info.message().to_string())
            }
            DieselError::DatabaseError(_, info) if is_lock_failure(info.message()) => {
                AppError::Concurrency(info.message().to_string())
            }
            _ => AppError::Other(err.into()),
        }
    }
}

/// Deadlocks (40P01) and lock timeouts (55P03) surface as unknown kinds in diesel.
fn is_lock_failure(message: &str) -> bool {
    message.contains("deadlock detected") || message.contains("could not obtain lock")
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let message = match &self {
            AppError::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(json!({
                "error": self.kind(),
                "message": message,
            })),
        )
            .into_response()
    }
}
