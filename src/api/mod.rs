//! Outbound payment gateway integrations.
//!
//! Each provider implements [`PaymentGateway`]; the reconciler in
//! `services::payments` only ever talks to the trait, so tests swap in a fake.

pub mod momo;
pub mod signing;
pub mod vnpay;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{app_error::AppError, config::AppConfig, status::PaymentMethod};

/// What we ask a gateway to collect.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: i32,
    /// Our correlation id, echoed back in callbacks and status queries.
    pub correlation_id: String,
    pub amount: i64,
    pub order_info: String,
    pub client_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where the buyer goes to pay.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PaymentLink {
    pub pay_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub deeplink: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StatusQuery {
    pub order_id: i32,
    pub correlation_id: String,
    pub amount: i64,
    /// When the correlation id was minted.
    pub created_at: DateTime<Utc>,
}

/// A gateway's verdict on one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Paid { gateway_trans_id: Option<String> },
    Pending,
    Failed { code: String, message: String },
}

/// Raw inbound callback as received by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct RawCallback {
    pub query: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// A callback whose signature has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCallback {
    pub correlation_id: String,
    pub amount: Option<i64>,
    pub outcome: GatewayOutcome,
}

/// How a callback was handled, rendered in each provider's own dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackReply {
    Applied,
    Duplicate,
    InvalidSignature,
    /// No payment carries the callback's transaction reference.
    UnknownTransaction,
    /// The callback amount differs from the stored payment.
    AmountMismatch,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    fn name(&self) -> &'static str;

    /// Fresh, unique transaction reference for a payment attempt on `order_id`.
    fn new_correlation_id(&self, order_id: i32) -> String;

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentLink, AppError>;

    async fn query_status(&self, query: &StatusQuery) -> Result<GatewayOutcome, AppError>;

    /// Checks the callback signature. Must not touch any state.
    fn verify_callback(&self, callback: &RawCallback) -> Result<VerifiedCallback, AppError>;

    fn reply(&self, reply: CallbackReply) -> (StatusCode, serde_json::Value);
}

/// The configured gateways, addressed by payment method.
#[derive(Clone)]
pub struct Gateways {
    momo: Arc<dyn PaymentGateway>,
    vnpay: Arc<dyn PaymentGateway>,
}

impl Gateways {
    pub fn new(momo: Arc<dyn PaymentGateway>, vnpay: Arc<dyn PaymentGateway>) -> Self {
        Self { momo, vnpay }
    }

    pub fn from_config(config: &AppConfig, client: Client) -> Self {
        Self::new(
            Arc::new(momo::MomoGateway::new(config.momo.clone(), client.clone())),
            Arc::new(vnpay::VnpayGateway::new(config.vnpay.clone(), client)),
        )
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, AppError> {
        match method {
            PaymentMethod::Momo => Ok(self.momo.clone()),
            PaymentMethod::Vnpay => Ok(self.vnpay.clone()),
            PaymentMethod::Cod => Err(AppError::BadRequest(
                "Cash on delivery does not use a payment gateway".into(),
            )),
        }
    }

    /// Resolves the `{provider}` path segment.
    pub fn by_name(&self, provider: &str) -> Result<Arc<dyn PaymentGateway>, AppError> {
        let method: PaymentMethod = provider
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| AppError::NotFound(format!("Unknown payment provider '{provider}'")))?;
        self.get(method)
    }
}

/// Maps a transport failure onto the gateway error the API reports.
pub(crate) fn unreachable(name: &str, err: reqwest::Error) -> AppError {
    let reason = if err.is_timeout() {
        "timed out".to_string()
    } else {
        err.to_string()
    };
    tracing::warn!(gateway = name, "Gateway call failed: {}", reason);
    AppError::ServiceUnreachable(format!("{name} is unreachable: {reason}"))
}
