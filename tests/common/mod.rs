//! Shared fixtures for the database-backed tests.
//!
//! Most tests run inside a transaction that is never committed, so tests can
//! share one database. Tests that need two sessions to see each other's rows
//! commit under fresh ids and remove them with [`cleanup`]. Set
//! `TEST_DATABASE_URL` to enable them.
#![allow(dead_code)]

use std::{
    sync::atomic::{AtomicI32, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use agrimarket_orderservice::{
    api::{
        CallbackReply, GatewayOutcome, PaymentGateway, PaymentLink, PaymentRequest, RawCallback,
        StatusQuery, VerifiedCallback,
        signing::{self, HmacSha256},
    },
    app_error::AppError,
    config::{CheckoutSettings, PaymentSettings},
    db,
    models::{CreateProductEntity, ProductEntity},
    schema::{cart_items, orders, products},
    services::cart,
    status::PaymentMethod,
};
use async_trait::async_trait;
use axum::http::StatusCode;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
static MIGRATED: OnceCell<()> = OnceCell::const_new();
static NEXT_ID: AtomicI32 = AtomicI32::new(0);

pub const ADMIN_ID: i32 = 1;
pub const FAKE_SECRET: &str = "integration-test-secret";

/// Opens a connection inside a test transaction, or `None` when no test
/// database is configured.
pub async fn connection() -> Option<AsyncPgConnection> {
    let mut conn = committed_connection().await?;
    conn.begin_test_transaction()
        .await
        .expect("test transaction should start");
    Some(conn)
}

/// Opens a plain connection; everything it writes is committed.
pub async fn committed_connection() -> Option<AsyncPgConnection> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };

    MIGRATED
        .get_or_init(|| async {
            db::run_migrations_blocking(MIGRATIONS, &url)
                .await
                .expect("migrations should apply");
        })
        .await;

    let conn = AsyncPgConnection::establish(&url)
        .await
        .expect("test database should accept connections");
    Some(conn)
}

/// User id no other test run uses, for rows that get committed.
pub fn unique_id() -> i32 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock is past the epoch")
        .as_secs();
    let slot = (seconds % 1_000_000) as i32;
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed) % 1_000;
    100_000_000 + slot * 1_000 + seq
}

/// Deletes committed rows owned by the given users. Order children cascade.
pub async fn cleanup(conn: &mut AsyncPgConnection, sellers: &[i32], buyers: &[i32]) {
    diesel::delete(orders::table.filter(orders::buyer_id.eq_any(buyers.to_vec())))
        .execute(conn)
        .await
        .expect("orders should delete");
    diesel::delete(cart_items::table.filter(cart_items::user_id.eq_any(buyers.to_vec())))
        .execute(conn)
        .await
        .expect("cart lines should delete");
    diesel::delete(products::table.filter(products::seller_id.eq_any(sellers.to_vec())))
        .execute(conn)
        .await
        .expect("products should delete");
}

pub fn checkout_settings() -> CheckoutSettings {
    CheckoutSettings {
        admin_user_id: ADMIN_ID,
        low_stock_threshold: 2,
    }
}

pub fn payment_settings() -> PaymentSettings {
    PaymentSettings {
        min_amount: 1_000,
        max_amount: 50_000_000,
        gateway_timeout: Duration::from_secs(5),
    }
}

pub async fn product(
    conn: &mut AsyncPgConnection,
    seller_id: i32,
    price: i64,
    sale_price: Option<i64>,
    quantity: i32,
) -> ProductEntity {
    diesel::insert_into(products::table)
        .values(CreateProductEntity {
            seller_id,
            name: format!("Product of seller {seller_id}"),
            image_url: None,
            unit: Some("kg".into()),
            price,
            sale_price,
            quantity,
            status: "available".into(),
        })
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await
        .expect("product should insert")
}

pub async fn add_to_cart(conn: &mut AsyncPgConnection, buyer_id: i32, product_id: i32, quantity: i32) {
    cart::add_item(conn, buyer_id, product_id, quantity)
        .await
        .expect("cart line should be accepted");
}

/// Body a [`FakeGateway`] callback carries.
#[derive(Serialize, Deserialize)]
struct FakeCallback {
    correlation_id: String,
    amount: i64,
    paid: bool,
    signature: String,
}

fn callback_payload(correlation_id: &str, amount: i64, paid: bool) -> String {
    format!("{correlation_id}|{amount}|{paid}")
}

/// A callback signed the way [`FakeGateway`] expects.
pub fn signed_callback(correlation_id: &str, amount: i64, paid: bool) -> RawCallback {
    let signature = signing::sign::<HmacSha256>(
        FAKE_SECRET,
        &callback_payload(correlation_id, amount, paid),
    )
    .expect("hmac accepts any key length");
    callback_with_signature(correlation_id, amount, paid, signature)
}

pub fn callback_with_signature(
    correlation_id: &str,
    amount: i64,
    paid: bool,
    signature: String,
) -> RawCallback {
    let body = FakeCallback {
        correlation_id: correlation_id.to_string(),
        amount,
        paid,
        signature,
    };
    RawCallback {
        body: serde_json::to_vec(&body).expect("callback serializes"),
        ..Default::default()
    }
}

/// Gateway double answering status queries with a fixed outcome.
pub struct FakeGateway {
    pub status_answer: Result<GatewayOutcome, String>,
}

impl FakeGateway {
    pub fn answering(outcome: GatewayOutcome) -> Self {
        Self {
            status_answer: Ok(outcome),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            status_answer: Err("connection refused".into()),
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Momo
    }

    fn name(&self) -> &'static str {
        "FakePay"
    }

    fn new_correlation_id(&self, order_id: i32) -> String {
        format!("FAKE{order_id}_{}", uuid::Uuid::new_v4().simple())
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentLink, AppError> {
        Ok(PaymentLink {
            pay_url: Some(format!("https://pay.test/{}", request.correlation_id)),
            ..Default::default()
        })
    }

    async fn query_status(&self, _query: &StatusQuery) -> Result<GatewayOutcome, AppError> {
        self.status_answer
            .clone()
            .map_err(AppError::ServiceUnreachable)
    }

    fn verify_callback(&self, callback: &RawCallback) -> Result<VerifiedCallback, AppError> {
        let body: FakeCallback = serde_json::from_slice(&callback.body)
            .map_err(|err| AppError::BadRequest(err.to_string()))?;
        let payload = callback_payload(&body.correlation_id, body.amount, body.paid);
        if !signing::verify::<HmacSha256>(FAKE_SECRET, &payload, &body.signature)? {
            return Err(AppError::InvalidSignature(self.name().to_string()));
        }

        let outcome = if body.paid {
            GatewayOutcome::Paid {
                gateway_trans_id: Some(format!("GW-{}", body.correlation_id)),
            }
        } else {
            GatewayOutcome::Failed {
                code: "1006".into(),
                message: "Declined by user".into(),
            }
        };
        Ok(VerifiedCallback {
            correlation_id: body.correlation_id,
            amount: Some(body.amount),
            outcome,
        })
    }

    fn reply(&self, reply: CallbackReply) -> (StatusCode, serde_json::Value) {
        match reply {
            CallbackReply::InvalidSignature => {
                (StatusCode::FORBIDDEN, json!({ "error": "Invalid signature" }))
            }
            _ => (StatusCode::OK, json!({ "message": "OK" })),
        }
    }
}
