//! Payment reconciliation: gateway payment creation, signed callbacks and
//! active status checks all converge on [`apply_outcome`].
//!
//! A payment only ever leaves `pending` once. Webhook replays and repeated
//! verification calls find the row terminal and return without side effects.

use std::sync::Arc;

use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Outcome, checkout::is_placeholder_transaction_id};
use crate::{
    api::{
        CallbackReply, GatewayOutcome, Gateways, PaymentGateway, PaymentLink, PaymentRequest,
        RawCallback, StatusQuery,
    },
    app_error::AppError,
    config::PaymentSettings,
    models::{CreateNotificationEntity, CreatePaymentEntity, OrderEntity, PaymentEntity},
    notifications::NotificationKind,
    schema::{orders, payments},
    status::{OrderStatus, PaymentMethod, PaymentStatus},
};

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct CreatePaymentInput {
    pub order_id: i32,
    /// Optional; must equal the order total when given.
    pub amount: Option<i64>,
    #[serde(skip)]
    pub client_ip: Option<String>,
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct PaymentRedirect {
    pub order_id: i32,
    pub provider: PaymentMethod,
    pub amount: i64,
    pub transaction_id: String,
    #[serde(flatten)]
    pub link: PaymentLink,
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct PaymentStatusView {
    pub payment: PaymentEntity,
    pub order_status: OrderStatus,
    pub is_paid: bool,
}

/// What happened to the payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The row moved from pending to this status.
    Transitioned(PaymentStatus),
    /// The gateway still reports the payment as in progress.
    StillPending,
    /// The row was already terminal; nothing was written.
    AlreadyFinal(PaymentStatus),
    /// The callback amount differs from the stored payment; nothing was written.
    AmountMismatch { expected: i64, received: i64 },
}

impl Applied {
    pub fn reply(&self) -> CallbackReply {
        match self {
            Applied::AlreadyFinal(_) => CallbackReply::Duplicate,
            Applied::AmountMismatch { .. } => CallbackReply::AmountMismatch,
            Applied::Transitioned(_) | Applied::StillPending => CallbackReply::Applied,
        }
    }
}

pub fn validate_amount(settings: &PaymentSettings, amount: i64) -> Result<(), AppError> {
    if amount < settings.min_amount || amount > settings.max_amount {
        return Err(AppError::BadRequest(format!(
            "Amount {amount} is outside the accepted range {} - {}",
            settings.min_amount, settings.max_amount
        )));
    }
    Ok(())
}

/// Every payment path locks the order row before the payment row.
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

/// Registers a fresh pending attempt, then asks the gateway for a payment link.
///
/// The pending row is committed before the gateway is called so a callback
/// for the new correlation id can always be matched. When the gateway call
/// fails the row simply stays pending.
pub async fn create_payment_request(
    conn: &mut AsyncPgConnection,
    gateway: Arc<dyn PaymentGateway>,
    settings: &PaymentSettings,
    input: CreatePaymentInput,
) -> Result<PaymentRedirect, AppError> {
    let settings = settings.clone();
    let attempt_gateway = gateway.clone();
    let order_id = input.order_id;

    let (payment, order) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order = lock_order(conn, order_id).await?;
                if order.status()? == OrderStatus::Cancelled {
                    return Err(AppError::BadRequest(format!(
                        "Order #{order_id} was cancelled and cannot be paid"
                    )));
                }

                let existing: Option<PaymentEntity> = payments::table
                    .filter(payments::order_id.eq(order_id))
                    .select(PaymentEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;
                if let Some(existing) = &existing {
                    if existing.status()? == PaymentStatus::Paid {
                        return Err(AppError::BadRequest(format!(
                            "Order #{order_id} is already paid"
                        )));
                    }
                }

                let amount = order.total_amount;
                if let Some(requested) = input.amount {
                    if requested != amount {
                        return Err(AppError::BadRequest(format!(
                            "Amount {requested} does not match the order total {amount}"
                        )));
                    }
                }
                validate_amount(&settings, amount)?;

                let method = attempt_gateway.method();
                let correlation_id = attempt_gateway.new_correlation_id(order_id);
                let now = Utc::now();
                let payment = diesel::insert_into(payments::table)
                    .values(CreatePaymentEntity {
                        order_id,
                        payment_method: method.as_str().to_string(),
                        payment_status: PaymentStatus::Pending.as_str().to_string(),
                        amount,
                        transaction_id: Some(correlation_id.clone()),
                        paid_at: None,
                    })
                    .on_conflict(payments::order_id)
                    .do_update()
                    .set((
                        payments::payment_method.eq(method.as_str()),
                        payments::payment_status.eq(PaymentStatus::Pending.as_str()),
                        payments::amount.eq(amount),
                        payments::transaction_id.eq(&correlation_id),
                        payments::gateway_trans_id.eq(None::<String>),
                        payments::paid_at.eq(None::<chrono::DateTime<Utc>>),
                        payments::updated_at.eq(now),
                    ))
                    .returning(PaymentEntity::as_returning())
                    .get_result(conn)
                    .await?;

                Ok::<(PaymentEntity, OrderEntity), AppError>((payment, order))
            })
        })
        .await?;

    let correlation_id = payment.transaction_id.clone().unwrap_or_default();
    let request = PaymentRequest {
        order_id,
        correlation_id: correlation_id.clone(),
        amount: payment.amount,
        order_info: format!("Thanh toan don hang #{}", order.id),
        client_ip: input.client_ip,
        created_at: payment.updated_at,
    };

    tracing::info!(
        order_id,
        gateway = gateway.name(),
        correlation_id = %correlation_id,
        amount = payment.amount,
        "Requesting payment link"
    );

    let link = gateway.create_payment(&request).await.inspect_err(|err| {
        tracing::warn!(order_id, gateway = gateway.name(), "Payment creation failed: {}", err);
    })?;

    Ok(PaymentRedirect {
        order_id,
        provider: gateway.method(),
        amount: payment.amount,
        transaction_id: correlation_id,
        link,
    })
}

fn payment_notifications(
    order: &OrderEntity,
    gateway_name: &str,
    advanced: bool,
) -> Vec<CreateNotificationEntity> {
    let mut batch = vec![
        CreateNotificationEntity::new(
            order.buyer_id,
            NotificationKind::Payment,
            "Payment successful",
            format!("Order #{} was paid via {gateway_name}", order.id),
        )
        .for_order(order.id),
    ];
    if advanced {
        batch.push(
            CreateNotificationEntity::new(
                order.seller_id,
                NotificationKind::OrderTracking,
                "Order paid",
                format!("Order #{} has been paid, please prepare it for shipping", order.id),
            )
            .from_sender(order.buyer_id)
            .for_order(order.id),
        );
    }
    batch
}

/// Applies a gateway verdict to an order and payment row, both locked by the
/// caller.
pub async fn apply_outcome(
    conn: &mut AsyncPgConnection,
    order: &OrderEntity,
    payment: &PaymentEntity,
    outcome: GatewayOutcome,
    gateway_name: &str,
) -> Result<Outcome<Applied>, AppError> {
    let current = payment.status()?;
    if current.is_terminal() {
        tracing::debug!(order_id = payment.order_id, status = %current, "Payment already final");
        return Ok(Outcome::silent(Applied::AlreadyFinal(current)));
    }

    let now = Utc::now();
    match outcome {
        GatewayOutcome::Pending => Ok(Outcome::silent(Applied::StillPending)),
        GatewayOutcome::Paid { gateway_trans_id } => {
            diesel::update(payments::table.find(payment.id))
                .set((
                    payments::payment_status.eq(PaymentStatus::Paid.as_str()),
                    payments::paid_at.eq(Some(now)),
                    payments::gateway_trans_id.eq(gateway_trans_id),
                    payments::updated_at.eq(now),
                ))
                .execute(conn)
                .await?;

            let advanced = order.status()? == OrderStatus::Pending;
            if advanced {
                diesel::update(orders::table.find(order.id))
                    .set((
                        orders::status.eq(OrderStatus::Processing.as_str()),
                        orders::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;
            }

            tracing::info!(order_id = order.id, gateway = gateway_name, "Payment confirmed");
            Ok(Outcome::new(
                Applied::Transitioned(PaymentStatus::Paid),
                payment_notifications(order, gateway_name, advanced),
            ))
        }
        GatewayOutcome::Failed { code, message } => {
            diesel::update(payments::table.find(payment.id))
                .set((
                    payments::payment_status.eq(PaymentStatus::Failed.as_str()),
                    payments::updated_at.eq(now),
                ))
                .execute(conn)
                .await?;

            tracing::info!(
                order_id = payment.order_id,
                gateway = gateway_name,
                code = %code,
                "Payment failed: {}",
                message
            );
            Ok(Outcome::silent(Applied::Transitioned(PaymentStatus::Failed)))
        }
    }
}

fn unknown_transaction(correlation_id: &str) -> AppError {
    AppError::NotFound(format!("No payment with transaction id {correlation_id}"))
}

/// Handles a signed gateway callback.
///
/// The signature is checked before the database is touched; a forged or
/// tampered callback changes nothing. Neither does a callback whose amount
/// differs from the stored payment.
pub async fn apply_webhook(
    conn: &mut AsyncPgConnection,
    gateway: Arc<dyn PaymentGateway>,
    callback: RawCallback,
) -> Result<Outcome<Applied>, AppError> {
    let verified = gateway.verify_callback(&callback)?;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let correlation_id = verified.correlation_id.as_str();
            let order_id: i32 = payments::table
                .filter(payments::transaction_id.eq(correlation_id))
                .select(payments::order_id)
                .first(conn)
                .await
                .optional()?
                .ok_or_else(|| unknown_transaction(correlation_id))?;

            let order = lock_order(conn, order_id).await?;
            // A retry may have replaced the correlation id while we waited.
            let payment: PaymentEntity = payments::table
                .filter(payments::order_id.eq(order_id))
                .filter(payments::transaction_id.eq(correlation_id))
                .select(PaymentEntity::as_select())
                .for_update()
                .first(conn)
                .await
                .optional()?
                .ok_or_else(|| unknown_transaction(correlation_id))?;

            if let Some(received) = verified.amount {
                if received != payment.amount {
                    tracing::warn!(
                        order_id,
                        expected = payment.amount,
                        received,
                        "Callback amount differs from the stored payment"
                    );
                    return Ok(Outcome::silent(Applied::AmountMismatch {
                        expected: payment.amount,
                        received,
                    }));
                }
            }

            apply_outcome(conn, &order, &payment, verified.outcome, gateway.name()).await
        })
    })
    .await
}

/// Actively asks the gateway about a pending payment.
///
/// Terminal payments, and gateway payments that never got past checkout, are
/// returned as-is without a gateway call. When the gateway cannot be reached
/// the transaction rolls back and nothing changes.
pub async fn verify_payment(
    conn: &mut AsyncPgConnection,
    gateways: Gateways,
    order_id: i32,
) -> Result<Outcome<PaymentStatusView>, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            let payment: PaymentEntity = payments::table
                .filter(payments::order_id.eq(order_id))
                .select(PaymentEntity::as_select())
                .for_update()
                .first(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::NotFound(format!("No payment recorded for order #{order_id}"))
                })?;

            let method = payment.method()?;
            let mut notifications = Vec::new();
            if !payment.status()?.is_terminal() && method.is_gateway() {
                let sent = payment
                    .transaction_id
                    .clone()
                    .filter(|tx| !is_placeholder_transaction_id(method, order_id, tx));
                match sent {
                    None => {
                        tracing::debug!(order_id, "Payment not sent to a gateway yet");
                    }
                    Some(correlation_id) => {
                        let gateway = gateways.get(method)?;
                        let outcome = gateway
                            .query_status(&StatusQuery {
                                order_id,
                                correlation_id,
                                amount: payment.amount,
                                created_at: payment.updated_at,
                            })
                            .await?;
                        notifications =
                            apply_outcome(conn, &order, &payment, outcome, gateway.name())
                                .await?
                                .notifications;
                    }
                }
            }

            let view = load_status(conn, order_id).await?;
            Ok::<Outcome<PaymentStatusView>, AppError>(Outcome::new(view, notifications))
        })
    })
    .await
}

async fn load_status(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<PaymentStatusView, AppError> {
    let (payment, order): (PaymentEntity, OrderEntity) = payments::table
        .inner_join(orders::table)
        .filter(payments::order_id.eq(order_id))
        .select((PaymentEntity::as_select(), OrderEntity::as_select()))
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("No payment recorded for order #{order_id}")))?;

    Ok(PaymentStatusView {
        is_paid: payment.status()? == PaymentStatus::Paid,
        order_status: order.status()?,
        payment,
    })
}

/// Local view of a payment; never calls a gateway.
pub async fn payment_status(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<PaymentStatusView, AppError> {
    load_status(conn, order_id).await
}
