//! Notification fan-out.
//!
//! Business operations never talk to a transport directly: they return the
//! notifications they want sent, and the handler hands that batch to a
//! [`NotificationEmitter`] once the database transaction has committed.
//! Emission is best-effort. Failures are logged and the batch is dropped.

pub mod amqp;
pub mod hub;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::SelectableHelper;
use diesel_async::RunQueryDsl;

use crate::{
    db::DbPool,
    models::{CreateNotificationEntity, NotificationEntity},
    schema::notifications,
};

/// Transport that pushes a persisted notification to a user's live connections.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: i32, event: &NotificationEntity) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    OrderTracking,
    InventoryWarning,
    Payment,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderTracking => "order_tracking",
            NotificationKind::InventoryWarning => "inventory_warning",
            NotificationKind::Payment => "payment",
            NotificationKind::System => "system",
        }
    }
}

impl CreateNotificationEntity {
    pub fn new(
        user_id: i32,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            sender_id: None,
            kind: kind.as_str().to_string(),
            title: title.into(),
            message: message.into(),
            order_id: None,
            product_id: None,
        }
    }

    pub fn from_sender(mut self, sender_id: i32) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn for_order(mut self, order_id: i32) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn for_product(mut self, product_id: i32) -> Self {
        self.product_id = Some(product_id);
        self
    }
}

/// Persists and pushes notification batches after commit.
#[derive(Clone)]
pub struct NotificationEmitter {
    db_pool: DbPool,
    notifier: Arc<dyn Notifier>,
}

impl NotificationEmitter {
    pub fn new(db_pool: DbPool, notifier: Arc<dyn Notifier>) -> Self {
        Self { db_pool, notifier }
    }

    /// Fire-and-forget: the caller's response never waits on delivery.
    pub fn emit(&self, batch: Vec<CreateNotificationEntity>) {
        if batch.is_empty() {
            return;
        }
        let emitter = self.clone();
        tokio::spawn(async move { emitter.deliver(batch).await });
    }

    pub async fn deliver(&self, batch: Vec<CreateNotificationEntity>) {
        let stored = match self.persist(batch).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!("Dropping notification batch: {:#}", err);
                return;
            }
        };

        for notification in &stored {
            if let Err(err) = self.notifier.send(notification.user_id, notification).await {
                tracing::warn!(
                    user_id = notification.user_id,
                    "Failed to push notification #{}: {:#}",
                    notification.id,
                    err
                );
            }
        }
    }

    async fn persist(&self, batch: Vec<CreateNotificationEntity>) -> Result<Vec<NotificationEntity>> {
        let conn = &mut self
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        diesel::insert_into(notifications::table)
            .values(batch)
            .returning(NotificationEntity::as_returning())
            .get_results(conn)
            .await
            .context("Failed to store notifications")
    }
}
