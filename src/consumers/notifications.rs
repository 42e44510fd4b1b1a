use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
};
use tracing::debug;

use crate::notifications::{amqp::NotificationEnvelope, hub::NotificationHub};

/// Forwards a notification published by any instance to this instance's live subscribers.
pub fn notification_published(
    delivery: Delivery,
    hub: Arc<NotificationHub>,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let payload: NotificationEnvelope = match serde_json::from_slice(&delivery.data) {
            Ok(payload) => payload,
            Err(err) => {
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
                return Err(err.into());
            }
        };

        let delivered = hub.deliver_local(payload.user_id, &payload.notification);
        debug!(
            "Notification #{} for user #{} reached {} local connection(s)",
            payload.notification.id, payload.user_id, delivered
        );

        delivery.ack(BasicAckOptions::default()).await?;

        Ok(())
    })
}
