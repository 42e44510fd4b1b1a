//! RabbitMQ-backed fan-out for multi-instance deployments.
//!
//! Every instance publishes to one fanout exchange and binds its own
//! exclusive queue to it, so a user connected to any instance gets the push.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_lite::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use serde::{Deserialize, Serialize};

use crate::{consumers, models::NotificationEntity};

use super::{Notifier, hub::NotificationHub};

/// Wire format on the notification exchange.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub user_id: i32,
    pub notification: NotificationEntity,
}

pub struct AmqpNotifier {
    channel: Channel,
    exchange: String,
}

impl AmqpNotifier {
    /// Connects, declares the exchange, and starts this instance's consumer
    /// that forwards envelopes into `hub`.
    pub async fn connect(url: &str, exchange: &str, hub: Arc<NotificationHub>) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open a RabbitMQ channel")?;

        channel
            .exchange_declare(
                exchange.into(),
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare the notification exchange")?;

        let consumer_channel = connection
            .create_channel()
            .await
            .context("Failed to open a RabbitMQ consumer channel")?;
        let exchange_name = exchange.to_string();
        tokio::spawn(async move {
            if let Err(err) = consume(consumer_channel, &exchange_name, hub).await {
                tracing::error!("Notification consumer stopped: {:#}", err);
            }
        });

        tracing::info!("Publishing notifications to exchange {}", exchange);
        Ok(Self {
            channel,
            exchange: exchange.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for AmqpNotifier {
    async fn send(&self, user_id: i32, event: &NotificationEntity) -> Result<()> {
        let payload = serde_json::to_vec(&NotificationEnvelope {
            user_id,
            notification: event.clone(),
        })
        .context("Failed to encode notification")?;

        self.channel
            .basic_publish(
                self.exchange.as_str().into(),
                "".into(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .context("Failed to publish notification")?
            .await
            .context("RabbitMQ did not confirm the notification")?;

        Ok(())
    }
}

async fn consume(channel: Channel, exchange: &str, hub: Arc<NotificationHub>) -> Result<()> {
    let queue = channel
        .queue_declare(
            "".into(),
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare the notification queue")?;

    channel
        .queue_bind(
            queue.name().as_str().into(),
            exchange.into(),
            "".into(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to bind the notification queue")?;

    let mut consumer = channel
        .basic_consume(
            queue.name().as_str().into(),
            "orderservice-notifications".into(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consuming notifications")?;

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery.context("Notification consumer failed")?;
        if let Err(err) = consumers::notifications::notification_published(delivery, hub.clone()).await
        {
            tracing::warn!("Failed to handle notification delivery: {:#}", err);
        }
    }

    Ok(())
}
