//! In-process live delivery keyed by user id.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::models::NotificationEntity;

use super::Notifier;

const USER_CHANNEL_CAPACITY: usize = 64;

/// Per-user broadcast channels for connected clients on this instance.
///
/// A user without a live subscription simply misses the push; the stored
/// notification row is still there for the next listing.
#[derive(Debug, Default)]
pub struct NotificationHub {
    channels: DashMap<i32, broadcast::Sender<NotificationEntity>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: i32) -> broadcast::Receiver<NotificationEntity> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(USER_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Pushes to local subscribers and returns how many received it.
    pub fn deliver_local(&self, user_id: i32, event: &NotificationEntity) -> usize {
        let delivered = match self.channels.get(&user_id) {
            Some(sender) => sender.send(event.clone()).unwrap_or(0),
            None => return 0,
        };
        if delivered == 0 {
            self.channels
                .remove_if(&user_id, |_, sender| sender.receiver_count() == 0);
        }
        delivered
    }

    pub fn connected_users(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl Notifier for NotificationHub {
    async fn send(&self, user_id: i32, event: &NotificationEntity) -> Result<()> {
        let delivered = self.deliver_local(user_id, event);
        tracing::debug!(user_id, delivered, "Pushed notification #{}", event.id);
        Ok(())
    }
}
