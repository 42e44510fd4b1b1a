use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    api::Gateways,
    config::AppConfig,
    db::DbPool,
    notifications::{NotificationEmitter, Notifier, amqp::AmqpNotifier, hub::NotificationHub},
};

/// Shared handles every route receives.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub config: Arc<AppConfig>,
    pub gateways: Gateways,
    pub emitter: NotificationEmitter,
    pub hub: Arc<NotificationHub>,
}

impl AppState {
    /// Wires the production gateways and notification transport.
    ///
    /// With `AMQP_URL` set, notifications go through the broker so every
    /// replica's SSE subscribers see them; otherwise they stay in-process.
    pub async fn build(config: AppConfig, db_pool: DbPool) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.payments.gateway_timeout)
            .build()
            .context("Failed to build the HTTP client")?;
        let gateways = Gateways::from_config(&config, http_client);

        let hub = Arc::new(NotificationHub::new());
        let notifier: Arc<dyn Notifier> = match &config.notifications.amqp_url {
            Some(url) => Arc::new(
                AmqpNotifier::connect(url, &config.notifications.exchange, hub.clone()).await?,
            ),
            None => {
                tracing::info!("AMQP_URL not set, notifications stay in-process");
                hub.clone()
            }
        };

        Ok(Self::new(config, db_pool, gateways, notifier, hub))
    }

    pub fn new(
        config: AppConfig,
        db_pool: DbPool,
        gateways: Gateways,
        notifier: Arc<dyn Notifier>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            emitter: NotificationEmitter::new(db_pool.clone(), notifier),
            db_pool,
            config: Arc::new(config),
            gateways,
            hub,
        }
    }
}
