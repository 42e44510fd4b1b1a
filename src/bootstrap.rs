use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub fn init_env() {
    if let Err(err) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", err);
    }
}

/// Binds the HTTP listener and serves until ctrl-c.
pub async fn serve(service_name: &str, app: Router, port: u16) -> Result<()> {
    let app = app.layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    tracing::info!("{} listening on {}", service_name, listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
        })
        .await
        .context("HTTP server failed")?;

    tracing::info!("{} stopped", service_name);
    Ok(())
}
