//! price-hub server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints and the
//! broadcast loop.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use price_hub::app::{build_app, start_hub};
use price_hub::config::HubConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; LOG_FORMAT=json switches to structured output
    let subscriber = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Load configuration
    let config = HubConfig::from_env()?;
    tracing::info!(
        addr = %config.listen_addr,
        heartbeat_timeout_secs = config.session.heartbeat_timeout.as_secs(),
        mode = ?config.broadcast_mode,
        "starting price-hub"
    );

    // Build hub and spawn the broadcast loop
    let shutdown = CancellationToken::new();
    let hub = start_hub(&config, &shutdown);
    let app = build_app(hub.state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    if let Err(e) = hub.broadcast_task.await {
        tracing::error!(error = %e, "broadcast loop failed");
    }
    tracing::info!("price-hub stopped");

    Ok(())
}

/// Resolves on Ctrl-C, cancelling every session and the broadcast loop.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
