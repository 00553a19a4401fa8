//! Router assembly and hub bootstrap.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::HubConfig;
use crate::domain::{ConnectionRegistry, price_channel};
use crate::service::{Broadcaster, HubService};
use crate::ws::handler::ws_handler;

/// A running hub: application state plus the broadcast loop task.
#[derive(Debug)]
pub struct Hub {
    /// State to serve with [`build_app`].
    pub state: AppState,
    /// Broadcast loop task; ends when `shutdown` is cancelled.
    pub broadcast_task: JoinHandle<()>,
}

/// Builds the registry, price feed and services, and spawns the broadcast
/// loop. Every session and the loop stop when `shutdown` is cancelled.
#[must_use]
pub fn start_hub(config: &HubConfig, shutdown: &CancellationToken) -> Hub {
    let registry = Arc::new(ConnectionRegistry::new());
    let (publisher, feed) = price_channel(config.price_feed_capacity);

    let broadcaster = Broadcaster::new(Arc::clone(&registry), config.broadcast_mode);
    let broadcast_task = tokio::spawn(broadcaster.run(feed, shutdown.child_token()));

    let hub = Arc::new(HubService::new(
        registry,
        config.session.clone(),
        shutdown.clone(),
    ));

    Hub {
        state: AppState {
            hub,
            publisher,
            upgrade: Arc::new(config.upgrade.clone()),
        },
        broadcast_task,
    }
}

/// Builds the full router: REST endpoints plus the WebSocket routes.
///
/// The handshake timeout only wraps the upgrade routes; once upgraded, a
/// session is governed by its heartbeat window.
pub fn build_app(state: AppState) -> Router {
    let ws_routes = Router::new()
        .route("/api/v2/price", get(ws_handler))
        .route("/ws", get(ws_handler))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.upgrade.handshake_timeout,
        ));

    Router::new()
        .merge(api::build_router())
        .merge(ws_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
