//! Axum WebSocket upgrade handler.
//!
//! Checks the origin policy, derives the connection id from the peer
//! address and hands the upgraded socket to the [`crate::service::HubService`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Extension;
use axum::extract::State;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::http::header::ORIGIN;
use axum::response::{IntoResponse, Response};

use super::{AxumSocket, DuplexSocket};
use crate::app_state::AppState;
use crate::domain::ConnectionId;
use crate::error::HubError;

/// Handshake settings owned by the upgrade handler.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Upper bound on the HTTP upgrade request.
    pub handshake_timeout: Duration,
    /// WebSocket read buffer size in bytes.
    pub read_buffer_size: usize,
    /// WebSocket write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Accepted `Origin` values. Empty accepts every origin.
    pub allowed_origins: Vec<String>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            allowed_origins: Vec::new(),
        }
    }
}

impl UpgradeConfig {
    /// Returns `true` if a request carrying `origin` may upgrade.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty()
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }
}

/// `GET /api/v2/price` — Upgrade HTTP connection to a price stream.
///
/// # Errors
///
/// Returns [`HubError::OriginRejected`] (403) when the `Origin` header is
/// not allowed; no connection is created.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    remote: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, HubError> {
    if let Some(origin) = headers.get(ORIGIN).and_then(|v| v.to_str().ok())
        && !state.upgrade.origin_allowed(origin)
    {
        tracing::warn!(origin, "websocket origin rejected");
        return Err(HubError::OriginRejected(origin.to_string()));
    }

    let remote = remote.map(|Extension(ConnectInfo(addr))| addr);
    let id = ConnectionId::from_remote(remote);
    let hub = Arc::clone(&state.hub);

    Ok(ws
        .read_buffer_size(state.upgrade.read_buffer_size)
        .write_buffer_size(state.upgrade.write_buffer_size)
        .on_failed_upgrade(|e: axum::Error| {
            let err = HubError::Upgrade(e.to_string());
            tracing::error!(error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let socket: Arc<dyn DuplexSocket> = Arc::new(AxumSocket::new(socket));
            match hub.serve(id.clone(), socket).await {
                Ok(end) => tracing::debug!(conn_id = %id, reason = ?end, "websocket closed"),
                Err(e) => tracing::warn!(conn_id = %id, error = %e, "websocket session failed"),
            }
        })
        .into_response())
}
