//! Hub service: turns upgraded sockets into registered, supervised sessions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::{ConnectionId, ConnectionRegistry};
use crate::error::HubError;
use crate::ws::{Connection, DuplexSocket, SessionConfig, SessionEnd};

/// Owns the registry handle, session settings and the process shutdown
/// token shared by every session.
#[derive(Debug)]
pub struct HubService {
    registry: Arc<ConnectionRegistry>,
    session: SessionConfig,
    shutdown: CancellationToken,
}

impl HubService {
    /// Creates a new `HubService`.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        session: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            session,
            shutdown,
        }
    }

    /// Returns a reference to the inner [`ConnectionRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Registers a connection over `socket` and serves it until it ends.
    ///
    /// The session runs in its own task; a panic inside it is logged and
    /// followed by a teardown, and never reaches the caller as a panic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateConnection`] if `id` is already live, or
    /// [`HubError::Internal`] if the session task panicked.
    pub async fn serve(
        &self,
        id: ConnectionId,
        socket: Arc<dyn DuplexSocket>,
    ) -> Result<SessionEnd, HubError> {
        let session = Connection::open(
            id,
            socket,
            &self.registry,
            self.session.clone(),
            &self.shutdown,
        )
        .await?;
        let conn = Arc::clone(session.connection());

        match tokio::spawn(session.run()).await {
            Ok(end) => Ok(end),
            Err(e) => {
                tracing::error!(conn_id = %conn.id(), error = %e, "session task failed");
                conn.teardown().await;
                Err(HubError::Internal(e.to_string()))
            }
        }
    }
}
