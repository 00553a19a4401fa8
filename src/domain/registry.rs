//! Concurrent connection storage.
//!
//! [`ConnectionRegistry`] maps [`ConnectionId`] to the live
//! [`Connection`]s. Sessions register and unregister themselves; the
//! broadcast loop iterates over a snapshot. Entries are independent, so one
//! map-level [`tokio::sync::RwLock`] held only for map operations is enough.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::ConnectionId;
use crate::error::HubError;
use crate::ws::Connection;

/// The hub: every connection currently being served.
///
/// # Concurrency
///
/// - `register` / `unregister` take the write lock briefly.
/// - Iteration copies the `Arc`s under the read lock and releases it before
///   the callback runs, so no socket I/O ever happens under the lock.
/// - A connection added or removed during an iteration may or may not be
///   visited.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connection under its id.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateConnection`] if the id is already
    /// registered. The existing entry is left untouched.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        let mut map = self.connections.write().await;
        if map.contains_key(conn.id()) {
            return Err(HubError::DuplicateConnection(conn.id().clone()));
        }
        map.insert(conn.id().clone(), conn);
        Ok(())
    }

    /// Removes a connection. Absent ids are a no-op returning `None`.
    pub async fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(id)
    }

    /// Looks up a connection by id.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Returns the connections registered at the time of the call.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Applies `f` to each connection in a snapshot. No ordering guarantee.
    pub async fn for_each_snapshot<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for conn in &self.snapshot().await {
            f(conn);
        }
    }

    /// Returns the registered ids.
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Returns the number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
