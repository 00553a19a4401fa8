//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::PricePublisher;
use crate::service::HubService;
use crate::ws::UpgradeConfig;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Hub service owning the connection registry.
    pub hub: Arc<HubService>,
    /// Producer side of the upstream price feed.
    pub publisher: PricePublisher,
    /// Handshake settings for the upgrade handler.
    pub upgrade: Arc<UpgradeConfig>,
}
