//! Price publication DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for `POST /api/v1/prices`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublishPriceRequest {
    /// Opaque price string, relayed verbatim to every client.
    pub price: String,
}

/// Response body for an accepted price.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublishPriceResponse {
    /// The price as queued for broadcast.
    pub price: String,
    /// Live connections at the time the price was queued.
    pub connections: usize,
    /// Time the price was accepted.
    pub accepted_at: DateTime<Utc>,
}
