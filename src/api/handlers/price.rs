//! Price ingest handler used by the upstream poller.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{PublishPriceRequest, PublishPriceResponse};
use crate::app_state::AppState;
use crate::error::HubError;

/// `POST /prices` — Queue a price for broadcast to every connection.
#[utoipa::path(
    post,
    path = "/api/v1/prices",
    tag = "Prices",
    summary = "Publish a price",
    description = "Queues an opaque price string on the upstream feed. \
                   Every live WebSocket client receives it as {\"code\":0,\"data\":price}.",
    request_body = PublishPriceRequest,
    responses(
        (status = 202, description = "Price queued", body = PublishPriceResponse),
        (status = 400, description = "Empty price"),
        (status = 503, description = "Broadcast loop is not running"),
    )
)]
pub async fn publish_price(
    State(state): State<AppState>,
    Json(req): Json<PublishPriceRequest>,
) -> Result<impl IntoResponse, HubError> {
    let price = req.price.trim();
    if price.is_empty() {
        return Err(HubError::InvalidRequest(
            "price must not be empty".to_string(),
        ));
    }

    state.publisher.publish(price).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishPriceResponse {
            price: price.to_string(),
            connections: state.hub.connection_count().await,
            accepted_at: Utc::now(),
        }),
    ))
}

/// Price routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/prices", post(publish_price))
}
