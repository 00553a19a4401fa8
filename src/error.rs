//! Hub error types with HTTP status code mapping.
//!
//! [`HubError`] is the central error type for the hub. Session-level
//! variants (read/write failures, heartbeat timeouts, mailbox states) stay
//! local to a single connection; the REST surface renders any variant as a
//! structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::ConnectionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: price must not be empty"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Hub error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category           | HTTP Status                 |
/// |-----------|--------------------|-----------------------------|
/// | 1000–1999 | Validation         | 400 Bad Request / 403       |
/// | 2000–2999 | Registry / Feed    | 409 Conflict / 503          |
/// | 3000–3999 | Server             | 500 Internal Server Error   |
/// | 5000–5999 | Session            | 500 Internal Server Error   |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The WebSocket handshake could not be completed.
    #[error("upgrade failed: {0}")]
    Upgrade(String),

    /// The request's `Origin` header is not in the allow-list.
    #[error("origin not allowed: {0}")]
    OriginRejected(String),

    /// Receiving from the client socket failed (or the peer closed it).
    #[error("read failed: {0}")]
    Read(String),

    /// Writing to the client socket failed.
    #[error("write failed: {0}")]
    Write(String),

    /// A direct write did not complete within the per-send bound.
    #[error("send timed out after {timeout_ms} ms")]
    SendTimeout {
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// No heartbeat arrived within the configured window.
    #[error("heartbeat timeout after {elapsed_secs} s")]
    HeartbeatTimeout {
        /// Seconds since the last heartbeat.
        elapsed_secs: u64,
    },

    /// The connection's mailbox is closed; teardown already started.
    #[error("mailbox closed")]
    MailboxClosed,

    /// The connection's mailbox is full; the payload was dropped.
    #[error("mailbox full for connection {0}")]
    MailboxFull(ConnectionId),

    /// A connection with the same identifier is already registered.
    #[error("connection {0} already registered")]
    DuplicateConnection(ConnectionId),

    /// The upstream price feed has no consumer left.
    #[error("price feed closed")]
    FeedClosed,

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::OriginRejected(_) => 1002,
            Self::Upgrade(_) => 1003,
            Self::DuplicateConnection(_) => 2001,
            Self::FeedClosed => 2002,
            Self::Internal(_) => 3000,
            Self::Read(_) => 5001,
            Self::Write(_) => 5002,
            Self::SendTimeout { .. } => 5003,
            Self::HeartbeatTimeout { .. } => 5004,
            Self::MailboxClosed => 5005,
            Self::MailboxFull(_) => 5006,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Upgrade(_) => StatusCode::BAD_REQUEST,
            Self::OriginRejected(_) => StatusCode::FORBIDDEN,
            Self::DuplicateConnection(_) => StatusCode::CONFLICT,
            Self::FeedClosed => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_)
            | Self::Read(_)
            | Self::Write(_)
            | Self::SendTimeout { .. }
            | Self::HeartbeatTimeout { .. }
            | Self::MailboxClosed
            | Self::MailboxFull(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_client_statuses() {
        assert_eq!(
            HubError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HubError::OriginRejected("https://evil.example".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(HubError::FeedClosed.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn session_errors_use_the_5000_range() {
        let errors = [
            HubError::Read("eof".into()),
            HubError::Write("broken pipe".into()),
            HubError::SendTimeout { timeout_ms: 10 },
            HubError::HeartbeatTimeout { elapsed_secs: 30 },
            HubError::MailboxClosed,
        ];
        for err in errors {
            assert!((5000..6000).contains(&err.error_code()), "{err}");
        }
    }

    #[test]
    fn into_response_sets_status() {
        let response = HubError::FeedClosed.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
