//! Wire messages exchanged with hub clients.
//!
//! Every server → client frame is a JSON object `{"code": int, "data": string}`.
//! The only client → server frame the hub interprets is the heartbeat ping.

use serde::{Deserialize, Serialize};

/// Payload of a heartbeat acknowledgment.
pub const PONG: &str = "pong";

/// Payload of the terminal notice sent when the heartbeat window elapses.
pub const HEARTBEAT_TIMEOUT_NOTICE: &str = "heartbeat timeout";

/// Accepted textual encodings of a client heartbeat.
const PING_ENCODINGS: [&str; 3] = ["ping", "\"ping\"", "'ping'"];

/// Discriminator carried in the `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCode {
    /// Price payload / generic success delivery (`0`).
    Success,
    /// Heartbeat acknowledgment (`1`).
    Pong,
    /// Error or terminal notice (`-1`).
    Error,
}

impl MessageCode {
    /// Numeric value written on the wire.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Pong => 1,
            Self::Error => -1,
        }
    }

    /// Parses a wire value back into a code.
    #[must_use]
    pub const fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Pong),
            -1 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Server → client wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubMessage {
    /// Numeric code, see [`MessageCode`].
    pub code: i32,
    /// Message payload (a price string, `"pong"`, or an error text).
    pub data: String,
}

impl HubMessage {
    /// Builds a message with the given code.
    #[must_use]
    pub fn new(code: MessageCode, data: impl Into<String>) -> Self {
        Self {
            code: code.as_i32(),
            data: data.into(),
        }
    }

    /// Price payload delivery.
    #[must_use]
    pub fn success(data: impl Into<String>) -> Self {
        Self::new(MessageCode::Success, data)
    }

    /// Heartbeat acknowledgment.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(MessageCode::Pong, PONG)
    }

    /// Terminal notice sent before a heartbeat-timeout teardown.
    #[must_use]
    pub fn heartbeat_timeout() -> Self {
        Self::new(MessageCode::Error, HEARTBEAT_TIMEOUT_NOTICE)
    }

    /// Returns the decoded code, if it is one the hub knows.
    #[must_use]
    pub const fn message_code(&self) -> Option<MessageCode> {
        MessageCode::from_i32(self.code)
    }

    /// Serializes the message to its JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Returns `true` if an inbound frame is a heartbeat ping.
///
/// Accepts `ping`, `"ping"` and `'ping'`, ignoring surrounding whitespace.
#[must_use]
pub fn is_heartbeat_ping(frame: &[u8]) -> bool {
    std::str::from_utf8(frame)
        .map(str::trim)
        .is_ok_and(|text| PING_ENCODINGS.contains(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_ping_encodings() {
        assert!(is_heartbeat_ping(b"ping"));
        assert!(is_heartbeat_ping(b"\"ping\""));
        assert!(is_heartbeat_ping(b"'ping'"));
        assert!(is_heartbeat_ping(b" ping\n"));
    }

    #[test]
    fn rejects_other_frames() {
        assert!(!is_heartbeat_ping(b"PING"));
        assert!(!is_heartbeat_ping(b"pong"));
        assert!(!is_heartbeat_ping(b"{\"ping\":1}"));
        assert!(!is_heartbeat_ping(&[0xff, 0xfe]));
        assert!(!is_heartbeat_ping(b""));
    }

    #[test]
    fn wire_format_is_code_and_data() {
        let json = HubMessage::success("0.0123").to_json();
        assert_eq!(json, r#"{"code":0,"data":"0.0123"}"#);
        assert_eq!(HubMessage::pong().to_json(), r#"{"code":1,"data":"pong"}"#);
        assert_eq!(
            HubMessage::heartbeat_timeout().to_json(),
            r#"{"code":-1,"data":"heartbeat timeout"}"#
        );
    }

    #[test]
    fn unknown_codes_do_not_decode() {
        let msg = HubMessage {
            code: 7,
            data: String::new(),
        };
        assert_eq!(msg.message_code(), None);
        assert_eq!(HubMessage::pong().message_code(), Some(MessageCode::Pong));
    }
}
