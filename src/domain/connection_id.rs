//! Connection identifier derived from the client's remote address.
//!
//! [`ConnectionId`] is a newtype wrapper around a `String` so connection
//! keys cannot be confused with other strings (price payloads, origins).

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Length of the random suffix appended to an address-derived id.
const SUFFIX_LEN: usize = 23;

/// Length of a purely random id used when the remote address is unknown.
const RANDOM_LEN: usize = 32;

/// Unique identifier for a hub connection.
///
/// Built once at upgrade time and immutable thereafter. Used as the key in
/// [`super::ConnectionRegistry`] and as the `conn_id` field in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Derives an id from the client's remote address.
    ///
    /// The IP is rendered with `.` and `:` replaced by `_`, followed by `_`
    /// and a random alphanumeric suffix. Without an address the id is
    /// purely random.
    #[must_use]
    pub fn from_remote(remote: Option<SocketAddr>) -> Self {
        match remote {
            Some(addr) => Self(format!(
                "{}_{}",
                normalize_ip(addr.ip()),
                random_alphanumeric(SUFFIX_LEN)
            )),
            None => Self::random(),
        }
    }

    /// Creates a purely random id.
    #[must_use]
    pub fn random() -> Self {
        Self(random_alphanumeric(RANDOM_LEN))
    }

    /// Wraps an existing string without validation.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_ip(ip: IpAddr) -> String {
    ip.to_string().replace(['.', ':'], "_")
}

/// Random lowercase alphanumeric string of `len` characters.
///
/// Draws from simple-formatted v4 UUIDs (32 hex characters each).
fn random_alphanumeric(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let chunk = uuid::Uuid::new_v4().simple().to_string();
        out.extend(chunk.chars().take(len - out.len()));
    }
    out
}
