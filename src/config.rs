//! Hub configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Missing or unparsable values fall back
//! to the defaults below.
//!
//! | Variable                    | Default        |
//! |-----------------------------|----------------|
//! | `LISTEN_ADDR`               | `0.0.0.0:3000` |
//! | `WS_TIMEOUT_SECS`           | `30`           |
//! | `WS_HEARTBEAT_TICK_MS`      | `1000`         |
//! | `WS_MAILBOX_CAPACITY`       | `800`          |
//! | `WS_SEND_TIMEOUT_MS`        | `2000`         |
//! | `WS_HANDSHAKE_TIMEOUT_SECS` | `5`            |
//! | `WS_READ_BUFFER_SIZE`       | `1024`         |
//! | `WS_WRITE_BUFFER_SIZE`      | `1024`         |
//! | `WS_ALLOWED_ORIGINS`        | empty (any)    |
//! | `PRICE_FEED_CAPACITY`       | `1024`         |
//! | `BROADCAST_MODE`            | `direct`       |

use std::net::SocketAddr;
use std::time::Duration;

use crate::service::BroadcastMode;
use crate::ws::{SessionConfig, UpgradeConfig};

/// Top-level hub configuration.
///
/// Loaded once at startup via [`HubConfig::from_env`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Heartbeat window, mailbox capacity and send bound per session.
    pub session: SessionConfig,

    /// Handshake settings owned by the upgrade handler.
    pub upgrade: UpgradeConfig,

    /// Capacity of the upstream price channel.
    pub price_feed_capacity: usize,

    /// How the broadcast loop reaches each connection.
    pub broadcast_mode: BroadcastMode,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            session: SessionConfig::default(),
            upgrade: UpgradeConfig::default(),
            price_feed_capacity: 1024,
            broadcast_mode: BroadcastMode::Direct,
        }
    }
}

impl HubConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`], or if `BROADCAST_MODE` names an unknown mode.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| defaults.listen_addr.to_string())
            .parse()?;

        let session = SessionConfig {
            heartbeat_timeout: Duration::from_secs(parse_env(
                "WS_TIMEOUT_SECS",
                defaults.session.heartbeat_timeout.as_secs(),
            )),
            heartbeat_tick: Duration::from_millis(parse_env("WS_HEARTBEAT_TICK_MS", 1000)),
            mailbox_capacity: parse_env("WS_MAILBOX_CAPACITY", defaults.session.mailbox_capacity),
            send_timeout: Duration::from_millis(parse_env("WS_SEND_TIMEOUT_MS", 2000)),
        };

        let upgrade = UpgradeConfig {
            handshake_timeout: Duration::from_secs(parse_env(
                "WS_HANDSHAKE_TIMEOUT_SECS",
                defaults.upgrade.handshake_timeout.as_secs(),
            )),
            read_buffer_size: parse_env("WS_READ_BUFFER_SIZE", defaults.upgrade.read_buffer_size),
            write_buffer_size: parse_env(
                "WS_WRITE_BUFFER_SIZE",
                defaults.upgrade.write_buffer_size,
            ),
            allowed_origins: parse_list(std::env::var("WS_ALLOWED_ORIGINS").ok().as_deref()),
        };

        let price_feed_capacity = parse_env("PRICE_FEED_CAPACITY", defaults.price_feed_capacity);

        let broadcast_mode = match std::env::var("BROADCAST_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.broadcast_mode,
        };

        Ok(Self {
            listen_addr,
            session,
            upgrade,
            price_feed_capacity,
            broadcast_mode,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Splits a comma-separated list, dropping blanks.
fn parse_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
