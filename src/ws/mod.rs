//! WebSocket layer: socket capability, per-client sessions and the upgrade
//! handler.
//!
//! Clients connect at `/api/v2/price` (or `/ws`), send `ping` at least once
//! per heartbeat window, and receive every published price as
//! `{"code":0,"data":"<price>"}`.

pub mod connection;
pub mod handler;
pub mod socket;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::{Connection, Session, SessionConfig, SessionEnd, SessionState};
pub use handler::UpgradeConfig;
pub use socket::{AxumSocket, DuplexSocket};
