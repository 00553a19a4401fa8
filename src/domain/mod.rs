//! Domain layer: connection identity, wire messages, the connection
//! registry and the upstream price feed.

pub mod connection_id;
pub mod message;
pub mod price_feed;
pub mod registry;

pub use connection_id::ConnectionId;
pub use message::{HubMessage, MessageCode, is_heartbeat_ping};
pub use price_feed::{PriceFeed, PricePublisher, price_channel};
pub use registry::ConnectionRegistry;
