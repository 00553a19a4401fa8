//! Service layer: session orchestration and the broadcast loop.

pub mod broadcaster;
pub mod hub_service;

pub use broadcaster::{BroadcastMode, BroadcastReport, Broadcaster, DeliveryCounts};
pub use hub_service::HubService;
