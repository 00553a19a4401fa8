//! # price-hub
//!
//! WebSocket fan-out hub for a live price feed.
//!
//! Clients hold a persistent WebSocket, send a `ping` at least once per
//! heartbeat window, and receive every upstream price as
//! `{"code":0,"data":"<price>"}`. Silent clients are evicted with a
//! `{"code":-1,"data":"heartbeat timeout"}` notice.
//!
//! ## Architecture
//!
//! ```text
//! Upstream poller ── POST /api/v1/prices ──► PricePublisher
//!                                                 │
//!                                            PriceFeed (mpsc)
//!                                                 │
//!                                      Broadcaster (service/)
//!                                                 │ snapshot
//!                                   ConnectionRegistry (domain/)
//!                                   │            │            │
//!                               Connection   Connection   Connection (ws/)
//!                               reader · mailbox writer · heartbeat supervisor
//!                                   │
//! Clients ── GET /api/v2/price ──► upgrade handler ──► HubService
//! ```

pub mod api;
pub mod app;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
