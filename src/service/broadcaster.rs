//! Broadcast loop: fans every upstream price out to all live connections.
//!
//! In [`BroadcastMode::Direct`] the loop never waits on a client. Each
//! connection has at most one broadcast writer task in flight, doing bounded
//! direct writes; prices that arrive while it is busy collapse into the
//! newest one, which the writer sends next. A frozen client therefore costs
//! the loop nothing and only ever sees the latest price.
//! [`BroadcastMode::Mailbox`] routes prices through each connection's
//! mailbox and drops them when it is full.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::domain::{ConnectionRegistry, HubMessage, PriceFeed};
use crate::error::HubError;
use crate::ws::Connection;

/// How prices reach each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcastMode {
    /// Bounded direct write, bypassing the mailbox.
    #[default]
    Direct,
    /// Non-blocking enqueue into the mailbox; dropped when full.
    Mailbox,
}

impl FromStr for BroadcastMode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "mailbox" => Ok(Self::Mailbox),
            other => Err(HubError::InvalidRequest(format!(
                "unknown broadcast mode: {other}"
            ))),
        }
    }
}

/// Outcome of handing a single price to the connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub recipients: usize,
    /// New direct writes started, or mailbox enqueues.
    pub dispatched: usize,
    /// Prices parked behind a direct write still in flight.
    pub conflated: usize,
    /// Prices dropped on a full or closed mailbox.
    pub dropped: usize,
}

/// Running totals of direct write outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    /// Writes that reached the socket.
    pub delivered: u64,
    /// Writes the socket rejected.
    pub failed: u64,
    /// Writes that hit the send timeout.
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl DeliveryStats {
    fn counts(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Sole consumer of the [`PriceFeed`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    mode: BroadcastMode,
    stats: Arc<DeliveryStats>,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, mode: BroadcastMode) -> Self {
        Self {
            registry,
            mode,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Returns the configured mode.
    #[must_use]
    pub const fn mode(&self) -> BroadcastMode {
        self.mode
    }

    /// Direct write outcomes so far.
    #[must_use]
    pub fn delivery_counts(&self) -> DeliveryCounts {
        self.stats.counts()
    }

    /// Hands `price` to every connection in the current snapshot.
    ///
    /// Never waits on a socket write.
    pub async fn broadcast(&self, price: &str) -> BroadcastReport {
        match self.mode {
            BroadcastMode::Direct => self.broadcast_direct(price).await,
            BroadcastMode::Mailbox => self.broadcast_mailbox(price).await,
        }
    }

    async fn broadcast_direct(&self, price: &str) -> BroadcastReport {
        let connections = self.registry.snapshot().await;
        let mut report = BroadcastReport {
            recipients: connections.len(),
            ..BroadcastReport::default()
        };

        for conn in connections {
            if conn.offer_broadcast(price) {
                report.dispatched += 1;
                tokio::spawn(write_broadcasts(
                    conn,
                    price.to_string(),
                    Arc::clone(&self.stats),
                ));
            } else {
                tracing::trace!(conn_id = %conn.id(), "previous broadcast still in flight");
                report.conflated += 1;
            }
        }
        report
    }

    async fn broadcast_mailbox(&self, price: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.registry
            .for_each_snapshot(|conn| {
                report.recipients += 1;
                match conn.enqueue(price) {
                    Ok(()) => report.dispatched += 1,
                    Err(e) => {
                        tracing::debug!(conn_id = %conn.id(), error = %e, "price dropped");
                        report.dropped += 1;
                    }
                }
            })
            .await;
        report
    }

    /// Drains `feed` until it closes or `shutdown` is cancelled.
    pub async fn run(self, mut feed: PriceFeed, shutdown: CancellationToken) {
        tracing::info!(mode = ?self.mode, "broadcast loop started");
        loop {
            let price = tokio::select! {
                () = shutdown.cancelled() => break,
                price = feed.next() => match price {
                    Some(price) => price,
                    None => break,
                },
            };
            let report = self.broadcast(&price).await;
            tracing::debug!(
                price = %price,
                recipients = report.recipients,
                dispatched = report.dispatched,
                conflated = report.conflated,
                dropped = report.dropped,
                "price broadcast"
            );
        }
        let counts = self.delivery_counts();
        tracing::info!(
            delivered = counts.delivered,
            failed = counts.failed,
            timed_out = counts.timed_out,
            "broadcast loop stopped"
        );
    }
}

/// Per-connection broadcast writer: sends `first`, then whatever newest
/// price was parked meanwhile, until the slot is empty.
async fn write_broadcasts(conn: Arc<Connection>, first: String, stats: Arc<DeliveryStats>) {
    let mut next = Some(first);
    while let Some(price) = next {
        match conn.send_bounded(&HubMessage::success(price)).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e @ HubError::SendTimeout { .. }) => {
                tracing::warn!(conn_id = %conn.id(), error = %e, "broadcast send timed out");
                stats.timed_out.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn.id(), error = %e, "broadcast send failed");
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        next = conn.next_broadcast();
    }
}
