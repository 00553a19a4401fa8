//! Upstream price feed channel.
//!
//! The exchange poller publishes opaque price strings through a
//! [`PricePublisher`]; the broadcast loop is the sole owner of the matching
//! [`PriceFeed`]. Backed by a bounded [`tokio::sync::mpsc`] channel, so a
//! stalled broadcaster applies backpressure to producers instead of growing
//! memory without bound.

use tokio::sync::mpsc;

use crate::error::HubError;

/// Creates a connected publisher / feed pair with the given capacity.
#[must_use]
pub fn price_channel(capacity: usize) -> (PricePublisher, PriceFeed) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (PricePublisher { sender }, PriceFeed { receiver })
}

/// Producer handle for the upstream feed. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PricePublisher {
    sender: mpsc::Sender<String>,
}

impl PricePublisher {
    /// Publishes a price, waiting for channel capacity if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::FeedClosed`] if the [`PriceFeed`] was dropped.
    pub async fn publish(&self, price: impl Into<String>) -> Result<(), HubError> {
        self.sender
            .send(price.into())
            .await
            .map_err(|_| HubError::FeedClosed)
    }

    /// Returns `true` once the consumer side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Single-consumer side of the upstream feed.
#[derive(Debug)]
pub struct PriceFeed {
    receiver: mpsc::Receiver<String>,
}

impl PriceFeed {
    /// Waits for the next price. Returns `None` once every publisher is
    /// dropped and the buffer is drained.
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}
