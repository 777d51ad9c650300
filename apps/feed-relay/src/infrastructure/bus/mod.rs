//! In-Process Pub/Sub Bus
//!
//! A [`PubSub`] adapter over named tokio broadcast channels, created on
//! first use. Lets the relay and its tests run without an external broker;
//! a broker-backed adapter would implement the same port.
//!
//! Publishing to a channel nobody subscribes to succeeds and goes nowhere,
//! matching fire-and-forget broker semantics. Slow subscribers can lag and
//! lose the oldest messages (tokio broadcast semantics); channel capacity is
//! configurable.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::{PortError, PubSub};

/// Default per-channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Named-channel bus backed by tokio broadcast channels.
pub struct ChannelBus {
    channels: parking_lot::Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelBus {
    /// Create a bus whose channels hold up to `capacity` pending messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: parking_lot::Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl PubSub for ChannelBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PortError> {
        // A send error only means no receivers right now; not a failure.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = ChannelBus::default();
        let mut rx1 = bus.subscribe("raw");
        let mut rx2 = bus.subscribe("raw");

        bus.publish("raw", "T:A:1:2:10!").await.unwrap();

        assert_eq!(rx1.recv().await.unwrap(), "T:A:1:2:10!");
        assert_eq!(rx2.recv().await.unwrap(), "T:A:1:2:10!");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = ChannelBus::default();
        let mut raw = bus.subscribe("raw");
        let mut max = bus.subscribe("max");

        bus.publish("max", "{\"ticker\":\"A\",\"max\":10.0}")
            .await
            .unwrap();

        assert!(max.recv().await.is_ok());
        assert!(raw.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = ChannelBus::default();
        assert!(bus.publish("metrics", "{}").await.is_ok());
    }

    #[tokio::test]
    async fn subscriber_counts_per_channel() {
        let bus = ChannelBus::default();
        assert_eq!(bus.subscriber_count("raw"), 0);
        let _rx = bus.subscribe("raw");
        assert_eq!(bus.subscriber_count("raw"), 1);
        assert_eq!(bus.subscriber_count("max"), 0);
    }
}
