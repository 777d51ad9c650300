//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PushTransport`: One subscriber's delivery channel (socket, test probe)
//! - `PubSub`: Named-channel publish/subscribe fabric

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Errors surfaced by outbound ports.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The transport or channel rejected the payload.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivery channel to one downstream subscriber.
///
/// The broadcaster pushes every upstream record through this port. A failed
/// push is the subscriber's problem, not the feed's: implementations report
/// the error and the broadcaster logs and moves on.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Push one payload of bytes.
    ///
    /// # Errors
    ///
    /// [`PortError::Delivery`] when the underlying transport rejects it.
    async fn send(&self, bytes: &[u8]) -> Result<(), PortError>;

    /// Push one text payload. Default goes through [`Self::send`].
    ///
    /// # Errors
    ///
    /// [`PortError::Delivery`] when the underlying transport rejects it.
    async fn send_text(&self, text: &str) -> Result<(), PortError> {
        self.send(text.as_bytes()).await
    }
}

/// Named-channel publish/subscribe fabric.
///
/// Channels are created on first use. Payloads are text (JSON for the
/// structured channels).
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload to a named channel.
    ///
    /// # Errors
    ///
    /// [`PortError::Delivery`] when the fabric rejects the publish.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PortError>;

    /// Subscribe to a named channel.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}
