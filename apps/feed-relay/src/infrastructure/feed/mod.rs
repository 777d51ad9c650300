//! Upstream feed integration: wire codec, framing, connection lifecycle,
//! reconnect backoff, and login/subscription commands.

pub mod auth;
pub mod backoff;
pub mod codec;
pub mod connection;
pub mod framing;

pub use auth::Credentials;
pub use backoff::{BackoffConfig, BackoffPolicy};
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionState, FeedConnection, FeedError};
pub use framing::{DEFAULT_MAX_PENDING, FrameBuffer, Framing};
