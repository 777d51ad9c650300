#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Feed Relay - Market Data Feed Multiplexer
//!
//! A relay service that maintains a single TCP connection to an upstream
//! market-data feed and fans each record out to multiple downstream
//! subscribers, pub/sub channels, and a throughput aggregator.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data types, no I/O
//!   - `record`: Decoded feed records, field IDs, label tables
//!   - `window`: Aggregation windows, moving average, validation
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Push transport and pub/sub interfaces
//!   - `services`: Relay orchestration, window aggregation
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: TCP connection, wire codec, framing, backoff, auth
//!   - `broadcast`: Per-subscriber fan-out queues
//!   - `bus`: In-process pub/sub channels
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                        ┌─────────────┐     ┌─────────────┐──► Subscriber 1
//! Upstream feed TCP ────►│    Relay    │────►│  Broadcast  │──► Subscriber 2
//!                        │ Orchestrator│     │     Hub     │──► Subscriber N
//!                        └──────┬──────┘     └─────────────┘
//!                               │
//!                               ├──► pub/sub: raw, <family>, max
//!                               └──► window aggregator ──► pub/sub: metrics
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure record and window types with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::record::{FieldValue, Message};
pub use domain::window::{MovingAverage, Window, WindowBuilder};

// Application ports and services
pub use application::ports::{PortError, PubSub, PushTransport};
pub use application::services::{
    AggregatorConfig, RelayService, RelayStats, WindowAggregator,
    relay::{MAX_CHANNEL, RAW_CHANNEL, RelayError},
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedSettings, ReconnectSettings, RelayConfig, ServerSettings, WindowSettings,
};

// Feed primitives (for integration tests)
pub use infrastructure::feed::{
    BackoffConfig, BackoffPolicy, ConnectionConfig, ConnectionEvent, ConnectionState,
    Credentials, FeedConnection, FeedError, FrameBuffer, Framing,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{BroadcastHub, ClientMessage, SubscriberHandle, SubscriberId};

// Pub/sub bus
pub use infrastructure::bus::ChannelBus;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;
