//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstream TCP feed adapters (codec, framing, connection, backoff, auth).
pub mod feed;

/// Subscriber fan-out with per-subscriber queues.
pub mod broadcast;

/// In-process pub/sub bus over named channels.
pub mod bus;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing setup.
pub mod telemetry;
