//! Domain layer
//!
//! Core data types with no runtime dependencies: decoded feed records and
//! windowed aggregation results.

/// Decoded feed records and the well-known field table.
pub mod record;

/// Windowed throughput/latency aggregation types.
pub mod window;
