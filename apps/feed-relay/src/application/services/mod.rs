//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `RelayService`: Wires the upstream connection to broadcast and pub/sub
//! - `WindowAggregator`: Drives fixed-interval throughput windows

pub mod aggregator;
pub mod relay;

pub use aggregator::{AggregatorConfig, WindowAggregator};
pub use relay::{RelayService, RelayStats};
