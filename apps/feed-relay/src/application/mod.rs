//! Application Layer
//!
//! Use cases and port definitions. Services orchestrate domain logic across
//! the infrastructure adapters without knowing their concrete types.

pub mod ports;
pub mod services;
