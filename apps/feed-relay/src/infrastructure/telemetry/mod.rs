//! Tracing Setup
//!
//! Structured logging via `tracing` with an `EnvFilter` (`RUST_LOG`).
//!
//! # Usage
//!
//! ```ignore
//! use feed_relay::infrastructure::telemetry;
//!
//! // Initialize once at startup.
//! telemetry::init();
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the defaults; without it the relay logs at `info`
/// and HTTP plumbing at `warn`.
#[allow(clippy::expect_used)]
pub fn init() {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "feed_relay=info"
                .parse()
                .expect("static directive 'feed_relay=info' is valid"),
        )
        .add_directive(
            "tower_http=info"
                .parse()
                .expect("static directive 'tower_http=info' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
