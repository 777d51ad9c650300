//! Feed Relay Binary
//!
//! Starts the market data feed relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin feed-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_TOKEN`: Upstream feed authentication token
//! - `FEED_USERNAME`: Upstream feed username
//! - `FEED_PASSWORD`: Upstream feed password
//! - `FEED_HOST`: Upstream feed host
//!
//! ## Optional
//! - `FEED_PORT`: Upstream feed port (default: 81)
//! - `FEED_TICKERS`: Comma-separated tickers to subscribe on connect
//! - `FEED_FAMILY_PREFIX`: Ticker prefix republished on its own channel (default: WIN)
//! - `FEED_FRAMING`: Record framing - "terminator" | "newline" (default: terminator)
//! - `FEED_MAX_PENDING_BYTES`: Cap on buffered bytes awaiting a delimiter (default: 65536)
//! - `FEED_CONNECT_TIMEOUT_SECS`: TCP handshake bound (default: 3)
//! - `FEED_WRITE_FAILURE_BUDGET`: Consecutive write failures tolerated (default: 3)
//! - `FEED_MAX_RECONNECT_ATTEMPTS`: Reconnect budget, 0 = unlimited (default: 0)
//! - `FEED_WINDOW_INTERVAL_MS`: Aggregation window span (default: 1000)
//! - `FEED_WINDOW_MAX_COUNT`: Item count closing a window early (default: 10000)
//! - `FEED_RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use feed_relay::application::services::aggregator::AggregatorConfig;
use feed_relay::infrastructure::broadcast::BroadcastHub;
use feed_relay::infrastructure::bus::ChannelBus;
use feed_relay::infrastructure::health::{HealthServer, HealthServerState};
use feed_relay::infrastructure::telemetry;
use feed_relay::{RelayConfig, RelayService, WindowAggregator, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    telemetry::init();

    tracing::info!("Starting Feed Relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let hub = Arc::new(BroadcastHub::new());
    let pubsub: Arc<dyn feed_relay::PubSub> =
        Arc::new(ChannelBus::new(config.server.bus_capacity));

    // Window aggregator
    let aggregator_config = AggregatorConfig {
        interval: config.window.interval,
        max_count: config.window.max_count,
        moving_avg_depth: config.window.moving_avg_depth,
    };
    let aggregator = WindowAggregator::spawn(
        aggregator_config,
        Arc::clone(&pubsub),
        shutdown_token.clone(),
    );

    // Relay orchestrator
    let relay = RelayService::new(
        config.clone(),
        Arc::clone(&hub),
        Arc::clone(&pubsub),
        aggregator.sampler(),
        shutdown_token.clone(),
    );
    let stats = relay.stats();

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&stats),
        Arc::clone(&hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let relay_token = shutdown_token.clone();
    let relay_task = tokio::spawn(async move {
        let result = relay.run().await;
        // An unrecoverable relay error should take the process down.
        relay_token.cancel();
        result
    });

    tracing::info!("Feed relay ready");

    await_shutdown(shutdown_token.clone()).await;

    // Orderly teardown: relay loop first (closes the connection), then the
    // fan-out and the aggregator's partial-window flush.
    let relay_result = match tokio::time::timeout(SHUTDOWN_TIMEOUT, relay_task).await {
        Ok(joined) => joined.unwrap_or(Ok(())),
        Err(_) => {
            tracing::warn!("Relay task outlived the shutdown timeout");
            Ok(())
        }
    };
    hub.shutdown().await;
    aggregator.join().await;

    if let Err(e) = relay_result {
        tracing::error!(error = %e, "Feed relay failed");
        return Err(Box::new(e) as Box<dyn std::error::Error>);
    }

    tracing::info!("Feed relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        host = %config.feed.host,
        port = config.feed.port,
        tickers = config.tickers.len(),
        family = %config.family_prefix,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or internal cancellation.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
