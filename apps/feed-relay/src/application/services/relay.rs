//! Relay Orchestrator
//!
//! Thin glue between the upstream connection and the fan-out surfaces.
//! Owns the session loop: connect (with reconnect backoff), log in,
//! subscribe the configured tickers, then route every inbound record to
//! the broadcast hub, the pub/sub channels, and the window sampler.
//!
//! Subscriber-originated messages (from the hub's client-message channel)
//! are forwarded upstream verbatim, so a downstream client can issue its
//! own `sqt` requests.
//!
//! One cancellation token drives the whole teardown: it stops this loop,
//! closes the connection (draining its outbound queue), and the caller
//! cancels the broadcaster and aggregator off the same token.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::PubSub;
use crate::application::services::aggregator::WindowSampler;
use crate::infrastructure::broadcast::{BroadcastHub, ClientMessage};
use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::feed::{
    BackoffPolicy, ConnectionEvent, FeedConnection, FeedError, auth, codec,
};

/// Pub/sub channel carrying every raw record.
pub const RAW_CHANNEL: &str = "raw";

/// Pub/sub channel carrying per-ticker running maximum updates.
pub const MAX_CHANNEL: &str = "max";

/// Errors that stop the relay for good.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The reconnect budget is spent and the feed is still unreachable.
    #[error("gave up connecting after {attempts} attempts: {source}")]
    ConnectExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last connect failure.
        #[source]
        source: FeedError,
    },
}

// =============================================================================
// Stats
// =============================================================================

/// Live counters shared with the health endpoint.
#[derive(Debug, Default)]
pub struct RelayStats {
    connected: AtomicBool,
    records_relayed: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl RelayStats {
    /// Whether the upstream connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Records relayed over the process lifetime.
    #[must_use]
    pub fn records_relayed(&self) -> u64 {
        self.records_relayed.load(Ordering::SeqCst)
    }

    /// Consecutive reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Service
// =============================================================================

/// The relay session loop.
pub struct RelayService {
    config: RelayConfig,
    hub: Arc<BroadcastHub>,
    pubsub: Arc<dyn PubSub>,
    sampler: WindowSampler,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
}

impl RelayService {
    /// Wire the service. `cancel` is the token the whole relay shuts down on.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        hub: Arc<BroadcastHub>,
        pubsub: Arc<dyn PubSub>,
        sampler: WindowSampler,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            hub,
            pubsub,
            sampler,
            stats: Arc::new(RelayStats::default()),
            cancel,
        }
    }

    /// The shared stats handle (for the health endpoint).
    #[must_use]
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled.
    ///
    /// Reconnects with backoff on terminal connection errors. Each session
    /// logs in and re-subscribes the configured tickers, so a reconnect is
    /// transparent to subscribers apart from the gap.
    ///
    /// # Errors
    ///
    /// [`RelayError::ConnectExhausted`] once a bounded reconnect budget is
    /// spent (with `max_attempts` 0 the loop retries forever).
    pub async fn run(self) -> Result<(), RelayError> {
        let mut reconnect = BackoffPolicy::new(self.config.reconnect.backoff_config());
        let mut client_rx = self.hub.client_messages();
        // Running per-ticker maxima survive reconnects.
        let mut maxes: HashMap<String, f64> = HashMap::new();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let (event_tx, event_rx) = mpsc::channel(1024);
            let connect =
                FeedConnection::connect(self.config.feed.connection_config(), event_tx);
            let result = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                result = connect => result,
            };

            match result {
                Ok(conn) => {
                    reconnect.reset();
                    self.stats.reconnect_attempts.store(0, Ordering::SeqCst);
                    self.stats.connected.store(true, Ordering::SeqCst);

                    self.open_session(&conn).await;
                    self.run_session(&conn, event_rx, &mut client_rx, &mut maxes)
                        .await;

                    self.stats.connected.store(false, Ordering::SeqCst);
                    conn.close().await;

                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                    tracing::warn!("Upstream session ended, reconnecting");
                }
                Err(e) => {
                    let attempts = self.stats.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    counter!("relay_reconnects_total").increment(1);

                    let Some(delay) = reconnect.next_delay() else {
                        return Err(RelayError::ConnectExhausted {
                            attempts,
                            source: e,
                        });
                    };
                    tracing::warn!(error = %e, attempts, delay = ?delay, "Connect failed, backing off");
                    tokio::select! {
                        () = self.cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Log in and subscribe the configured tickers.
    async fn open_session(&self, conn: &FeedConnection) {
        if let Err(e) = conn.send_text(&self.config.credentials.login_lines()).await {
            tracing::warn!(error = %e, "Queueing login failed");
            return;
        }
        for ticker in &self.config.tickers {
            if let Err(e) = conn.send_text(&auth::subscribe_command(ticker)).await {
                tracing::warn!(ticker = %ticker, error = %e, "Queueing subscription failed");
            }
        }
        tracing::info!(
            username = %self.config.credentials.username(),
            tickers = self.config.tickers.len(),
            "Session opened"
        );
    }

    /// One connected session: route events until the connection ends.
    async fn run_session(
        &self,
        conn: &FeedConnection,
        mut events: mpsc::Receiver<ConnectionEvent>,
        client_rx: &mut Option<mpsc::UnboundedReceiver<ClientMessage>>,
        maxes: &mut HashMap<String, f64>,
    ) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(ConnectionEvent::Record(raw)) => {
                        self.process_record(&raw, maxes).await;
                    }
                    Some(ConnectionEvent::Closed) | None => return,
                    Some(ConnectionEvent::Failed(e)) => {
                        tracing::warn!(error = %e, "Upstream connection failed");
                        return;
                    }
                },
                msg = recv_client(client_rx) => match msg {
                    Some(msg) => {
                        if let Err(e) = conn.send_text(&msg.text).await {
                            tracing::warn!(subscriber = %msg.subscriber, error = %e, "Forwarding client message failed");
                        }
                    }
                    // Channel closed; stop polling it.
                    None => *client_rx = None,
                }
            }
        }
    }

    /// Route one inbound record to every surface.
    async fn process_record(&self, raw: &str, maxes: &mut HashMap<String, f64>) {
        let started = Instant::now();
        counter!("relay_feed_records_total").increment(1);

        let msg = codec::decode(raw);
        if msg.is_degenerate() {
            counter!("relay_degenerate_records_total").increment(1);
            tracing::debug!(raw, "Degenerate record relayed as-is");
        }

        let shared: Arc<str> = Arc::from(raw);
        self.hub.broadcast(&shared);

        if let Err(e) = self.pubsub.publish(RAW_CHANNEL, raw).await {
            tracing::warn!(error = %e, "Raw publish failed");
        }

        let prefix = &self.config.family_prefix;
        if !prefix.is_empty() && msg.ticker().starts_with(prefix.as_str()) {
            if let Err(e) = self.pubsub.publish(prefix, raw).await {
                tracing::warn!(error = %e, channel = %prefix, "Family publish failed");
            }
        }

        if let Some(price) = msg.last_price() {
            let best = maxes.entry(msg.ticker().to_string()).or_insert(f64::MIN);
            if price > *best {
                *best = price;
                let payload = serde_json::json!({
                    "ticker": msg.ticker(),
                    "max": price,
                });
                if let Err(e) = self.pubsub.publish(MAX_CHANNEL, &payload.to_string()).await {
                    tracing::warn!(error = %e, "Max publish failed");
                }
            }
        }

        self.stats.records_relayed.fetch_add(1, Ordering::SeqCst);
        self.sampler.record(started.elapsed());
    }
}

/// Receive from the optional client-message channel; pends forever when the
/// channel was already taken by another consumer.
async fn recv_client(
    client_rx: &mut Option<mpsc::UnboundedReceiver<ClientMessage>>,
) -> Option<ClientMessage> {
    match client_rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => futures_util::future::pending().await,
    }
}
