//! Upstream Feed Connection
//!
//! Owns one TCP socket to the upstream feed. Inbound bytes are reassembled
//! into complete records and emitted as events; outbound sends go through a
//! queue drained by a single writer task with backpressure-aware retry and a
//! bounded consecutive-failure budget.
//!
//! # State machine
//!
//! ```text
//! Connecting -> Open -> { Closing -> Closed } | Failed
//! ```
//!
//! `Closed` and `Failed` are terminal for an instance; reconnection
//! constructs a new one. All teardown paths funnel through a single atomic
//! already-closing guard, so concurrent triggers (explicit close racing a
//! socket error) produce exactly one cleanup sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, BackoffPolicy};
use super::framing::{DEFAULT_MAX_PENDING, FrameBuffer, Framing};

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the feed connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Upstream host unreachable or refused the connection.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Target address.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The TCP handshake did not complete within the bounded timeout.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target address.
        addr: String,
        /// The configured bound.
        timeout: Duration,
    },

    /// Socket-level receive failure; terminates the inbound stream.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// Writer exceeded its consecutive-failure budget.
    #[error("write failed {attempts} consecutive times (budget {budget}): {source}")]
    Write {
        /// Consecutive failures observed.
        attempts: u32,
        /// The configured budget.
        budget: u32,
        /// Last underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The connection is closing or closed; no further sends are accepted.
    #[error("connection closed")]
    Closed,
}

// =============================================================================
// State and Events
// =============================================================================

/// Lifecycle state of one connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP handshake in progress.
    Connecting,
    /// Steady state: reading records, draining the outbound queue.
    Open,
    /// Graceful shutdown: outbound queue draining under a grace period.
    Closing,
    /// Terminal: closed cleanly.
    Closed,
    /// Terminal: closed by an unrecoverable error.
    Failed,
}

/// Events emitted by the connection to its owner.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// One complete inbound record (framing already stripped/split).
    Record(String),
    /// The connection closed cleanly (local close or remote EOF).
    Closed,
    /// The connection failed (read error or writer budget exhausted).
    Failed(FeedError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one feed connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upstream host.
    pub host: String,
    /// Upstream port.
    pub port: u16,
    /// Record framing convention.
    pub framing: Framing,
    /// Cap on inbound bytes buffered while waiting for a record delimiter.
    pub max_pending: usize,
    /// Bound on the TCP handshake. The upstream may accept the SYN and then
    /// stall, so an unbounded connect is never allowed.
    pub connect_timeout: Duration,
    /// Consecutive hard write failures tolerated before the writer stops.
    pub write_failure_budget: u32,
    /// Backoff applied when a send is rejected under backpressure.
    pub write_backoff: BackoffConfig,
    /// Grace period for draining the outbound queue during `Closing`.
    pub drain_grace: Duration,
    /// Outbound queue depth.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 81,
            framing: Framing::default(),
            max_pending: DEFAULT_MAX_PENDING,
            connect_timeout: Duration::from_secs(3),
            write_failure_budget: 3,
            write_backoff: BackoffConfig::for_write_retry(0),
            drain_grace: Duration::from_secs(2),
            outbound_capacity: 256,
        }
    }
}

impl ConnectionConfig {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug)]
struct Shared {
    state: parking_lot::RwLock<ConnectionState>,
    closing: AtomicBool,
    reader_cancel: CancellationToken,
    writer_cancel: CancellationToken,
    event_tx: mpsc::Sender<ConnectionEvent>,
    outbound_tx: parking_lot::Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    writer_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    write_failures: Arc<AtomicU32>,
}

impl Shared {
    /// Immediate teardown after a socket or writer failure. Guarded by the
    /// same flag as [`FeedConnection::close`], so the two racing triggers
    /// yield exactly one cleanup.
    async fn fail(&self, error: FeedError) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write() = ConnectionState::Failed;
        self.reader_cancel.cancel();
        self.writer_cancel.cancel();
        self.outbound_tx.lock().take();
        let _ = self.event_tx.send(ConnectionEvent::Failed(error)).await;
    }

    /// Remote EOF: clean close without a drain (there is no peer left to
    /// receive the queue).
    async fn remote_closed(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write() = ConnectionState::Closed;
        self.reader_cancel.cancel();
        self.writer_cancel.cancel();
        self.outbound_tx.lock().take();
        let _ = self.event_tx.send(ConnectionEvent::Closed).await;
    }
}

// =============================================================================
// Connection
// =============================================================================

/// One live upstream connection.
pub struct FeedConnection {
    config: ConnectionConfig,
    shared: Arc<Shared>,
}

impl FeedConnection {
    /// Connect to the upstream feed.
    ///
    /// Enters `Connecting`, performs the TCP handshake under the configured
    /// timeout, and on success transitions to `Open` with the reader and
    /// writer tasks running.
    ///
    /// # Errors
    ///
    /// [`FeedError::Connect`] when the host is unreachable,
    /// [`FeedError::ConnectTimeout`] when the handshake exceeds its bound.
    /// Both are fatal to this instance; reconnection constructs a new one.
    pub async fn connect(
        config: ConnectionConfig,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Self, FeedError> {
        let addr = config.addr();
        tracing::info!(addr = %addr, "Connecting to upstream feed");

        let stream = match tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(FeedError::Connect { addr, source }),
            Err(_) => {
                return Err(FeedError::ConnectTimeout {
                    addr,
                    timeout: config.connect_timeout,
                });
            }
        };

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(config.outbound_capacity);

        let shared = Arc::new(Shared {
            state: parking_lot::RwLock::new(ConnectionState::Open),
            closing: AtomicBool::new(false),
            reader_cancel: CancellationToken::new(),
            writer_cancel: CancellationToken::new(),
            event_tx,
            outbound_tx: parking_lot::Mutex::new(Some(outbound_tx)),
            writer_handle: parking_lot::Mutex::new(None),
            write_failures: Arc::new(AtomicU32::new(0)),
        });

        // Writer task: sole consumer of the outbound queue.
        let writer_shared = Arc::clone(&shared);
        let budget = config.write_failure_budget;
        let write_backoff = config.write_backoff.clone();
        let writer_cancel = shared.writer_cancel.clone();
        let failures = Arc::clone(&shared.write_failures);
        let writer_handle = tokio::spawn(async move {
            if let Err(e) = run_writer(
                write_half,
                outbound_rx,
                budget,
                write_backoff,
                writer_cancel,
                failures,
            )
            .await
            {
                tracing::error!(error = %e, "Feed writer stopped");
                writer_shared.fail(e).await;
            }
        });
        *shared.writer_handle.lock() = Some(writer_handle);

        // Reader task: reassembles records and emits them as events.
        let reader_shared = Arc::clone(&shared);
        let frames = FrameBuffer::with_max_pending(config.framing, config.max_pending);
        tokio::spawn(async move {
            run_reader(read_half, frames, reader_shared).await;
        });

        tracing::info!(addr = %config.addr(), "Upstream feed connected");
        Ok(Self { config, shared })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Consecutive write failures currently recorded.
    #[must_use]
    pub fn write_failures(&self) -> u32 {
        self.shared.write_failures.load(Ordering::SeqCst)
    }

    /// Queue bytes for sending. Never writes synchronously.
    ///
    /// # Errors
    ///
    /// [`FeedError::Closed`] once the connection is closing or closed.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), FeedError> {
        let tx = self
            .shared
            .outbound_tx
            .lock()
            .as_ref()
            .cloned()
            .ok_or(FeedError::Closed)?;
        tx.send(bytes).await.map_err(|_| FeedError::Closed)
    }

    /// Queue a text line for sending.
    ///
    /// # Errors
    ///
    /// [`FeedError::Closed`] once the connection is closing or closed.
    pub async fn send_text(&self, text: &str) -> Result<(), FeedError> {
        self.send(text.as_bytes().to_vec()).await
    }

    /// Gracefully close the connection.
    ///
    /// Stops inbound reads, lets the writer drain the outbound queue within
    /// the configured grace period, then marks the connection `Closed`.
    /// Idempotent: concurrent calls (or a call racing a socket-initiated
    /// close) produce exactly one teardown.
    pub async fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.shared.state.write() = ConnectionState::Closing;
        self.shared.reader_cancel.cancel();

        // Dropping the sender lets the writer observe end-of-queue after the
        // remaining items, which is the drain.
        self.shared.outbound_tx.lock().take();

        let handle = self.shared.writer_handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.config.drain_grace, handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    grace = ?self.config.drain_grace,
                    "Outbound drain exceeded grace period, interrupting writer"
                );
                self.shared.writer_cancel.cancel();
            }
        }

        *self.shared.state.write() = ConnectionState::Closed;
        let _ = self.shared.event_tx.send(ConnectionEvent::Closed).await;
        tracing::info!(addr = %self.config.addr(), "Upstream feed closed");
    }
}

// =============================================================================
// Reader Task
// =============================================================================

async fn run_reader<R>(mut read_half: R, mut frames: FrameBuffer, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            () = shared.reader_cancel.cancelled() => {
                return;
            }
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        tracing::info!("Upstream feed sent EOF");
                        shared.remote_closed().await;
                        return;
                    }
                    Ok(n) => {
                        for record in frames.push(&buf[..n]) {
                            if shared
                                .event_tx
                                .send(ConnectionEvent::Record(record))
                                .await
                                .is_err()
                            {
                                // Owner went away; nothing left to feed.
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream feed read error");
                        shared.fail(FeedError::Read(e)).await;
                        return;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Writer Task
// =============================================================================

/// Drain the outbound queue one item at a time.
///
/// A successful write clears the consecutive-failure counter. A write
/// rejected under backpressure (`WouldBlock`) retries the same item with
/// backoff instead of dropping it. A hard error increments the counter and
/// retries; once the counter exceeds `budget` the item is abandoned and the
/// writer stops with a fatal [`FeedError::Write`].
async fn run_writer<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    budget: u32,
    write_backoff: BackoffConfig,
    cancel: CancellationToken,
    failures: Arc<AtomicU32>,
) -> Result<(), FeedError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let item = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            item = rx.recv() => match item {
                Some(item) => item,
                None => return Ok(()), // queue closed and drained
            },
        };

        let mut backpressure = BackoffPolicy::new(write_backoff.clone());
        loop {
            match write_item(&mut sink, &item).await {
                Ok(()) => {
                    failures.store(0, Ordering::SeqCst);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // OS send buffer full: keep the item, back off, retry.
                    let delay = backpressure
                        .next_delay()
                        .unwrap_or(write_backoff.max_delay);
                    tracing::debug!(delay = ?delay, "Send backpressure, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let attempts = failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempts > budget {
                        return Err(FeedError::Write {
                            attempts,
                            budget,
                            source: e,
                        });
                    }
                    tracing::warn!(
                        attempts,
                        budget,
                        error = %e,
                        "Write failed, abandoning item"
                    );
                    break;
                }
            }
        }
    }
}

async fn write_item<W>(sink: &mut W, item: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(item).await?;
    sink.flush().await
}

// =============================================================================
// Tests
// =============================================================================
