//! Subscriber Fan-out
//!
//! Distributes every upstream record to all registered subscribers. Each
//! subscriber owns an unbounded delivery queue drained by its own delivery
//! task, so a slow or stalled subscriber never delays the others; broadcast
//! itself only enqueues.
//!
//! Push failures are the subscriber's problem, not the feed's: the delivery
//! task logs the failure and keeps going. Disconnecting a subscriber cancels
//! its task and removes it from the registry; hub shutdown does that for
//! every subscriber exactly once, however many times it is triggered.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::PushTransport;

/// Unique identifier for one registered subscriber.
pub type SubscriberId = Uuid;

/// A message sent upstream by a subscriber (e.g. its own `sqt` request).
#[derive(Debug, Clone)]
pub struct ClientMessage {
    /// The subscriber that sent it.
    pub subscriber: SubscriberId,
    /// Payload text.
    pub text: String,
}

// =============================================================================
// Subscriber Handle
// =============================================================================

/// Handed to a subscriber on registration.
///
/// Lets the subscriber send messages up to the relay through the hub-wide
/// client-message channel. Record delivery flows the other way, through the
/// subscriber's [`PushTransport`].
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    client_tx: mpsc::UnboundedSender<ClientMessage>,
}

impl SubscriberHandle {
    /// This subscriber's ID.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Send bytes up to the relay. Non-UTF-8 bytes are replaced lossily.
    pub fn send(&self, bytes: &[u8]) {
        self.send_text(&String::from_utf8_lossy(bytes));
    }

    /// Send text up to the relay. Silently dropped once the hub is gone.
    pub fn send_text(&self, text: &str) {
        let _ = self.client_tx.send(ClientMessage {
            subscriber: self.id,
            text: text.to_string(),
        });
    }
}

// =============================================================================
// Hub
// =============================================================================

struct SubscriberEntry {
    queue: mpsc::UnboundedSender<Arc<str>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Central fan-out hub.
pub struct BroadcastHub {
    subscribers: parking_lot::Mutex<HashMap<SubscriberId, SubscriberEntry>>,
    client_tx: mpsc::UnboundedSender<ClientMessage>,
    client_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ClientMessage>>>,
    shutting_down: AtomicBool,
    shutdown_grace: Duration,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        Self {
            subscribers: parking_lot::Mutex::new(HashMap::new()),
            client_tx,
            client_rx: parking_lot::Mutex::new(Some(client_rx)),
            shutting_down: AtomicBool::new(false),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    /// Take the hub-wide stream of subscriber-to-relay messages.
    ///
    /// Single consumer; returns `None` on the second call.
    #[must_use]
    pub fn client_messages(&self) -> Option<mpsc::UnboundedReceiver<ClientMessage>> {
        self.client_rx.lock().take()
    }

    /// Register a subscriber and spawn its delivery task.
    ///
    /// Returns `None` once the hub is shutting down.
    pub fn register(&self, transport: Arc<dyn PushTransport>) -> Option<SubscriberHandle> {
        let id = Uuid::new_v4();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Arc<str>>();
        let cancel = CancellationToken::new();

        {
            // The flag is read under the registry lock: a racing shutdown
            // either sees this entry in its drain or this call sees the flag.
            let mut subscribers = self.subscribers.lock();
            if self.shutting_down.load(Ordering::SeqCst) {
                return None;
            }
            let task = tokio::spawn(run_delivery(id, transport, queue_rx, cancel.clone()));
            subscribers.insert(
                id,
                SubscriberEntry {
                    queue: queue_tx,
                    cancel,
                    task,
                },
            );
        }
        counter!("relay_subscribers_registered_total").increment(1);
        tracing::info!(subscriber = %id, "Subscriber registered");

        Some(SubscriberHandle {
            id,
            client_tx: self.client_tx.clone(),
        })
    }

    /// Enqueue one record for every live subscriber.
    ///
    /// The registry lock is held only to snapshot the queue senders; the
    /// enqueues happen outside it and never block.
    pub fn broadcast(&self, record: &Arc<str>) {
        let queues: Vec<(SubscriberId, mpsc::UnboundedSender<Arc<str>>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.queue.clone()))
            .collect();

        for (id, queue) in queues {
            if queue.send(Arc::clone(record)).is_err() {
                // Queue closed under us; disconnect handles removal.
                tracing::debug!(subscriber = %id, "Enqueue to closing subscriber skipped");
            }
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Disconnect one subscriber: cancel its delivery task, close its queue,
    /// drop it from the registry. Unknown IDs are a no-op.
    pub async fn unregister(&self, id: SubscriberId) {
        let entry = self.subscribers.lock().remove(&id);
        if let Some(entry) = entry {
            entry.cancel.cancel();
            drop(entry.queue);
            let _ = entry.task.await;
            tracing::info!(subscriber = %id, "Subscriber unregistered");
        }
    }

    /// Shut the hub down: refuse new registrations, cancel every delivery
    /// task, wait out a bounded grace period, release the registry.
    ///
    /// Idempotent: concurrent or repeated calls yield exactly one teardown.
    pub async fn shutdown(&self) {
        // Flag and drain flip together under the registry lock, so no
        // register can slip an entry in between them.
        let entries: Vec<(SubscriberId, SubscriberEntry)> = {
            let mut subscribers = self.subscribers.lock();
            if self.shutting_down.swap(true, Ordering::SeqCst) {
                return;
            }
            subscribers.drain().collect()
        };
        tracing::info!(count = entries.len(), "Broadcast hub shutting down");

        for (_, entry) in &entries {
            entry.cancel.cancel();
        }

        let waits = entries.into_iter().map(|(id, entry)| async move {
            drop(entry.queue);
            if tokio::time::timeout(self.shutdown_grace, entry.task)
                .await
                .is_err()
            {
                tracing::warn!(subscriber = %id, "Delivery task outlived shutdown grace");
            }
        });
        futures_util::future::join_all(waits).await;
    }
}

// =============================================================================
// Delivery Task
// =============================================================================

async fn run_delivery(
    id: SubscriberId,
    transport: Arc<dyn PushTransport>,
    mut queue: mpsc::UnboundedReceiver<Arc<str>>,
    cancel: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            () = cancel.cancelled() => return,
            record = queue.recv() => match record {
                Some(record) => record,
                None => return,
            },
        };

        // The push itself can stall on a slow subscriber; that only ever
        // backs up this subscriber's own queue.
        tokio::select! {
            () = cancel.cancelled() => return,
            result = transport.send_text(&record) => match result {
                Ok(()) => {
                    counter!("relay_broadcast_deliveries_total").increment(1);
                }
                Err(e) => {
                    counter!("relay_broadcast_failures_total").increment(1);
                    tracing::warn!(subscriber = %id, error = %e, "Push failed, continuing");
                }
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
