//! Window Aggregator
//!
//! Drives the throughput windows of [`crate::domain::window`]: one window
//! per fixed wall-clock interval, or earlier once the window reaches its
//! maximum item count, whichever comes first. An idle feed still emits
//! (empty) windows on every tick.
//!
//! Completed windows are validated and published as JSON on the `metrics`
//! pub/sub channel; invalid ones (clock skew, arithmetic errors) are dropped
//! and never retried. On cancellation the current partial window is flushed
//! before the task exits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::PubSub;
use crate::domain::window::{MovingAverage, WindowBuilder};

/// Pub/sub channel completed windows are published on.
pub const METRICS_CHANNEL: &str = "metrics";

/// Configuration for the window aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Wall-clock span of one window.
    pub interval: Duration,
    /// Item count that closes a window early.
    pub max_count: u64,
    /// Number of recent window rates in the moving average.
    pub moving_avg_depth: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_count: 10_000,
            moving_avg_depth: 10,
        }
    }
}

/// Cheap handle for reporting one processed record into the current window.
#[derive(Debug, Clone)]
pub struct WindowSampler {
    tx: mpsc::UnboundedSender<Duration>,
}

impl WindowSampler {
    /// Record one processed message and its measured processing time.
    /// Silently dropped once the aggregator is gone.
    pub fn record(&self, processing_time: Duration) {
        let _ = self.tx.send(processing_time);
    }
}

/// Running window aggregator task.
pub struct WindowAggregator {
    sampler: WindowSampler,
    task: JoinHandle<()>,
}

impl WindowAggregator {
    /// Spawn the aggregator task.
    #[must_use]
    pub fn spawn(
        config: AggregatorConfig,
        pubsub: Arc<dyn PubSub>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_aggregator(config, rx, pubsub, cancel));
        Self {
            sampler: WindowSampler { tx },
            task,
        }
    }

    /// A sampler handle for the record pipeline.
    #[must_use]
    pub fn sampler(&self) -> WindowSampler {
        self.sampler.clone()
    }

    /// Wait for the task to finish (after its token was cancelled).
    pub async fn join(self) {
        drop(self.sampler);
        let _ = self.task.await;
    }
}

// =============================================================================
// Driver Task
// =============================================================================

async fn run_aggregator(
    config: AggregatorConfig,
    mut samples: mpsc::UnboundedReceiver<Duration>,
    pubsub: Arc<dyn PubSub>,
    cancel: CancellationToken,
) {
    let mut avg = MovingAverage::new(config.moving_avg_depth);
    let mut builder = WindowBuilder::new(Utc::now());
    let mut opened = Instant::now();

    let mut ticker = tokio::time::interval_at(opened + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Flush the partial window before exiting.
                publish_window(builder, opened.elapsed(), &mut avg, pubsub.as_ref()).await;
                return;
            }
            _ = ticker.tick() => {
                let closed = std::mem::replace(&mut builder, WindowBuilder::new(Utc::now()));
                let elapsed = std::mem::replace(&mut opened, Instant::now()).elapsed();
                publish_window(closed, elapsed, &mut avg, pubsub.as_ref()).await;
            }
            sample = samples.recv() => match sample {
                Some(processing_time) => {
                    builder.record(processing_time);
                    if builder.count() >= config.max_count {
                        let closed =
                            std::mem::replace(&mut builder, WindowBuilder::new(Utc::now()));
                        let elapsed = std::mem::replace(&mut opened, Instant::now()).elapsed();
                        publish_window(closed, elapsed, &mut avg, pubsub.as_ref()).await;
                        ticker.reset();
                    }
                }
                None => {
                    publish_window(builder, opened.elapsed(), &mut avg, pubsub.as_ref()).await;
                    return;
                }
            },
        }
    }
}

async fn publish_window(
    builder: WindowBuilder,
    elapsed: Duration,
    avg: &mut MovingAverage,
    pubsub: &dyn PubSub,
) {
    let window = builder.finish(Utc::now(), elapsed, avg);
    if !window.is_valid(Utc::now()) {
        counter!("relay_windows_dropped_total").increment(1);
        tracing::warn!(?window, "Dropping invalid window");
        return;
    }

    gauge!("relay_window_rate").set(window.rate);
    gauge!("relay_window_moving_avg_rate").set(window.moving_avg_rate);
    gauge!("relay_window_avg_latency_us").set(window.avg_latency_us);
    counter!("relay_windows_published_total").increment(1);

    match serde_json::to_string(&window) {
        Ok(json) => {
            if let Err(e) = pubsub.publish(METRICS_CHANNEL, &json).await {
                tracing::warn!(error = %e, "Window publish failed");
            }
        }
        Err(e) => tracing::error!(error = %e, "Window serialization failed"),
    }

    tracing::debug!(
        count = window.count,
        rate = window.rate,
        moving_avg = window.moving_avg_rate,
        "Window closed"
    );
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::{broadcast, mpsc as tokio_mpsc};

    use super::*;
    use crate::application::ports::PortError;

    struct ProbeBus {
        tx: tokio_mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl PubSub for ProbeBus {
        async fn publish(&self, channel: &str, payload: &str) -> Result<(), PortError> {
            self.tx
                .send((channel.to_string(), payload.to_string()))
                .map_err(|e| PortError::Delivery(e.to_string()))
        }

        fn subscribe(&self, _channel: &str) -> broadcast::Receiver<String> {
            broadcast::channel(1).1
        }
    }

    fn probe_bus() -> (
        Arc<ProbeBus>,
        tokio_mpsc::UnboundedReceiver<(String, String)>,
    ) {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        (Arc::new(ProbeBus { tx }), rx)
    }

    fn window_json(payload: &str) -> serde_json::Value {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn interval_tick_closes_window_with_sample_count() {
        let (bus, mut rx) = probe_bus();
        let cancel = CancellationToken::new();
        let agg = WindowAggregator::spawn(AggregatorConfig::default(), bus, cancel.clone());

        let sampler = agg.sampler();
        for _ in 0..10 {
            sampler.record(Duration::from_micros(15));
        }

        let (channel, payload) = rx.recv().await.unwrap();
        assert_eq!(channel, METRICS_CHANNEL);
        let window = window_json(&payload);
        assert_eq!(window["count"], 10);
        assert!((window["avg_latency_us"].as_f64().unwrap() - 15.0).abs() < 0.01);

        cancel.cancel();
        agg.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_feed_still_emits_windows() {
        let (bus, mut rx) = probe_bus();
        let cancel = CancellationToken::new();
        let agg = WindowAggregator::spawn(AggregatorConfig::default(), bus, cancel.clone());

        let (_, payload) = rx.recv().await.unwrap();
        let window = window_json(&payload);
        assert_eq!(window["count"], 0);
        assert_eq!(window["avg_latency_us"], 0.0);

        cancel.cancel();
        agg.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn max_count_closes_window_early() {
        let (bus, mut rx) = probe_bus();
        let cancel = CancellationToken::new();
        let config = AggregatorConfig {
            interval: Duration::from_secs(3600),
            max_count: 5,
            moving_avg_depth: 10,
        };
        let agg = WindowAggregator::spawn(config, bus, cancel.clone());

        let sampler = agg.sampler();
        for _ in 0..5 {
            sampler.record(Duration::from_micros(10));
        }

        let (_, payload) = rx.recv().await.unwrap();
        assert_eq!(window_json(&payload)["count"], 5);

        cancel.cancel();
        agg.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_flushes_partial_window() {
        let (bus, mut rx) = probe_bus();
        let cancel = CancellationToken::new();
        let agg = WindowAggregator::spawn(AggregatorConfig::default(), bus, cancel.clone());

        let sampler = agg.sampler();
        for _ in 0..3 {
            sampler.record(Duration::from_micros(10));
        }
        // Let the task drain the samples before cancelling.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        cancel.cancel();
        agg.join().await;

        let (_, payload) = rx.recv().await.unwrap();
        assert_eq!(window_json(&payload)["count"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn moving_average_converges_on_constant_rate() {
        let (bus, mut rx) = probe_bus();
        let cancel = CancellationToken::new();
        let agg = WindowAggregator::spawn(AggregatorConfig::default(), bus, cancel.clone());
        let sampler = agg.sampler();

        let mut last_moving_avg = 0.0;
        for _ in 0..20 {
            for _ in 0..100 {
                sampler.record(Duration::from_micros(5));
            }
            let (_, payload) = rx.recv().await.unwrap();
            last_moving_avg = window_json(&payload)["moving_avg_rate"].as_f64().unwrap();
        }

        // 100 records per 1 s window, over 20 windows with depth 10.
        assert!(
            (last_moving_avg - 100.0).abs() < 1.0,
            "moving average {last_moving_avg} did not converge to 100"
        );

        cancel.cancel();
        agg.join().await;
    }
}
