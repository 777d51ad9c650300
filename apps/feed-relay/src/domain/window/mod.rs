//! Aggregation Window Types
//!
//! A `Window` summarizes one completed aggregation interval of the feed:
//! message count, throughput rate, a moving average of recent rates, and the
//! average per-message processing latency. Windows are immutable once built
//! and are validated before publication so that clock skew or arithmetic
//! errors never propagate downstream.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Tolerance for window timestamps ahead of the wall clock.
pub const FUTURE_SKEW_TOLERANCE: Duration = Duration::from_secs(1);

// =============================================================================
// Window Record
// =============================================================================

/// One completed aggregation interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    /// Interval start.
    pub started_at: DateTime<Utc>,
    /// Interval end.
    pub ended_at: DateTime<Utc>,
    /// Messages counted in this interval.
    pub count: u64,
    /// Throughput in messages per second (count / interval seconds).
    pub rate: f64,
    /// Arithmetic mean of the rates of the last N completed windows.
    pub moving_avg_rate: f64,
    /// Average per-message processing latency in microseconds
    /// (0 when the window is empty).
    pub avg_latency_us: f64,
}

impl Window {
    /// Check a window before publication.
    ///
    /// Rejects negative counts or rates (arithmetic errors), non-finite
    /// latency, and windows whose start lies more than
    /// [`FUTURE_SKEW_TOLERANCE`] in the future (clock skew). Rejected
    /// windows are dropped, not retried.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if !self.rate.is_finite() || self.rate < 0.0 {
            return false;
        }
        if !self.moving_avg_rate.is_finite() || self.moving_avg_rate < 0.0 {
            return false;
        }
        if !self.avg_latency_us.is_finite() || self.avg_latency_us < 0.0 {
            return false;
        }
        let skew = self.started_at - now;
        if skew > chrono::Duration::from_std(FUTURE_SKEW_TOLERANCE).unwrap_or_default() {
            return false;
        }
        true
    }
}

// =============================================================================
// Moving Average
// =============================================================================

/// Bounded moving average over the last N window rates.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    rates: VecDeque<f64>,
    depth: usize,
}

impl MovingAverage {
    /// Create a moving average over the last `depth` values.
    /// A zero depth is treated as 1.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            rates: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Push a new rate, evicting the oldest beyond the configured depth,
    /// and return the mean of the retained values.
    pub fn push(&mut self, rate: f64) -> f64 {
        self.rates.push_back(rate);
        if self.rates.len() > self.depth {
            self.rates.pop_front();
        }
        self.mean()
    }

    /// Mean of the retained values (0 when empty).
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.rates.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let len = self.rates.len() as f64;
        self.rates.iter().sum::<f64>() / len
    }

    /// Number of retained values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Whether no values have been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

// =============================================================================
// Window Builder
// =============================================================================

/// Accumulates one in-progress window.
#[derive(Debug)]
pub struct WindowBuilder {
    started_at: DateTime<Utc>,
    count: u64,
    total_latency: Duration,
}

impl WindowBuilder {
    /// Start a new window at `started_at`.
    #[must_use]
    pub const fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            count: 0,
            total_latency: Duration::ZERO,
        }
    }

    /// Record one processed message and its measured processing time.
    pub fn record(&mut self, processing_time: Duration) {
        self.count += 1;
        self.total_latency += processing_time;
    }

    /// Messages recorded so far.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Close the window at `ended_at`, folding its rate into `avg`.
    ///
    /// `elapsed` is the measured wall-clock span of the window (the driver
    /// measures it monotonically), so early closes (max item count reached)
    /// report their true throughput.
    #[must_use]
    pub fn finish(self, ended_at: DateTime<Utc>, elapsed: Duration, avg: &mut MovingAverage) -> Window {
        let secs = elapsed.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let rate = if secs > 0.0 { self.count as f64 / secs } else { 0.0 };

        #[allow(clippy::cast_precision_loss)]
        let avg_latency_us = if self.count == 0 {
            0.0
        } else {
            self.total_latency.as_micros() as f64 / self.count as f64
        };

        Window {
            started_at: self.started_at,
            ended_at,
            count: self.count,
            rate,
            moving_avg_rate: avg.push(rate),
            avg_latency_us,
        }
    }
}
