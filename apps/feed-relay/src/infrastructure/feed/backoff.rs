//! Retry Backoff Policy
//!
//! Exponential backoff with jitter, shared by the connection writer (retrying
//! a send rejected under backpressure) and by the orchestrator's reconnect
//! loop (building a fresh connection after a terminal failure).

use std::time::Duration;

use rand::Rng;

/// Configuration for backoff behavior.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied after each retry (2.0 doubles the delay).
    pub multiplier: f64,
    /// Jitter fraction (0.1 = plus or minus 10%).
    pub jitter_factor: f64,
    /// Maximum number of retries (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0, // Unlimited
        }
    }
}

impl BackoffConfig {
    /// Policy for the writer's in-place retry of a backpressured send:
    /// short fixed-ish delays, small budget.
    #[must_use]
    pub const fn for_write_retry(budget: u32) -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: budget,
        }
    }
}

/// Backoff policy implementing exponential delay growth with jitter.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl BackoffPolicy {
    /// Create a policy from its configuration.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Next delay to wait before retrying, or `None` once the attempt
    /// budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }

        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            scaled as u128
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Reset after a success.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Retries taken since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether the budget allows another retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = adjusted as u64;
        Duration::from_millis(millis)
    }
}
