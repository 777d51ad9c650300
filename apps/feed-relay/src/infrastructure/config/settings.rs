//! Relay Configuration Settings
//!
//! Configuration types for the feed relay, loaded from environment variables.

use std::time::Duration;

use crate::infrastructure::feed::{
    BackoffConfig, ConnectionConfig, Credentials, DEFAULT_MAX_PENDING, Framing,
};

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Feed host.
    pub host: String,
    /// Feed port.
    pub port: u16,
    /// Record framing convention.
    pub framing: Framing,
    /// Cap on inbound bytes buffered while waiting for a record delimiter.
    pub max_pending: usize,
    /// Bound on the TCP handshake.
    pub connect_timeout: Duration,
    /// Consecutive hard write failures tolerated before the writer stops.
    pub write_failure_budget: u32,
    /// Grace period for draining the outbound queue on close.
    pub drain_grace: Duration,
    /// Outbound queue depth.
    pub outbound_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 81,
            framing: Framing::Terminator,
            max_pending: DEFAULT_MAX_PENDING,
            connect_timeout: Duration::from_secs(3),
            write_failure_budget: 3,
            drain_grace: Duration::from_secs(2),
            outbound_capacity: 256,
        }
    }
}

impl FeedSettings {
    /// Build the connection config for one connect attempt.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            framing: self.framing,
            max_pending: self.max_pending,
            connect_timeout: self.connect_timeout,
            write_failure_budget: self.write_failure_budget,
            write_backoff: BackoffConfig::for_write_retry(0),
            drain_grace: self.drain_grace,
            outbound_capacity: self.outbound_capacity,
        }
    }
}

/// Reconnect settings for the orchestrator's reconnect loop.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub jitter_factor: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0, // Unlimited
        }
    }
}

impl ReconnectSettings {
    /// The equivalent backoff configuration.
    #[must_use]
    pub const fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.delay_initial,
            max_delay: self.delay_max,
            multiplier: self.delay_multiplier,
            jitter_factor: self.jitter_factor,
            max_attempts: self.max_attempts,
        }
    }
}

/// Window aggregation settings.
#[derive(Debug, Clone)]
pub struct WindowSettings {
    /// Wall-clock span of one window.
    pub interval: Duration,
    /// Item count that closes a window early.
    pub max_count: u64,
    /// Number of recent window rates in the moving average.
    pub moving_avg_depth: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_count: 10_000,
            moving_avg_depth: 10,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (also serves /metrics).
    pub health_port: u16,
    /// Per-channel pub/sub capacity.
    pub bus_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8082,
            bus_capacity: 1024,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Feed credentials.
    pub credentials: Credentials,
    /// Tickers to subscribe on connect.
    pub tickers: Vec<String>,
    /// Ticker-family prefix republished on its own channel.
    pub family_prefix: String,
    /// Reconnect loop settings.
    pub reconnect: ReconnectSettings,
    /// Window aggregation settings.
    pub window: WindowSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = require_env("FEED_TOKEN")?;
        let username = require_env("FEED_USERNAME")?;
        let password = require_env("FEED_PASSWORD")?;
        let host = require_env("FEED_HOST")?;

        let tickers: Vec<String> = std::env::var("FEED_TICKERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        let family_prefix = std::env::var("FEED_FAMILY_PREFIX").unwrap_or_else(|_| "WIN".to_string());

        let framing = std::env::var("FEED_FRAMING")
            .map(|s| Framing::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let feed = FeedSettings {
            host,
            port: parse_env_u16("FEED_PORT", FeedSettings::default().port),
            framing,
            max_pending: parse_env_usize(
                "FEED_MAX_PENDING_BYTES",
                FeedSettings::default().max_pending,
            ),
            connect_timeout: parse_env_duration_secs(
                "FEED_CONNECT_TIMEOUT_SECS",
                FeedSettings::default().connect_timeout,
            ),
            write_failure_budget: parse_env_u32(
                "FEED_WRITE_FAILURE_BUDGET",
                FeedSettings::default().write_failure_budget,
            ),
            drain_grace: parse_env_duration_millis(
                "FEED_DRAIN_GRACE_MS",
                FeedSettings::default().drain_grace,
            ),
            outbound_capacity: parse_env_usize(
                "FEED_OUTBOUND_CAPACITY",
                FeedSettings::default().outbound_capacity,
            ),
        };

        let reconnect = ReconnectSettings {
            delay_initial: parse_env_duration_millis(
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                ReconnectSettings::default().delay_initial,
            ),
            delay_max: parse_env_duration_secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                ReconnectSettings::default().delay_max,
            ),
            delay_multiplier: parse_env_f64(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                ReconnectSettings::default().delay_multiplier,
            ),
            jitter_factor: parse_env_f64(
                "FEED_RECONNECT_JITTER",
                ReconnectSettings::default().jitter_factor,
            ),
            max_attempts: parse_env_u32(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                ReconnectSettings::default().max_attempts,
            ),
        };

        let window = WindowSettings {
            interval: parse_env_duration_millis(
                "FEED_WINDOW_INTERVAL_MS",
                WindowSettings::default().interval,
            ),
            max_count: parse_env_u64("FEED_WINDOW_MAX_COUNT", WindowSettings::default().max_count),
            moving_avg_depth: parse_env_usize(
                "FEED_WINDOW_MOVING_AVG_DEPTH",
                WindowSettings::default().moving_avg_depth,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(
                "FEED_RELAY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
            bus_capacity: parse_env_usize(
                "FEED_RELAY_BUS_CAPACITY",
                ServerSettings::default().bus_capacity,
            ),
        };

        Ok(Self {
            feed,
            credentials: Credentials::new(token, username, password),
            tickers,
            family_prefix,
            reconnect,
            window,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    let value =
        std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
