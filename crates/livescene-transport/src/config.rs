//! Channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay schedule for reopening the persistent channel.
///
/// The default retries every 2 seconds forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry after a closure.
    pub delay_ms: u64,
    /// Multiplier applied per consecutive failed attempt (1.0 = fixed delay).
    pub backoff: f64,
    /// Upper bound on the delay.
    pub max_delay_ms: Option<u64>,
    /// Give up after this many consecutive attempts.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 2000,
            backoff: 1.0,
            max_delay_ms: None,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, unlimited attempts.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` to give up.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled = self.delay_ms as f64 * self.backoff.max(1.0).powi(exponent);
        let capped = self
            .max_delay_ms
            .map_or(scaled, |max| scaled.min(max as f64));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = capped.max(0.0).round() as u64;
        Some(Duration::from_millis(millis))
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Persistent channel endpoint.
    pub ws_url: String,
    /// Base URL for the `/generate` and `/modify` fallback endpoints.
    pub http_base_url: String,
    pub reconnect: ReconnectPolicy,
    /// Per-request timeout; `None` waits indefinitely.
    pub request_timeout_ms: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8000/ws".to_string(),
            http_base_url: "http://127.0.0.1:8000".to_string(),
            reconnect: ReconnectPolicy::default(),
            request_timeout_ms: None,
        }
    }
}

impl ChannelConfig {
    /// Config for a service at `host:port` (no scheme).
    #[must_use]
    pub fn for_host(authority: &str) -> Self {
        Self {
            ws_url: format!("ws://{authority}/ws"),
            http_base_url: format!("http://{authority}"),
            ..Self::default()
        }
    }

    /// Per-request timeout, if configured.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
