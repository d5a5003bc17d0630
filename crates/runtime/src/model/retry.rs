//! Backoff for transient model backend failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Retry schedule applied when a backend reports
/// [`ModelError::Unavailable`](super::ModelError::Unavailable).
///
/// Delays grow geometrically from `initial_backoff_ms` and are capped at
/// `max_backoff_ms`. `max_attempts` counts the first call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: u32,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            multiplier: 2,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Never retry.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(retry.saturating_sub(1));
        let millis = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.max_backoff_ms))
    }
}

/// Sleep for `delay` unless the invocation is cancelled first.
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
