//! Bounded fixed-interval polling shared by every wait loop.

use std::{future::Future, time::Duration};

use serde::Deserialize;
use tokio::time::sleep;
use tracing::trace;

/// Fixed number of attempts separated by a fixed interval. No backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

/// Outcome of [`RetryPolicy::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    Ready { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> Polled<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Polled::Ready { .. })
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Health checks after a restart: 30 attempts, 2s apart.
    pub const fn health_default() -> Self {
        Self::new(30, Duration::from_secs(2))
    }

    /// Waiting for compose services to report running: 45 attempts, 2s apart.
    pub const fn readiness_default() -> Self {
        Self::new(45, Duration::from_secs(2))
    }

    /// Upper bound on the time spent sleeping. Saturates for intervals too
    /// large to add up.
    pub fn budget(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }

    /// Run `attempt` until it yields `Some` or the attempts run out. A policy
    /// with zero attempts still probes once.
    pub async fn poll<T, F, Fut>(&self, what: &str, mut attempt: F) -> Polled<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let max = self.max_attempts.max(1);
        for n in 1..=max {
            if let Some(value) = attempt(n).await {
                return Polled::Ready { value, attempts: n };
            }
            trace!(what, attempt = n, max, "Not ready yet");
            if n < max {
                sleep(self.interval).await;
            }
        }
        Polled::Exhausted { attempts: max }
    }
}

/// `[health]` / `[readiness]` tables in `worqlo-deploy.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicyFile {
    pub attempts: Option<u32>,
    /// Human readable duration such as `"2s"` or `"500ms"`.
    pub interval: Option<String>,
}

impl RetryPolicyFile {
    pub fn apply_to(
        &self,
        base: RetryPolicy,
    ) -> Result<RetryPolicy, humantime::DurationError> {
        let interval = match &self.interval {
            Some(raw) => humantime::parse_duration(raw)?,
            None => base.interval,
        };
        Ok(RetryPolicy {
            max_attempts: self.attempts.unwrap_or(base.max_attempts),
            interval,
        })
    }
}
