//! Readiness probing of the running stack.
//!
//! A probe is healthy when the endpoint answers `200 OK` with a JSON object
//! containing a `status` field. A timeout is reported, never raised: services
//! that are still starting are an expected outcome after a restart.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::retry::{Polled, RetryPolicy};

/// Result of [`HealthProbe::wait_until_healthy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthReport {
    Healthy { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthReport::Healthy { .. })
    }
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    url: String,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(
        url: impl Into<String>,
        policy: RetryPolicy,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            url: url.into(),
            policy,
            client,
        })
    }

    /// One request; `true` when the endpoint reports a status.
    pub async fn check_once(&self) -> bool {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %self.url, error = %err, "Health endpoint unreachable");
                return false;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!(url = %self.url, status = %response.status(), "Health endpoint not ready");
            return false;
        }
        match response.text().await {
            Ok(body) => body_reports_status(&body),
            Err(err) => {
                debug!(url = %self.url, error = %err, "Failed to read health body");
                false
            }
        }
    }

    pub async fn wait_until_healthy(&self) -> HealthReport {
        info!(
            url = %self.url,
            attempts = self.policy.max_attempts,
            budget = %humantime::format_duration(self.policy.budget()),
            "Waiting for services to become healthy"
        );
        let polled = self
            .policy
            .poll("health", move |_| async move {
                self.check_once().await.then_some(())
            })
            .await;
        match polled {
            Polled::Ready { attempts, .. } => {
                info!(url = %self.url, attempts, "Services are healthy");
                HealthReport::Healthy { attempts }
            }
            Polled::Exhausted { attempts } => {
                warn!(
                    url = %self.url,
                    attempts,
                    "Services did not report healthy yet; they may still be starting. \
                     Check with: docker compose ps"
                );
                HealthReport::TimedOut { attempts }
            }
        }
    }
}

/// `true` when `body` is a JSON object with a `status` key.
pub fn body_reports_status(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.as_object().map(|o| o.contains_key("status")))
        .unwrap_or(false)
}
