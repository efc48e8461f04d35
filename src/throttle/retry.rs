//! Bounded retry with exponential backoff
//!
//! Every attempt passes through the source's rate limiter and is recorded in
//! the session's `AdapterStats`. The final failure is returned to the caller.

use super::cancel::CancellationToken;
use super::rate_limit::RateLimiter;
use crate::source::{AdapterStats, SourceError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub floor_ms: u64,
    /// Upper bound on any single delay.
    pub ceiling_ms: u64,
    /// Growth factor between consecutive delays. Values below 1 are treated as 1.
    pub multiplier: f64,
    /// Retry 4xx responses (other than 429) as well.
    pub retry_client_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            floor_ms: 2_000,
            ceiling_ms: 30_000,
            multiplier: 2.0,
            retry_client_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based):
    /// `min(ceiling, floor * multiplier^(retry - 1))`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let ms = (self.floor_ms as f64 * factor).min(self.ceiling_ms as f64);
        Duration::from_millis(ms.max(self.floor_ms.min(self.ceiling_ms) as f64) as u64)
    }

    pub fn should_retry(&self, err: &SourceError) -> bool {
        if err.is_transient() {
            return true;
        }
        self.retry_client_errors && err.is_client_error()
    }
}

/// Executes network operations under a rate limiter and retry policy.
#[derive(Debug, Clone)]
pub struct RetryingExecutor {
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl RetryingExecutor {
    pub fn new(policy: RetryPolicy, limiter: Arc<RateLimiter>) -> Self {
        Self { policy, limiter }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// `label` only feeds log output. Cancellation aborts the limiter wait,
    /// the attempt in flight, or the backoff sleep.
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        stats: &mut AdapterStats,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            cancel
                .run_until_cancelled(async {
                    self.limiter.acquire().await;
                    Ok(())
                })
                .await?;

            // Attempts are counted when they resolve; cancelled ones are not.
            match cancel.run_until_cancelled(op()).await {
                Ok(value) => {
                    stats.record_attempt();
                    stats.record_success();
                    return Ok(value);
                }
                Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
                Err(e) => {
                    stats.record_attempt();
                    stats.record_failure(e.to_string());
                    if attempt >= max_attempts || !self.policy.should_retry(&e) {
                        tracing::debug!(label, attempt, error = %e, "giving up");
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    cancel
                        .run_until_cancelled(async {
                            tokio::time::sleep(delay).await;
                            Ok(())
                        })
                        .await?;
                    attempt += 1;
                }
            }
        }
    }
}
