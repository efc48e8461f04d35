//! Minimum-interval rate limiting
//!
//! A `RateLimiter` spaces grants at least `60 / requests_per_minute` seconds
//! apart on the monotonic clock. The `LimiterRegistry` hands out one limiter
//! per external account so concurrent jobs against the same key share quota.

use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-account minimum-interval throttle.
///
/// `acquire()` is serialized through a fair async mutex: callers are granted
/// in arrival order, and the lock is held across the wait so no two grants
/// can land closer together than the interval.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter. A rate of zero is treated as one request per minute.
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            requests_per_minute: rpm,
            interval: Duration::from_secs_f64(60.0 / f64::from(rpm)),
            last_grant: Mutex::new(None),
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Minimum spacing between two grants.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next request may go out. Never fails.
    pub async fn acquire(&self) {
        let mut last = self.last_grant.lock().await;
        if let Some(prev) = *last {
            let next = prev + self.interval;
            if Instant::now() < next {
                tokio::time::sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Shared limiters keyed by `(source, account)`.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the limiter for `source`/`account`, creating it on first use.
    ///
    /// The rate is fixed by whichever caller creates the entry; later callers
    /// with a different rate get the existing limiter.
    pub fn limiter_for(
        &self,
        source: &str,
        account: &str,
        requests_per_minute: u32,
    ) -> Arc<RateLimiter> {
        let key = format!("{}:{}", source, account);
        self.limiters
            .entry(key)
            .or_insert_with(|| Arc::new(RateLimiter::new(requests_per_minute)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

/// Stable, non-reversible registry key for a credential.
pub fn account_key(secret: &str) -> String {
    let mut hasher = DefaultHasher::new();
    secret.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
