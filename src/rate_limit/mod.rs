//! Fixed-window limiter for redemption attempts, keyed by client identity.

mod memory;
mod redis_counter;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub use memory::MemoryCounterStore;
pub use redis_counter::RedisCounterStore;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Count in the current window after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window closes and the count starts over.
    pub resets_in: Duration,
}

/// Shared counter store. `hit` must increment and, only when the increment opens a
/// fresh window, set the window expiry, all as one atomic operation.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    max_attempts: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, max_attempts: u64, window: Duration) -> Self {
        Self { store, max_attempts, window }
    }

    /// Count one redemption attempt for `client_id`.
    ///
    /// Backend failures allow the request: an unreachable counter store must not take
    /// downloads offline with it.
    pub async fn check(&self, client_id: &str) -> RateLimitDecision {
        let key = format!("rate_limit:download:{client_id}");

        match self.store.hit(&key, self.window).await {
            Ok(window) if window.count > self.max_attempts => {
                let retry_after_secs = ceil_secs(window.resets_in).max(1);
                warn!(
                    "Rate limit exceeded for {}: {} attempts, retry in {}s",
                    client_id, window.count, retry_after_secs
                );
                RateLimitDecision::Deny { retry_after_secs }
            }
            Ok(_) => RateLimitDecision::Allow,
            Err(e) => {
                warn!("Rate limiter unavailable, allowing request: {}", e);
                RateLimitDecision::Allow
            }
        }
    }

    /// Human-readable explanation for a denied client.
    pub fn denial_message(&self, retry_after_secs: u64) -> String {
        format!(
            "You have exceeded the download limit of {} attempts per {}. Please try again in {}.",
            self.max_attempts,
            describe_window(self.window.as_secs()),
            describe_wait(retry_after_secs),
        )
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

fn describe_window(secs: u64) -> String {
    match secs {
        3600 => "hour".to_string(),
        60 => "minute".to_string(),
        s if s % 3600 == 0 => plural(s / 3600, "hour"),
        s if s % 60 == 0 => plural(s / 60, "minute"),
        s => plural(s, "second"),
    }
}

fn describe_wait(secs: u64) -> String {
    if secs < 60 {
        plural(secs, "second")
    } else {
        plural(secs.div_ceil(60), "minute")
    }
}
