//! Token-bucket rate limiting for outbound marketplace requests.
//!
//! Each named bucket (e.g. `"dhgate-detail"`) is created lazily from the
//! scrape config on first use and lives for the lifetime of the limiter.
//! Refill and consumption happen inside one critical section so concurrent
//! fetches against the same bucket never observe a half-applied refill.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use wsdb_core::{BucketConfig, ScrapeConfig};

use crate::error::ScraperError;

/// Source of monotonic time, injectable so tests can drive refill manually.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// A full bucket sized by `config`.
    #[must_use]
    pub fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            tokens: config.capacity,
            last_refill_at: now,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn projected_tokens(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill_at).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.projected_tokens(now);
        // A clock that goes backwards must not rewind the refill origin.
        if now > self.last_refill_at {
            self.last_refill_at = now;
        }
    }

    /// Refills, then removes `n` tokens if the bucket holds at least `n`.
    /// On `false` the token count is left at its refilled value.
    pub fn try_remove_tokens(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);
        if n < 0.0 || n > self.tokens {
            return false;
        }
        self.tokens -= n;
        true
    }

    /// Milliseconds until the bucket holds at least one token; `0` if it
    /// already does.
    #[must_use]
    pub fn estimated_wait_ms(&self, now: Instant) -> u64 {
        let tokens = self.projected_tokens(now);
        if tokens >= 1.0 {
            return 0;
        }
        let wait = (1.0 - tokens) / self.refill_rate * 1000.0;
        // Always positive and bounded by capacity / refill_rate.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = wait.ceil() as u64;
        ms.max(1)
    }
}

/// Named token buckets shared by every adapter in the process.
pub struct RateLimiter {
    config: ScrapeConfig,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: ScrapeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: ScrapeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn with_bucket<T>(&self, name: &str, f: impl FnOnce(&mut TokenBucket, Instant) -> T) -> T {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(name.to_owned())
            .or_insert_with(|| TokenBucket::new(self.config.bucket(name), now));
        f(bucket, now)
    }

    /// Atomically refills `bucket` and removes `n` tokens if available.
    pub fn try_remove_tokens(&self, bucket: &str, n: f64) -> bool {
        self.with_bucket(bucket, |b, now| b.try_remove_tokens(n, now))
    }

    #[must_use]
    pub fn estimated_wait_ms(&self, bucket: &str) -> u64 {
        self.with_bucket(bucket, |b, now| b.estimated_wait_ms(now))
    }

    /// Current token count of `bucket`, refilled to now.
    #[must_use]
    pub fn tokens(&self, bucket: &str) -> f64 {
        self.with_bucket(bucket, |b, now| {
            b.refill(now);
            b.tokens()
        })
    }

    /// Takes one token or reports how long to back off.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::RateLimited`] when the bucket is exhausted.
    pub fn check(&self, bucket: &str) -> Result<(), ScraperError> {
        self.with_bucket(bucket, |b, now| {
            if b.try_remove_tokens(1.0, now) {
                Ok(())
            } else {
                Err(ScraperError::RateLimited {
                    bucket: bucket.to_owned(),
                    retry_after_ms: b.estimated_wait_ms(now),
                })
            }
        })
    }

    /// Waits until one token can be taken from `bucket`, then takes it.
    pub async fn acquire(&self, bucket: &str) {
        loop {
            match self.check(bucket) {
                Ok(()) => return,
                Err(ScraperError::RateLimited { retry_after_ms, .. }) => {
                    tracing::debug!(bucket, retry_after_ms, "rate bucket exhausted; waiting");
                    tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                }
                Err(_) => return,
            }
        }
    }
}
