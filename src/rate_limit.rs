//! Token-bucket admission control for outbound requests.
//!
//! Tokens accumulate at `rate` per second up to `burst`; each request spends
//! one. The bucket starts full so a fresh client can issue `burst` requests
//! without waiting.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{ContentstackError, Result};

#[derive(Debug)]
struct Bucket {
    /// Fractional so partial refills are not lost between acquisitions.
    tokens: f64,
    last_refill: Instant,
}

/// Shared request-rate budget.
///
/// Safe to share between concurrent requests; wrap it in an `Arc` to let
/// several transports draw from one budget.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: u32,
    /// `None` when limiting is disabled.
    bucket: Option<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `rate` requests per second with bursts of
    /// up to `burst`.
    ///
    /// A `rate` of zero (or any non-positive or non-finite value) disables
    /// limiting. `burst` is raised to 1 when limiting is enabled.
    pub fn new(rate: f64, burst: u32) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::disabled();
        }
        let burst = burst.max(1);
        Self {
            rate,
            burst,
            bucket: Some(Mutex::new(Bucket {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            })),
        }
    }

    /// A limiter that admits every request immediately.
    pub fn disabled() -> Self {
        Self {
            rate: 0.0,
            burst: 0,
            bucket: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bucket.is_some()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Waits until a token is available and consumes it.
    ///
    /// Returns [`ContentstackError::Cancelled`] as soon as `cancel` fires
    /// while waiting. A disabled limiter returns immediately.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        loop {
            let Some(wait) = self.take(bucket) else {
                return Ok(());
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                "rate limit budget exhausted, waiting for token"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ContentstackError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Consumes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        match &self.bucket {
            Some(bucket) => self.take(bucket).is_none(),
            None => true,
        }
    }

    /// Tokens currently in the bucket; `f64::INFINITY` when disabled.
    pub fn available(&self) -> f64 {
        match &self.bucket {
            Some(bucket) => {
                let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
                self.refill(&mut bucket);
                bucket.tokens
            }
            None => f64::INFINITY,
        }
    }

    /// Takes one token, or returns how long until the deficit is replenished.
    fn take(&self, bucket: &Mutex<Bucket>) -> Option<Duration> {
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return None;
        }

        let deficit = 1.0 - bucket.tokens;
        Some(Duration::try_from_secs_f64(deficit / self.rate).unwrap_or(Duration::MAX))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let refilled = bucket.tokens + elapsed.as_secs_f64() * self.rate;
        bucket.tokens = refilled.min(f64::from(self.burst));
        bucket.last_refill = now;
    }
}
