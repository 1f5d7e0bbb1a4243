//! Retry classification and backoff.
//!
//! Only connection-level failures and explicit `429 Too Many Requests`
//! responses are retried. Every other status, including 5xx, is terminal.

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

use crate::{ApiResponse, ClientOptions, ContentstackError, Result};

/// What to do with the outcome of one attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the request again after a backoff, if attempts remain.
    Retry,
    /// Hand the outcome to the caller.
    Done,
}

/// Decides which outcomes are retried and how long to wait between attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub wait_min: Duration,
    /// Upper bound for any single wait.
    pub wait_max: Duration,
    /// Spread each wait over `[wait, 1.5 * wait]`, capped at `wait_max`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&ClientOptions::default())
    }
}

impl RetryPolicy {
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            wait_min: options.retry_wait_min,
            wait_max: options.retry_wait_max,
            jitter: options.retry_jitter,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn classify(&self, outcome: &Result<ApiResponse>) -> RetryDecision {
        match outcome {
            Err(ContentstackError::Transport(_)) => RetryDecision::Retry,
            Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
                RetryDecision::Retry
            }
            _ => RetryDecision::Done,
        }
    }

    /// Backoff before retry number `attempt` (1-indexed):
    /// `min(wait_max, wait_min * 2^(attempt - 1))`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let base = self
            .wait_min
            .saturating_mul(1u32 << exp)
            .min(self.wait_max);

        if !self.jitter {
            return base;
        }

        // Upper bound stays below the next attempt's base, keeping waits monotonic.
        let upper = base.saturating_add(base / 2).min(self.wait_max);
        let spread = upper.saturating_sub(base).as_millis() as u64;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Wait before retry number `attempt`, honoring a `Retry-After` header on
    /// the failed response. The header can lengthen the wait up to `wait_max`
    /// but never shortens it.
    pub fn wait_for(&self, attempt: u32, outcome: &Result<ApiResponse>) -> Duration {
        let backoff = self.backoff(attempt);
        let requested = outcome.as_ref().ok().and_then(ApiResponse::retry_after);
        match requested {
            Some(requested) => backoff.max(requested.min(self.wait_max)),
            None => backoff,
        }
    }
}

/// Per-request retry bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct RetryState {
    attempt: u32,
    last_wait: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retries scheduled so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempt >= policy.max_retries
    }

    /// Records a retryable failure and returns how long to wait before the
    /// next attempt. Waits never decrease within one request.
    pub fn next_wait(&mut self, policy: &RetryPolicy, outcome: &Result<ApiResponse>) -> Duration {
        self.attempt += 1;
        let wait = policy.wait_for(self.attempt, outcome).max(self.last_wait);
        self.last_wait = wait;
        wait
    }
}
