//! Retry logic with exponential backoff for provider calls
//!
//! Only [`Error::Transport`] failures are retried. Validation and
//! configuration errors are returned on the first attempt.

use std::future::Future;
use std::time::Duration;
use backoff::{ExponentialBackoff, backoff::Backoff};
use crate::error::{Error, Result};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.5)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Create an exponential backoff instance
    pub fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            multiplier: self.multiplier,
            randomization_factor: 0.5,
            max_elapsed_time: None, // attempts are bounded by max_retries
            ..Default::default()
        };

        if !self.jitter {
            backoff.randomization_factor = 0.0;
        }

        backoff
    }
}

/// Decision on whether to retry a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay
    Retry { delay: Duration },
    /// Do not retry the request
    NoRetry,
}

/// Tracks attempts and delays for one logical request
#[derive(Debug)]
pub struct RetryHandler {
    policy: RetryPolicy,
    retries: u32,
    backoff: ExponentialBackoff,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        let backoff = policy.create_backoff();
        Self {
            policy,
            retries: 0,
            backoff,
        }
    }

    /// Determine if a request should be retried based on the error
    pub fn should_retry(&mut self, error: &Error) -> RetryDecision {
        if self.retries >= self.policy.max_retries || !error.is_retryable() {
            return RetryDecision::NoRetry;
        }

        self.retries += 1;
        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay);

        RetryDecision::Retry { delay }
    }

    /// Number of retries granted so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Execute an operation, retrying transport failures per `policy`.
///
/// On exhaustion the last transport error is returned.
pub async fn execute_with_retry<F, Fut, T>(mut operation: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut handler = RetryHandler::new(policy.clone());

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match handler.should_retry(&error) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        attempt = handler.retries(),
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::NoRetry => {
                    if error.is_retryable() {
                        tracing::error!(
                            attempts = handler.retries() + 1,
                            error = %error,
                            "Request failed, retries exhausted"
                        );
                    }
                    return Err(error);
                }
            },
        }
    }
}
