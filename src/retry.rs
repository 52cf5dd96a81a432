//! Retry and error capture for outbound network calls.
//!
//! Every call site that talks to the network runs its single request through
//! [`RetryPolicy`]. The policy retries transient failures up to `max_retry`
//! extra times and, once attempts are exhausted, logs the final error instead
//! of propagating it: [`RetryPolicy::run`] returns `None`, which callers treat
//! as "could not complete" rather than as a failure of the whole batch.
//!
//! # Overview
//!
//! A failed attempt is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - timeouts, connection errors, non-2xx statuses
//! - [`FailureType::Permanent`] - local problems a retry cannot fix (bad URL, disk IO)
//!
//! # Example
//!
//! ```
//! use ks_downloader_core::{RequestError, RetryPolicy};
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(2);
//! let value: Option<u32> = policy
//!     .run("https://v.kuaishou.com/abc", || async { Ok::<_, RequestError>(7) })
//!     .await;
//! assert_eq!(value, Some(7));
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::error::RequestError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRY: u32 = 5;

/// Classification of request failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, connection reset, any non-2xx status.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: malformed URL, destination file cannot be written.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Bounded retry policy applied uniformly at every network call site.
///
/// `max_retry` counts retries, so an operation runs at most `max_retry + 1`
/// times. Retries happen back to back unless a delay is configured, in which
/// case up to half the delay is added as jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    max_retry: u32,

    /// Pause between attempts (zero by default).
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRY)
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retry` retries with no delay between attempts.
    #[must_use]
    pub fn new(max_retry: u32) -> Self {
        Self {
            max_retry,
            delay: Duration::ZERO,
        }
    }

    /// Sets a base delay between attempts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the configured number of retries.
    #[must_use]
    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Returns the maximum number of attempts, including the first one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retry.saturating_add(1)
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts()))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts() {
            debug!(attempt, max = self.max_attempts(), "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts()),
            };
        }

        RetryDecision::Retry {
            delay: self.calculate_delay(),
            attempt: attempt + 1,
        }
    }

    /// Runs `operation` until it succeeds or attempts are exhausted.
    ///
    /// On success returns the value together with the number of attempts it
    /// took. On failure returns the last error and the attempt count; nothing
    /// is logged beyond the per-attempt warnings, so callers that need the
    /// error for a report use this and callers that only need the value use
    /// [`Self::run`].
    ///
    /// # Errors
    ///
    /// Returns the final [`RequestError`] and attempt count when no attempt
    /// succeeded.
    pub async fn run_with_error<T, F, Fut>(
        &self,
        target: &str,
        mut operation: F,
    ) -> Result<(T, u32), (RequestError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(target = %target, attempt, "attempting request");

            match operation().await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => match self.should_retry(classify_error(&error), attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        warn!(
                            target = %target,
                            attempt = next_attempt,
                            max_attempts = self.max_attempts(),
                            error = %error,
                            "request failed, retrying"
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(target = %target, %reason, "not retrying request");
                        return Err((error, attempt));
                    }
                },
            }
        }
    }

    /// Runs `operation` with retries and swallows the final error.
    ///
    /// Returns `None` once attempts are exhausted; the error is logged at
    /// warning level with the target so the skip is actionable.
    pub async fn run<T, F, Fut>(&self, target: &str, operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        match self.run_with_error(target, operation).await {
            Ok((value, _)) => Some(value),
            Err((error, attempts)) => {
                warn!(target = %target, attempts, error = %error, "request failed after all attempts");
                None
            }
        }
    }

    fn calculate_delay(&self) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let max_jitter_ms = u64::try_from(self.delay.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

/// Classifies a request error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HttpStatus (any) | Transient |
/// | Timeout | Transient |
/// | Network | Transient |
/// | Io | Permanent |
/// | InvalidUrl | Permanent |
#[must_use]
pub fn classify_error(error: &RequestError) -> FailureType {
    match error {
        RequestError::HttpStatus { .. }
        | RequestError::Timeout { .. }
        | RequestError::Network { .. } => FailureType::Transient,
        RequestError::Io { .. } | RequestError::InvalidUrl { .. } => FailureType::Permanent,
    }
}
