//! Retry logic with exponential backoff for transient fetch failures.
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - network errors, timeouts, 5xx
//! - [`FailureType::RateLimited`] - HTTP 429 or a local token-bucket refusal
//! - [`FailureType::Permanent`] - 4xx (except 429), invalid URLs, invalid content
//!
//! The [`RetryPolicy`] then decides whether to retry based on failure type
//! and attempt count, calculating exponential backoff delays with jitter.
//! Retries apply per URL only; there is no cross-source retry pass.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::config::FetcherConfig;

use super::FetchError;

/// Default maximum retry attempts (including the initial attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Backoff multiplier (doubles each attempt).
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of fetch failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, invalid URL, a body that failed PDF validation.
    Permanent,

    /// Server rate limiting (HTTP 429). Retried with backoff, honoring
    /// Retry-After when present.
    RateLimited,
}

/// Decision on whether to retry a failed fetch.
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

/// Classifies a [`FetchError`] into a [`FailureType`].
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::Network { .. } | FetchError::Timeout { .. } => FailureType::Transient,
        FetchError::HttpStatus { status, .. } => match status {
            429 => FailureType::RateLimited,
            500..=599 => FailureType::Transient,
            _ => FailureType::Permanent,
        },
        FetchError::Io { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::InvalidContent { .. }
        | FetchError::Decode { .. } => FailureType::Permanent,
    }
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy from the fetcher configuration.
    #[must_use]
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_secs_f64(config.retry_backoff_s.max(0.0)),
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Creates a policy with a custom `max_attempts`, defaults elsewhere.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed fetch.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry attempt with exponential backoff and jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        // attempt is 1-indexed: attempt 1 gets 1x base, attempt 2 gets 2x, ...
        let exponent = f64::from(attempt - 1);
        let delay_ms = base_ms * BACKOFF_MULTIPLIER.powf(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(capped as u64 + jitter_ms)
    }
}
