//! Retry with exponential backoff for transient fetch failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying fetch errors, plus the [`with_retry`] combinator that wraps a
//! fallible async operation.
//!
//! # Overview
//!
//! When a fetch fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//! - [`FailureType::RateLimited`] - Server rate limiting (retries with backoff)
//!
//! [`with_retry`] makes the retry boundary explicit and testable: it takes a
//! `Result`-returning operation and a policy, acquires the service's rate
//! limit before every attempt, sleeps `base_delay * factor^attempt` (with
//! jitter, capped) between retryable failures, honors Retry-After when the
//! server sent one, and returns the last error once attempts are exhausted.
//! Permanent failures propagate immediately.
//!
//! # Example
//!
//! ```no_run
//! use pubminer_core::config::RetryConfig;
//! use pubminer_core::download::{RetryPolicy, ServiceRateLimiter, with_retry};
//!
//! # async fn example(client: pubminer_core::download::HttpClient) {
//! let policy = RetryPolicy::from_config(&RetryConfig::default());
//! let limiter = ServiceRateLimiter::unlimited();
//!
//! let page = with_retry(&policy, &limiter, "pubmed", || {
//!     client.get_text("https://example.com/article", None)
//! })
//! .await;
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use super::error::FetchError;
use super::rate_limiter::ServiceRateLimiter;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Maximum honored Retry-After value (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Classification of fetch failure types.
///
/// Used to determine whether a failed call should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 400 Bad Request, invalid URL, invalid
    /// downloaded content.
    Permanent,

    /// Server rate limiting (HTTP 429). Retries with backoff, preferring the
    /// server's Retry-After delay when present.
    RateLimited,
}

/// Decision on whether to retry a failed call.
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

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * factor^(attempt-1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&crate::config::RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Builds a policy from its validated configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }

    /// Creates a policy with a custom attempt cap, defaults elsewhere.
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

    /// Determines whether to retry a failed call.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
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
        let factor = f64::from(self.backoff_factor);

        // attempt is 1-indexed; attempt 1 retries after base * factor^0
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * factor.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capped = Duration::from_millis(capped_ms as u64);
        capped + jitter()
    }
}

/// Generates random jitter between 0 and [`MAX_JITTER`].
///
/// Jitter spreads simultaneous retries so a burst of failures does not
/// reconverge on the same instant.
#[allow(clippy::cast_possible_truncation)]
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Classifies a fetch error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 400 | Permanent | Bad request - won't succeed on retry |
/// | 401/403 | Permanent | Access denied - retrying unauthenticated won't help |
/// | 404 | Permanent | Not found - resource doesn't exist |
/// | 408 | Transient | Request timeout - may succeed |
/// | 410 | Permanent | Gone - permanently removed |
/// | 429 | RateLimited | Too many requests - retry with backoff |
/// | 5xx | Transient | Server-side trouble - may be temporary |
///
/// # Non-HTTP Errors
///
/// Timeouts and most network errors are transient; TLS/certificate problems,
/// IO errors, invalid URLs, undecodable bodies, and content-validation
/// failures are permanent.
#[instrument]
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),

        FetchError::Timeout { .. } => FailureType::Transient,

        FetchError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        FetchError::BadBody { .. }
        | FetchError::InvalidContent { .. }
        | FetchError::Io { .. }
        | FetchError::InvalidUrl { .. } => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code into a failure type.
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports both RFC 7231 formats:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2026 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            // Date is in the past
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

/// Extracts a usable Retry-After delay from a rate-limited error.
fn retry_after_delay(error: &FetchError) -> Option<Duration> {
    let FetchError::HttpStatus {
        retry_after: Some(value),
        ..
    } = error
    else {
        return None;
    };
    parse_retry_after(value)
}

/// Runs an operation with rate limiting and retry-on-transient-failure.
///
/// Before every attempt the named service's rate limit is acquired (retries
/// are calls too). On a retryable failure the combinator sleeps the backoff
/// delay (or the server's Retry-After, when present and parseable) and tries
/// again; on a permanent failure or once attempts are exhausted, the last
/// error is returned.
///
/// # Errors
///
/// Returns the final [`FetchError`] after the last failed attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &ServiceRateLimiter,
    service: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        limiter.acquire(service).await;

        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let failure_type = classify_error(&error);
                let server_delay = if failure_type == FailureType::RateLimited {
                    retry_after_delay(&error)
                } else {
                    None
                };

                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay: backoff_delay,
                        attempt: next_attempt,
                    } => {
                        let delay = server_delay.unwrap_or(backoff_delay);
                        info!(
                            service,
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            using_retry_after = server_delay.is_some(),
                            error = %error,
                            "retrying call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(service, %reason, "not retrying call");
                        return Err(error);
                    }
                }
            }
        }
    }
}
