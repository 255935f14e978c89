//! Retry classification and exponential backoff for download attempts.
//!
//! Every failed attempt is classified into a [`FailureType`]; the
//! [`RetryPolicy`] then turns `(failure type, attempt number)` into a
//! [`RetryDecision`]. Nothing here sleeps or touches the network, so the
//! decision table can be tested directly.
//!
//! # Example
//!
//! ```
//! use docharvest_core::download::{
//!     DownloadError, FailureType, RetryDecision, RetryPolicy, classify_error,
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/file.pdf", 503);
//! let failure_type = classify_error(&error);
//! assert_eq!(failure_type, FailureType::Transient);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per URL (including the first one).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Jitter window in seconds after a 429.
const RATE_LIMITED_JITTER_SECS: RangeInclusive<f64> = 1.0..=5.0;

/// Jitter window in seconds after server errors and transport failures.
const TRANSIENT_JITTER_SECS: RangeInclusive<f64> = 1.0..=3.0;

/// Classification of a failed download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: 5xx, unexpected status, timeout, connection reset,
    /// empty body written to disk.
    Transient,

    /// Failure that will not change on retry (403, 404, malformed URL).
    Permanent,

    /// Server rate limiting (HTTP 429). Retried with a wider jitter window.
    RateLimited,
}

impl FailureType {
    /// True for failure types that may be retried within the attempt budget.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// Decision on whether to retry a failed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the download after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the download.
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
/// delay = base_delay * multiplier^(attempt - 1) + jitter
/// ```
///
/// `attempt` is the 1-indexed attempt that just failed. Jitter is drawn
/// uniformly from 1 to 5 s after a 429 and from 1 to 3 s otherwise. The
/// exponential part is not capped, so with the defaults the n-th retry waits
/// at least `2^(n-1)` seconds whatever the attempt ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f64,

    /// Whether to add random jitter on top of the exponential component.
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Disables jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
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

        let delay = self.calculate_delay(failure_type, attempt);

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

    /// Returns the exponential component of the delay after `attempt` failed,
    /// without jitter.
    #[must_use]
    pub fn backoff_floor(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    fn calculate_delay(&self, failure_type: FailureType, attempt: u32) -> Duration {
        let floor = self.backoff_floor(attempt);
        if self.jitter {
            floor.saturating_add(calculate_jitter(failure_type))
        } else {
            floor
        }
    }
}

/// Draws jitter from the window that belongs to `failure_type`.
fn calculate_jitter(failure_type: FailureType) -> Duration {
    let window = match failure_type {
        FailureType::RateLimited => RATE_LIMITED_JITTER_SECS,
        FailureType::Transient | FailureType::Permanent => TRANSIENT_JITTER_SECS,
    };
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(window))
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 429 | RateLimited |
/// | HTTP 403, 404 | Permanent |
/// | HTTP ≥ 500 | Transient |
/// | any other status | Transient |
/// | Timeout, Network, Io, EmptyFile | Transient |
/// | InvalidUrl | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. }
        | DownloadError::Network { .. }
        | DownloadError::Io { .. }
        | DownloadError::EmptyFile { .. } => FailureType::Transient,
        DownloadError::InvalidUrl { .. } => FailureType::Permanent,
    }
}

/// Classifies a non-200 HTTP status code.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        429 => FailureType::RateLimited,
        403 | 404 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        // Unexpected codes are treated as transient
        _ => FailureType::Transient,
    }
}
