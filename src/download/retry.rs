//! Failure classification and exponential backoff.
//!
//! Every failed request is classified into a [`FailureType`]; the
//! [`RetryPolicy`] then decides whether another attempt is worth making and
//! how long to wait first.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use myrient_core::download::{
//!     DownloadError, RetryDecision, RetryPolicy, classify_error,
//! };
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
//! let error = DownloadError::http_status("https://example.com/a.zip", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => println!("retry #{attempt} in {delay:?}"),
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::MAX_JITTER;

/// Default attempts per transfer, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Connection reset, timeout, 5xx, early end of body. Retry with backoff.
    Transient,

    /// HTTP 429 or 503 with Retry-After. Retry after the server's delay.
    RateLimited,

    /// Range rejected or remote length changed. Discard partial data and restart once.
    RemoteProtocol,

    /// 404, bad URL, local disk errors. Retrying would not help.
    Permanent,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// The attempt about to be made (1-indexed).
        attempt: u32,
    },
    DoNotRetry {
        reason: String,
    },
}

/// Bounded exponential backoff with jitter.
///
/// ```text
/// delay = min(base * 2^(attempt - 1), cap) + jitter
/// ```
///
/// Jitter is uniform in `0..=min(500ms, base)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Builds the policy from the configured attempts and backoff bounds.
    #[must_use]
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.max_attempts,
            config.backoff_base(),
            config.backoff_cap(),
        )
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = if failure_type == FailureType::RemoteProtocol {
            Duration::ZERO
        } else {
            self.calculate_delay(attempt)
        };
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

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = self.base_delay.as_millis() as f64 * BACKOFF_MULTIPLIER.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let bound = MAX_JITTER.min(self.base_delay).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}

/// Classifies a download error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | 408, 5xx, timeout, network, early end of body | Transient |
/// | 429 | RateLimited |
/// | 416, remote length changed | RemoteProtocol |
/// | other 4xx, bad URL, local IO, catalog | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. } | DownloadError::Truncated { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        DownloadError::RangeRejected { .. } | DownloadError::LengthMismatch { .. } => {
            FailureType::RemoteProtocol
        }
        DownloadError::Io { .. } | DownloadError::InvalidUrl { .. } | DownloadError::Catalog(_) => {
            FailureType::Permanent
        }
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        416 => FailureType::RemoteProtocol,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("certificate") || message.contains("tls") || message.contains("ssl")
}
