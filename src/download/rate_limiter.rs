//! Per-host token-bucket rate limiting.
//!
//! Every outbound request to a host, whether a crawler listing fetch or a
//! download range request, takes one token from that host's bucket first.
//! Buckets start full, hold at most `capacity` tokens and refill continuously
//! at `refill_per_sec`, so over any window of `t` seconds a host sees at most
//! `capacity + refill_per_sec * t` requests no matter how many workers share
//! the limiter.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use myrient_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(3, 1.0));
//!
//! // The first three requests to a host proceed immediately
//! for i in 0..3 {
//!     limiter.acquire(&format!("https://example.com/{i}")).await;
//! }
//!
//! // The fourth waits about a second for a token
//! limiter.acquire("https://example.com/3").await;
//!
//! // Other hosts have their own bucket
//! limiter.acquire("https://other.com/file.zip").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_WAIT_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Per-host token-bucket rate limiter.
///
/// Shared behind an `Arc` by the crawler and the download manager. Bucket state
/// lives in a `DashMap` of `Arc`s so the map shard lock is released before
/// awaiting on a bucket.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    hosts: DashMap<String, Arc<HostBucket>>,
}

#[derive(Debug)]
struct HostBucket {
    /// Held across the token wait so waiters are served in arrival order.
    state: Mutex<BucketState>,
    cumulative_wait_ms: AtomicU64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// Set from a server's Retry-After; no token is granted before it.
    blocked_until: Option<Instant>,
}

impl HostBucket {
    fn new(capacity: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                blocked_until: None,
            }),
            cumulative_wait_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_wait(&self, wait: Duration) -> Duration {
        let wait_ms = wait.as_millis() as u64;
        let total = self.cumulative_wait_ms.fetch_add(wait_ms, Ordering::SeqCst) + wait_ms;
        Duration::from_millis(total)
    }
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64, refill_per_sec: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Creates a limiter with the given per-host bucket capacity and refill rate.
    ///
    /// A capacity below one is raised to one; a non-positive or non-finite
    /// refill rate is treated as one token per second. Configuration
    /// validation rejects both before this point.
    #[must_use]
    #[instrument(level = "debug")]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let refill_per_sec = if refill_per_sec.is_finite() && refill_per_sec > 0.0 {
            refill_per_sec
        } else {
            1.0
        };
        debug!("creating rate limiter");
        Self {
            capacity: f64::from(capacity.max(1)),
            refill_per_sec,
            hosts: DashMap::new(),
        }
    }

    /// Bucket capacity per host.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second per host.
    #[must_use]
    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    fn bucket(&self, host: &str) -> Arc<HostBucket> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostBucket::new(self.capacity)))
            .clone()
    }

    /// Waits for and consumes one token for the URL's host.
    ///
    /// Returns how long the caller waited.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) -> Duration {
        let host = extract_domain(url);
        tracing::Span::current().record("host", &host);

        let bucket = self.bucket(&host);
        let started = Instant::now();
        let mut state = bucket.state.lock().await;

        loop {
            let now = Instant::now();
            if let Some(until) = state.blocked_until {
                if until > now {
                    tokio::time::sleep_until(until).await;
                    continue;
                }
                state.blocked_until = None;
            }

            state.refill(now, self.capacity, self.refill_per_sec);
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                break;
            }

            let deficit = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec)
                .max(Duration::from_millis(1));
            tokio::time::sleep(wait).await;
        }
        drop(state);

        let waited = started.elapsed();
        if !waited.is_zero() {
            let cumulative = bucket.add_cumulative_wait(waited);
            debug!(
                host = %host,
                wait_ms = waited.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "waited for rate limit token"
            );
            if cumulative >= CUMULATIVE_WAIT_WARNING_THRESHOLD {
                warn!(
                    host = %host,
                    cumulative_wait_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider lowering concurrency for this host"
                );
            }
        }
        waited
    }

    /// Applies a server-mandated pause (from Retry-After) to the URL's host.
    ///
    /// Drains the bucket and blocks it until the delay has elapsed, so every
    /// worker talking to the host backs off, not only the one that was told to.
    #[instrument(skip(self), fields(host))]
    pub async fn penalize(&self, url: &str, delay: Duration) {
        let host = extract_domain(url);
        tracing::Span::current().record("host", &host);

        let delay = delay.min(MAX_RETRY_AFTER);
        let bucket = self.bucket(&host);
        let mut state = bucket.state.lock().await;
        let until = Instant::now() + delay;
        state.blocked_until = Some(state.blocked_until.map_or(until, |current| current.max(until)));
        state.tokens = 0.0;
        drop(state);

        let cumulative = bucket.add_cumulative_wait(delay);
        debug!(
            host = %host,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_WAIT_WARNING_THRESHOLD {
            warn!(
                host = %host,
                cumulative_wait_secs = cumulative.as_secs(),
                "excessive server rate limiting - host may be under heavy load"
            );
        }
    }
}

/// Extracts the lowercase host from a URL.
///
/// Returns "unknown" for malformed URLs so they still share one bucket.
///
/// # Examples
///
/// ```
/// use myrient_core::download::extract_domain;
///
/// assert_eq!(extract_domain("https://myrient.erista.me/files/"), "myrient.erista.me");
/// assert_eq!(extract_domain("http://Example.COM/Path"), "example.com");
/// assert_eq!(extract_domain("https://localhost:8080/x"), "localhost");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value.
///
/// Accepts integer seconds or an HTTP-date. Values above one hour are capped;
/// dates in the past yield zero; anything else yields `None`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use myrient_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
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
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
