//! Rate-limited, resumable, concurrent transfers of catalog entries.
//!
//! # Features
//!
//! - Per-host token bucket shared with the crawler
//! - Global and per-host concurrency limits
//! - Byte-range resume from `.part` files, reconciled with the catalog
//! - Restart from zero when the server rejects a range or changes length
//! - Sliding-window throttle detection (a warning, not a failure)
//! - Bounded retries with exponential backoff and Retry-After support
//! - Cooperative cancellation that persists partial progress
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use myrient_core::download::{DownloadManager, HttpClient, RateLimiter};
//! use myrient_core::{Catalog, Config, Database};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let catalog = Catalog::new(Database::new(&config.database_path).await?);
//! let client = HttpClient::new(
//!     config.connect_timeout(),
//!     config.read_timeout(),
//!     &config.user_agent,
//! )?;
//! let limiter = Arc::new(RateLimiter::new(config.bucket_capacity, config.refill_per_sec));
//! let manager = DownloadManager::start(Arc::new(catalog), client, limiter, &config)?;
//! manager.queue(&["https://myrient.erista.me/files/a.zip".to_string()]).await?;
//! manager.wait_idle().await;
//! println!("{:?}", manager.status());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod manager;
pub mod rate_limiter;
mod resume;
mod retry;
mod slots;
mod speed;
mod tracker;
mod transfer;

pub use client::{HttpClient, RangeResponse, parse_content_range};
pub use constants::PARTIAL_SUFFIX;
pub use error::DownloadError;
pub use manager::{DownloadManager, EngineError, QueueReport, SkipReason};
pub use rate_limiter::{RateLimiter, extract_domain, parse_retry_after};
pub use resume::{final_path, on_disk_len, partial_path, reconcile_offset, sanitize_component};
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use slots::HostSlots;
pub use speed::{SpeedMonitor, ThrottleChange};
pub use tracker::{DownloadStatus, DownloadTracker};
pub use transfer::{CompletedTransfer, TransferOutcome, TransferSettings};
