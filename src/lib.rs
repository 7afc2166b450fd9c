//! Myrient-DL Core Library
//!
//! Crawls the HTML directory listings of a large public file archive into a
//! local SQLite catalog, searches it, and downloads selected files politely:
//! per-host rate limiting, bounded concurrency, resumable range transfers,
//! throttle detection and zip integrity checks.
//!
//! # Architecture
//!
//! - [`db`] - Database connection and schema management
//! - [`catalog`] - Collections, entries and transfer state
//! - [`classify`] - Collection, console, region and format rules
//! - [`crawler`] - Listing crawler and crawl state
//! - [`search`] - Normalization, fuzzy ranking and selection ranges
//! - [`download`] - HTTP client, rate limiting and the download manager
//! - [`verify`] - Zip/TorrentZip member checksum verification
//! - [`context`] - The handle front ends hold to call all of the above

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod classify;
pub mod config;
pub mod context;
pub mod crawler;
pub mod db;
pub mod download;
mod patterns;
pub mod search;
pub mod user_agent;
pub mod verify;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogError, CatalogStats, Entry, TransferStatus, Verification};
pub use config::{Config, ConfigError};
pub use context::{Context, ContextError};
pub use crawler::{CrawlError, CrawlSnapshot, CrawlState, Crawler};
pub use db::Database;
pub use download::{
    DownloadError, DownloadManager, DownloadStatus, EngineError, HttpClient, QueueReport,
    RateLimiter, RetryPolicy,
};
pub use search::{SearchEngine, SearchFilters, SearchHit, parse_selection};
pub use verify::{VerifyOutcome, VerifyReport};
