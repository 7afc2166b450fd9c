//! Directory-listing crawler.
//!
//! A coordinator owns the frontier and the visited set; a bounded set of
//! worker tasks fetch one listing each, catalog its files and report the
//! subdirectories back. Every listing request goes through the per-host
//! token bucket shared with downloads.
//!
//! A failing location is retried with backoff, then skipped and counted. Only
//! an unreachable root or an unavailable catalog fails the run.

mod filter;
mod listing;
mod robots;
mod state;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::catalog::{Catalog, CatalogError, CrawlRunRecord, NewEntry};
use crate::classify::classify;
use crate::config::Config;
use crate::download::{
    DownloadError, HttpClient, RateLimiter, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after,
};
use crate::search::normalize;

pub use filter::{FileFilter, Rejection};
pub use listing::{ListedSize, ListingItem, parse_listing, parse_size};
pub use robots::{RobotsRules, fetch_rules};
pub use state::{CrawlSnapshot, CrawlState, CrawlTracker};

/// Errors that end or refuse a crawl run.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The root is not an absolute http(s) URL.
    #[error("invalid crawl root: {url}")]
    InvalidRoot { url: String },

    /// An include/exclude pattern does not compile.
    #[error("invalid filename pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Another run is active on this tracker.
    #[error("a crawl is already running")]
    AlreadyRunning,

    /// A single listing could not be fetched after all attempts.
    #[error("listing {url} failed: {source}")]
    Listing {
        url: String,
        #[source]
        source: DownloadError,
    },

    /// The root listing failed; nothing below it is reachable.
    #[error("crawl root {url} unreachable: {source}")]
    RootUnreachable {
        url: String,
        #[source]
        source: DownloadError,
    },

    /// robots.txt disallows the root itself.
    #[error("crawl root {url} is disallowed by robots.txt")]
    RootDisallowed { url: String },

    /// The catalog stopped accepting writes.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// State shared by the coordinator and its workers.
struct Shared {
    catalog: Catalog,
    client: HttpClient,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    filter: FileFilter,
    /// Paths are classified relative to this directory.
    archive_root: Url,
    tracker: Arc<CrawlTracker>,
}

/// A listing waiting to be visited.
#[derive(Debug, Clone)]
struct Location {
    url: Url,
    depth: u32,
}

/// What one worker learned from one listing.
#[derive(Debug, Default)]
struct Visit {
    directories: Vec<Url>,
}

enum VisitError {
    Fetch(DownloadError),
    Catalog(CatalogError),
    Cancelled,
}

/// Crawls an archive's listings into the catalog.
pub struct Crawler {
    shared: Arc<Shared>,
    concurrency: usize,
    max_depth: u32,
    respect_robots: bool,
    user_agent: String,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("archive_root", &self.shared.archive_root.as_str())
            .field("concurrency", &self.concurrency)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl Crawler {
    /// Builds a crawler over the shared client and rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Pattern`] for a malformed glob, or
    /// [`CrawlError::InvalidRoot`] if the configured base URL does not parse.
    pub fn new(
        catalog: Catalog,
        client: HttpClient,
        rate_limiter: Arc<RateLimiter>,
        tracker: Arc<CrawlTracker>,
        config: &Config,
    ) -> Result<Self, CrawlError> {
        let filter = FileFilter::new(
            &config.include_patterns,
            &config.exclude_patterns,
            config.max_download_size,
        )?;
        let archive_root = parse_root(&config.base_url)?;
        Ok(Self {
            shared: Arc::new(Shared {
                catalog,
                client,
                rate_limiter,
                retry_policy: RetryPolicy::from_config(config),
                filter,
                archive_root,
                tracker,
            }),
            concurrency: config.crawl_concurrency.max(1),
            max_depth: config.crawl_max_depth,
            respect_robots: config.respect_robots_txt,
            user_agent: config.user_agent.clone(),
        })
    }

    /// The crawl state shared with collaborators.
    #[must_use]
    pub fn tracker(&self) -> Arc<CrawlTracker> {
        Arc::clone(&self.shared.tracker)
    }

    /// Crawls everything reachable below `root` and returns the run summary.
    ///
    /// Cancelling `cancel` stops new requests; the run still ends `completed`
    /// with `cancelled` set.
    ///
    /// # Errors
    ///
    /// - [`CrawlError::AlreadyRunning`] if a run is active
    /// - [`CrawlError::InvalidRoot`], [`CrawlError::RootUnreachable`] or
    ///   [`CrawlError::RootDisallowed`] when the root cannot be crawled
    /// - [`CrawlError::Catalog`] if writes to the catalog fail
    pub async fn run(
        &self,
        root: &str,
        cancel: CancellationToken,
    ) -> Result<CrawlSnapshot, CrawlError> {
        if !self.shared.tracker.begin(root) {
            return Err(CrawlError::AlreadyRunning);
        }
        self.drive(root, cancel).await
    }

    /// Marks a run active and continues it on a background task.
    ///
    /// Returns once the tracker reports `running`; the handle resolves to the
    /// same result [`Crawler::run`] would.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::AlreadyRunning`] if a run is active.
    pub fn spawn(
        self: &Arc<Self>,
        root: &str,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<Result<CrawlSnapshot, CrawlError>>, CrawlError> {
        if !self.shared.tracker.begin(root) {
            return Err(CrawlError::AlreadyRunning);
        }
        let crawler = Arc::clone(self);
        let root = root.to_string();
        Ok(tokio::spawn(async move { crawler.drive(&root, cancel).await }))
    }

    #[instrument(name = "crawl", skip(self, cancel))]
    async fn drive(
        &self,
        root: &str,
        cancel: CancellationToken,
    ) -> Result<CrawlSnapshot, CrawlError> {
        let tracker = &self.shared.tracker;
        info!("crawl started");

        let result = self.crawl(root, &cancel).await;
        match &result {
            Ok(()) => tracker.complete(),
            Err(e) => tracker.fail(&e.to_string()),
        }
        let snapshot = tracker.snapshot();
        self.record_run(root, &snapshot).await;

        info!(
            state = %snapshot.state,
            visited = snapshot.locations_visited,
            discovered = snapshot.entries_discovered,
            filtered = snapshot.entries_filtered,
            errors = snapshot.errors,
            cancelled = snapshot.cancelled,
            "crawl finished"
        );
        result.map(|()| snapshot)
    }

    async fn crawl(&self, root: &str, cancel: &CancellationToken) -> Result<(), CrawlError> {
        let root = parse_root(root)?;
        let robots = if self.respect_robots {
            fetch_rules(
                &self.shared.client,
                &self.shared.rate_limiter,
                &root,
                &self.user_agent,
            )
            .await
        } else {
            RobotsRules::allow_all()
        };
        if !robots.allows(&root) {
            return Err(CrawlError::RootDisallowed {
                url: root.to_string(),
            });
        }

        let cancel = cancel.child_token();
        let mut frontier = VecDeque::from([Location {
            url: root.clone(),
            depth: 0,
        }]);
        let mut visited = HashSet::from([visit_key(&root)]);
        let mut tasks: JoinSet<(Location, Result<Visit, VisitError>)> = JoinSet::new();

        loop {
            while tasks.len() < self.concurrency && !cancel.is_cancelled() {
                let Some(location) = frontier.pop_front() else {
                    break;
                };
                let shared = Arc::clone(&self.shared);
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let result = visit(&shared, &location, &cancel).await;
                    (location, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (location, result) = match joined {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "crawl worker panicked");
                    self.shared.tracker.add_error();
                    continue;
                }
            };

            match result {
                Ok(found) => {
                    for url in found.directories {
                        let depth = location.depth + 1;
                        if depth > self.max_depth {
                            debug!(url = %url, depth, "max depth reached");
                            continue;
                        }
                        if !is_within(&root, &url) || !robots.allows(&url) {
                            continue;
                        }
                        if visited.insert(visit_key(&url)) {
                            frontier.push_back(Location { url, depth });
                        }
                    }
                }
                Err(VisitError::Cancelled) => {}
                Err(VisitError::Catalog(e)) => {
                    cancel.cancel();
                    tasks.shutdown().await;
                    return Err(e.into());
                }
                Err(VisitError::Fetch(source)) if location.depth == 0 => {
                    return Err(CrawlError::RootUnreachable {
                        url: location.url.to_string(),
                        source,
                    });
                }
                Err(VisitError::Fetch(source)) => {
                    let error = CrawlError::Listing {
                        url: location.url.to_string(),
                        source,
                    };
                    warn!(error = %error, "skipping location");
                    self.shared.tracker.add_error();
                }
            }
        }

        if cancel.is_cancelled() {
            self.shared.tracker.mark_cancelled();
        }
        Ok(())
    }

    async fn record_run(&self, root: &str, snapshot: &CrawlSnapshot) {
        let record = CrawlRunRecord {
            root,
            state: snapshot.state.as_str(),
            locations_visited: snapshot.locations_visited,
            entries_discovered: snapshot.entries_discovered,
            errors: snapshot.errors,
            started_at: self
                .shared
                .tracker
                .started_at()
                .unwrap_or_else(std::time::SystemTime::now),
        };
        if let Err(e) = self.shared.catalog.record_crawl_run(&record).await {
            warn!(error = %e, "could not record crawl run");
        }
    }
}

/// Fetches one listing, catalogs its files, returns its subdirectories.
#[instrument(skip_all, fields(url = %location.url, depth = location.depth))]
async fn visit(
    shared: &Shared,
    location: &Location,
    cancel: &CancellationToken,
) -> Result<Visit, VisitError> {
    shared.tracker.visiting(location.url.as_str());
    let html = fetch_with_retry(shared, location.url.as_str(), cancel).await?;
    let items = parse_listing(&html, &location.url);
    let relative_dir = relative_dir(&shared.archive_root, &location.url);

    let mut found = Visit::default();
    let mut discovered = 0u64;
    for item in items {
        match item {
            ListingItem::Directory { url } => found.directories.push(url),
            ListingItem::File {
                url,
                name,
                size,
                size_exact,
            } => {
                if let Err(reason) = shared.filter.check(&name, size) {
                    debug!(%name, ?reason, "file filtered");
                    shared.tracker.add_filtered(1);
                    continue;
                }
                let classification = classify(&relative_dir, &name);
                let entry = NewEntry {
                    address: url.to_string(),
                    normalized_name: normalize(&name),
                    name,
                    size,
                    size_exact,
                    console: classification.console,
                    region: classification.region,
                    collection: classification.collection,
                    parent_path: relative_dir.clone(),
                    format: classification.format,
                    requires_conversion: classification.requires_conversion,
                };
                shared
                    .catalog
                    .upsert(&entry)
                    .await
                    .map_err(VisitError::Catalog)?;
                shared.tracker.add_discovered(1);
                discovered += 1;
            }
        }
    }
    debug!(
        discovered,
        directories = found.directories.len(),
        "listing visited"
    );
    Ok(found)
}

async fn fetch_with_retry(
    shared: &Shared,
    url: &str,
    cancel: &CancellationToken,
) -> Result<String, VisitError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(VisitError::Cancelled);
        }
        tokio::select! {
            _ = shared.rate_limiter.acquire(url) => {}
            () = cancel.cancelled() => return Err(VisitError::Cancelled),
        }

        let error = match shared.client.fetch_listing(url).await {
            Ok(html) => return Ok(html),
            Err(e) => e,
        };
        if let DownloadError::HttpStatus {
            retry_after: Some(raw),
            ..
        } = &error
            && let Some(delay) = parse_retry_after(raw)
        {
            shared.rate_limiter.penalize(url, delay).await;
        }

        match shared
            .retry_policy
            .should_retry(classify_error(&error), attempt)
        {
            RetryDecision::Retry { delay, attempt: next } => {
                debug!(
                    attempt = next,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying listing"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(VisitError::Cancelled),
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "giving up on listing");
                return Err(VisitError::Fetch(error));
            }
        }
    }
}

/// Parses a crawl root, forcing a trailing `/` so relative links resolve below it.
fn parse_root(raw: &str) -> Result<Url, CrawlError> {
    let invalid = || CrawlError::InvalidRoot {
        url: raw.to_string(),
    };
    let mut url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Visited-set key: the address without query or fragment.
fn visit_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_query(None);
    key.set_fragment(None);
    key.to_string()
}

fn is_within(root: &Url, url: &Url) -> bool {
    url.origin() == root.origin() && url.path().starts_with(root.path())
}

/// Decoded, `/`-joined directory path of `location` below `archive_root`.
fn relative_dir(archive_root: &Url, location: &Url) -> String {
    let path = location.path();
    let relative = path.strip_prefix(archive_root.path()).unwrap_or(path);
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment).map_or_else(|_| segment.to_string(), |d| d.into_owned())
        })
        .collect::<Vec<_>>()
        .join("/")
}
