//! The explicit context handed to front ends.
//!
//! A [`Context`] owns the catalog connection, the shared HTTP client and
//! per-host rate limiter, the crawl tracker and the download manager. It is
//! created by [`Context::init_catalog`] and torn down by [`Context::close`].
//! Nothing in the library keeps process-wide state outside of it.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::catalog::{Catalog, CatalogError, CatalogStats, Entry, TransferStatus};
use crate::config::{Config, ConfigError};
use crate::crawler::{CrawlError, CrawlSnapshot, CrawlTracker, Crawler};
use crate::db::{Database, DbError};
use crate::download::{
    DownloadManager, DownloadStatus, EngineError, HttpClient, QueueReport, RateLimiter,
};
use crate::search::{SearchEngine, SearchError, SearchFilters, SearchHit};
use crate::verify::{self, VerifyError, VerifyReport};

/// Errors surfaced by context operations.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// The background crawl task died.
    #[error("crawl task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// No entry has this address.
    #[error("no catalog entry for {address}")]
    UnknownEntry { address: String },

    /// Verification needs a completed file on disk.
    #[error("{address} is {status}; only completed entries can be verified")]
    NotCompleted {
        address: String,
        status: TransferStatus,
    },

    /// The entry's format has no container to check.
    #[error("{address} has format `{format}`, which cannot be verified")]
    UnsupportedFormat { address: String, format: String },
}

/// A crawl running in the background.
struct ActiveCrawl {
    cancel: CancellationToken,
    task: JoinHandle<Result<CrawlSnapshot, CrawlError>>,
}

/// Handles shared by every collaborator operation.
pub struct Context {
    config: Config,
    catalog: Catalog,
    search: SearchEngine,
    downloads: DownloadManager,
    crawler: Arc<Crawler>,
    tracker: Arc<CrawlTracker>,
    crawl: Mutex<Option<ActiveCrawl>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("database_path", &self.config.database_path)
            .field("download_root", &self.config.download_root)
            .field("crawl", &self.tracker.snapshot().state)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Validates `config`, opens the catalog and starts the download manager.
    ///
    /// Entries a previous process left `downloading` are moved to `paused`.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Config`] before touching the disk or network if
    /// the configuration is invalid, and the underlying error if the database,
    /// HTTP client, crawler or download manager cannot be set up.
    #[instrument(skip_all, fields(db = %config.database_path.display()))]
    pub async fn init_catalog(config: Config) -> Result<Self, ContextError> {
        config.validate()?;
        let db = Database::new(&config.database_path).await?;
        Self::with_database(config, db).await
    }

    /// Like [`Context::init_catalog`] over an already-open database.
    ///
    /// # Errors
    ///
    /// Same as [`Context::init_catalog`].
    pub async fn with_database(config: Config, db: Database) -> Result<Self, ContextError> {
        config.validate()?;
        let catalog = Catalog::new(db);

        let recovered = catalog.recover_interrupted().await?;
        if recovered > 0 {
            info!(recovered, "interrupted transfers moved to paused");
        }

        let client = HttpClient::new(
            config.connect_timeout(),
            config.read_timeout(),
            &config.user_agent,
        )?;
        let rate_limiter = Arc::new(RateLimiter::new(
            config.bucket_capacity,
            config.refill_per_sec,
        ));
        let search = SearchEngine::new(
            catalog.clone(),
            config.search_min_score,
            config.search_batch_size,
        );
        let downloads = DownloadManager::start(
            Arc::new(catalog.clone()),
            client.clone(),
            Arc::clone(&rate_limiter),
            &config,
        )?;
        let tracker = Arc::new(CrawlTracker::new());
        let crawler = Arc::new(Crawler::new(
            catalog.clone(),
            client,
            rate_limiter,
            Arc::clone(&tracker),
            &config,
        )?);

        Ok(Self {
            config,
            catalog,
            search,
            downloads,
            crawler,
            tracker,
            crawl: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Starts a crawl of `root` (the configured base URL when `None`) in the
    /// background and returns its state as of the start.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::AlreadyRunning`] if a crawl is active.
    #[instrument(skip(self))]
    pub async fn run_crawl(&self, root: Option<&str>) -> Result<CrawlSnapshot, ContextError> {
        let root = root.unwrap_or(&self.config.base_url);
        let mut slot = self.crawl.lock().await;
        let cancel = CancellationToken::new();
        let task = self.crawler.spawn(root, cancel.clone())?;
        // A finished run's handle is simply replaced.
        *slot = Some(ActiveCrawl { cancel, task });
        Ok(self.tracker.snapshot())
    }

    /// Waits for the background crawl, if any, and returns its final state.
    ///
    /// # Errors
    ///
    /// Returns the run's [`CrawlError`], or [`ContextError::Task`] if the
    /// task panicked.
    pub async fn wait_crawl(&self) -> Result<CrawlSnapshot, ContextError> {
        let active = self.crawl.lock().await.take();
        match active {
            Some(active) => Ok(active.task.await??),
            None => Ok(self.tracker.snapshot()),
        }
    }

    /// Asks the background crawl to stop issuing requests.
    pub async fn cancel_crawl(&self) {
        if let Some(active) = self.crawl.lock().await.as_ref() {
            active.cancel.cancel();
        }
    }

    /// Current crawl state, including counters of a run in progress.
    #[must_use]
    pub fn crawl_status(&self) -> CrawlSnapshot {
        self.tracker.snapshot()
    }

    /// Ranked entries for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] if the catalog cannot be read.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ContextError> {
        Ok(self.search.search(query, filters, limit).await?)
    }

    /// Hands entries to the download manager; returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] after shutdown or if an entry cannot be read.
    pub async fn queue_download(&self, addresses: &[String]) -> Result<QueueReport, ContextError> {
        Ok(self.downloads.queue(addresses).await?)
    }

    #[must_use]
    pub fn download_status(&self) -> DownloadStatus {
        self.downloads.status()
    }

    /// Resolves once nothing is queued or transferring.
    pub async fn wait_downloads(&self) {
        self.downloads.wait_idle().await;
    }

    /// Checks a completed entry's file and stores the result.
    ///
    /// # Errors
    ///
    /// - [`ContextError::UnknownEntry`] if the address is not cataloged
    /// - [`ContextError::NotCompleted`] unless the entry is `completed`
    /// - [`ContextError::UnsupportedFormat`] for non-zip formats
    /// - [`VerifyError`] if the file cannot be opened
    #[instrument(skip(self))]
    pub async fn verify(&self, address: &str) -> Result<VerifyReport, ContextError> {
        let entry = self.require_entry(address).await?;
        let status = entry.status();
        let path = match (&entry.local_path, status) {
            (Some(path), TransferStatus::Completed) => PathBuf::from(path),
            _ => {
                return Err(ContextError::NotCompleted {
                    address: address.to_string(),
                    status,
                });
            }
        };
        if !verify::is_verifiable_format(&entry.format) {
            return Err(ContextError::UnsupportedFormat {
                address: address.to_string(),
                format: entry.format,
            });
        }

        let report = verify::verify_file(&path).await?;
        verify::apply_report(&self.catalog, address, &report).await?;
        Ok(report)
    }

    /// Aggregate counts from the catalog's current rows.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the catalog cannot be read.
    pub async fn stats(&self) -> Result<CatalogStats, ContextError> {
        Ok(self.catalog.stats().await?)
    }

    /// Cancels background work, then closes the catalog.
    ///
    /// In-flight transfers are left `paused` with their progress persisted.
    pub async fn close(self) {
        self.cancel_crawl().await;
        if let Err(e) = self.wait_crawl().await {
            warn!(error = %e, "crawl ended with an error during shutdown");
        }
        self.downloads.stop().await;
        self.catalog.database().close().await;
        info!("context closed");
    }

    async fn require_entry(&self, address: &str) -> Result<Entry, ContextError> {
        self.catalog
            .entry(address)
            .await?
            .ok_or_else(|| ContextError::UnknownEntry {
                address: address.to_string(),
            })
    }
}
