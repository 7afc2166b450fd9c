//! Download manager: a coordinator over a bounded pool of transfer tasks.
//!
//! # Concurrency Model
//!
//! - `queue` validates entries and hands addresses to the coordinator over a channel
//! - The coordinator spawns one task per entry into a `JoinSet`
//! - Each task waits for a per-host slot, then a global permit, before any IO
//! - Permits are released when the task ends (RAII)
//! - All catalog updates for an entry come from its own task
//! - The coordinator collects outcomes and updates the shared [`DownloadTracker`]
//!
//! # Cancellation
//!
//! [`DownloadManager::stop`] cancels a shared token. Tasks waiting for a slot
//! exit without touching the entry; running transfers finish their current
//! chunk, persist progress and end `paused`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, Semaphore, mpsc};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::constants::QUEUE_CHANNEL_CAPACITY;
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use super::slots::HostSlots;
use super::tracker::{DownloadStatus, DownloadTracker};
use super::transfer::{TransferContext, TransferOutcome, TransferSettings, run_transfer};
use crate::catalog::{CatalogError, TransferStatus, TransferStore};
use crate::config::Config;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 64;

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Error type for download manager operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Catalog operation failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The manager was stopped and accepts no more work.
    #[error("download manager is stopped")]
    Stopped,
}

/// Why `queue` passed over an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownEntry,
    AlreadyCompleted,
    AlreadyQueued,
}

/// Result of [`DownloadManager::queue`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueReport {
    pub accepted: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl QueueReport {
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}

/// What a task did with its entry.
enum TaskOutcome {
    /// Cancelled or entry vanished before any transfer work.
    NotStarted,
    Ran(TransferOutcome),
}

struct ManagerInner {
    transfer: TransferContext,
    global: Arc<Semaphore>,
    host_slots: HostSlots,
    /// Addresses queued or running; one owning task per address.
    active: DashSet<String>,
    idle: Notify,
}

/// Concurrent, resumable, rate-limited transfers of catalog entries.
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
    sender: mpsc::Sender<String>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    concurrency: usize,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("concurrency", &self.concurrency)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Builds the manager from configuration and starts its coordinator.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the global or per-host
    /// limit is outside 1-64.
    #[instrument(level = "debug", skip_all, fields(concurrency = config.global_concurrency))]
    pub fn start(
        store: Arc<dyn TransferStore>,
        client: HttpClient,
        rate_limiter: Arc<RateLimiter>,
        config: &Config,
    ) -> Result<Self, EngineError> {
        for value in [config.global_concurrency, config.per_host_concurrency] {
            if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
                return Err(EngineError::InvalidConcurrency { value });
            }
        }
        let retry_policy = RetryPolicy::from_config(config);
        debug!(
            per_host = config.per_host_concurrency,
            max_attempts = retry_policy.max_attempts(),
            bucket_capacity = rate_limiter.capacity(),
            refill_per_sec = rate_limiter.refill_per_sec(),
            "starting download manager"
        );

        let inner = Arc::new(ManagerInner {
            transfer: TransferContext {
                store,
                client,
                rate_limiter,
                retry_policy,
                settings: Arc::new(TransferSettings::from_config(config)),
                cancel: CancellationToken::new(),
                tracker: Arc::new(DownloadTracker::new()),
            },
            global: Arc::new(Semaphore::new(config.global_concurrency)),
            host_slots: HostSlots::new(config.per_host_concurrency),
            active: DashSet::new(),
            idle: Notify::new(),
        });

        let (sender, receiver) = mpsc::channel(QUEUE_CHANNEL_CAPACITY);
        let coordinator = tokio::spawn(coordinate(Arc::clone(&inner), receiver));

        Ok(Self {
            inner,
            sender,
            coordinator: Mutex::new(Some(coordinator)),
            concurrency: config.global_concurrency,
        })
    }

    /// Returns the configured global concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Accepts entries for transfer and returns immediately.
    ///
    /// Unknown, completed and already-queued addresses are skipped. Failed and
    /// paused entries return to `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] after [`DownloadManager::stop`], or
    /// [`EngineError::Catalog`] if an entry cannot be read or reset.
    #[instrument(skip_all, fields(requested = addresses.len()))]
    pub async fn queue(&self, addresses: &[String]) -> Result<QueueReport, EngineError> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }
        let store = &self.inner.transfer.store;
        let mut report = QueueReport::default();

        for address in addresses {
            let Some(entry) = store.entry(address).await? else {
                report.skipped.push((address.clone(), SkipReason::UnknownEntry));
                continue;
            };
            if self.inner.active.contains(address) {
                report.skipped.push((address.clone(), SkipReason::AlreadyQueued));
                continue;
            }
            match entry.status() {
                TransferStatus::Completed => {
                    report
                        .skipped
                        .push((address.clone(), SkipReason::AlreadyCompleted));
                    continue;
                }
                TransferStatus::Pending => {}
                TransferStatus::Failed | TransferStatus::Paused => {
                    store.set_status(address, TransferStatus::Pending).await?;
                }
                TransferStatus::Downloading => {
                    // Left over from an interrupted run; no task owns it.
                    store.set_status(address, TransferStatus::Paused).await?;
                    store.set_status(address, TransferStatus::Pending).await?;
                }
            }

            if !self.inner.active.insert(address.clone()) {
                report.skipped.push((address.clone(), SkipReason::AlreadyQueued));
                continue;
            }
            self.inner.transfer.tracker.enqueued(1);
            if self.sender.send(address.clone()).await.is_err() {
                self.inner.active.remove(address);
                self.inner.transfer.tracker.dequeued_unstarted();
                return Err(EngineError::Stopped);
            }
            report.accepted.push(address.clone());
        }

        info!(
            accepted = report.accepted.len(),
            skipped = report.skipped.len(),
            "entries queued"
        );
        Ok(report)
    }

    /// Snapshot of queued, active and finished counts.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.inner.transfer.tracker.snapshot()
    }

    /// Waits until nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.status().is_idle() {
                return;
            }
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    }

    /// Signals every task to stop, then waits for them to persist progress.
    ///
    /// Queued entries that never started stay `pending`.
    pub async fn stop(&self) {
        self.inner.transfer.cancel.cancel();
        self.inner.host_slots.close();
        self.inner.global.close();
        let handle = self.coordinator.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "download coordinator panicked");
        }
        info!(status = ?self.status(), "download manager stopped");
    }

    /// True once [`DownloadManager::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.transfer.cancel.is_cancelled()
    }
}

/// Coordinator loop: spawn a task per queued address, collect outcomes.
async fn coordinate(inner: Arc<ManagerInner>, mut receiver: mpsc::Receiver<String>) {
    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
    let mut owners: HashMap<Id, String> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            () = inner.transfer.cancel.cancelled() => break,
            Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                collect(&inner, &mut owners, joined);
            }
            address = receiver.recv() => match address {
                Some(address) => {
                    let handle = tasks.spawn(run_entry(Arc::clone(&inner), address.clone()));
                    owners.insert(handle.id(), address);
                }
                None => break,
            },
        }
    }

    debug!(in_flight = tasks.len(), "coordinator draining");
    receiver.close();
    while let Ok(address) = receiver.try_recv() {
        inner.active.remove(&address);
        inner.transfer.tracker.dequeued_unstarted();
    }
    while let Some(joined) = tasks.join_next_with_id().await {
        collect(&inner, &mut owners, joined);
    }
    inner.idle.notify_waiters();
}

fn collect(
    inner: &ManagerInner,
    owners: &mut HashMap<Id, String>,
    joined: Result<(Id, TaskOutcome), JoinError>,
) {
    let tracker = &inner.transfer.tracker;
    match joined {
        Ok((id, outcome)) => {
            let address = owners.remove(&id).unwrap_or_default();
            inner.active.remove(&address);
            match outcome {
                TaskOutcome::NotStarted => tracker.dequeued_unstarted(),
                TaskOutcome::Ran(TransferOutcome::Completed(done)) => {
                    if let Some(advisory) = &done.conversion_advisory {
                        tracker.record_advisory(&address, advisory);
                    }
                    tracker.finished_completed(&address);
                }
                TaskOutcome::Ran(TransferOutcome::Paused { .. }) => {
                    tracker.finished_paused(&address);
                }
                TaskOutcome::Ran(TransferOutcome::Failed { .. }) => {
                    tracker.finished_failed(&address);
                }
            }
        }
        Err(e) => {
            let address = owners.remove(&e.id()).unwrap_or_default();
            warn!(%address, error = %e, "download task panicked");
            inner.active.remove(&address);
            tracker.finished_failed(&address);
        }
    }
    inner.idle.notify_waiters();
}

/// One entry's task: wait for capacity, claim the entry, run the transfer.
async fn run_entry(inner: Arc<ManagerInner>, address: String) -> TaskOutcome {
    let cancel = &inner.transfer.cancel;

    let _host_slot = tokio::select! {
        permit = inner.host_slots.acquire(&address) => match permit {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::NotStarted,
        },
        () = cancel.cancelled() => return TaskOutcome::NotStarted,
    };
    let _global = tokio::select! {
        permit = Arc::clone(&inner.global).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::NotStarted,
        },
        () = cancel.cancelled() => return TaskOutcome::NotStarted,
    };
    if cancel.is_cancelled() {
        return TaskOutcome::NotStarted;
    }

    let store = &inner.transfer.store;
    let entry = match store.entry(&address).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            warn!(%address, "queued entry no longer in catalog");
            return TaskOutcome::NotStarted;
        }
        Err(e) => {
            warn!(%address, error = %e, "could not load queued entry");
            return TaskOutcome::NotStarted;
        }
    };
    if entry.status() == TransferStatus::Completed {
        return TaskOutcome::NotStarted;
    }

    inner.transfer.tracker.started();
    if let Err(e) = store
        .set_status(&address, TransferStatus::Downloading)
        .await
    {
        warn!(%address, error = %e, "could not claim entry");
        return TaskOutcome::Ran(TransferOutcome::Failed {
            error: e.to_string(),
            bytes: entry.bytes(),
        });
    }

    TaskOutcome::Ran(run_transfer(&inner.transfer, &entry).await)
}
