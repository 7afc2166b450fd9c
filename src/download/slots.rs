//! Per-host concurrency limits.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use super::rate_limiter::extract_domain;

/// Lazily created semaphore per host, all with the same permit count.
#[derive(Debug)]
pub struct HostSlots {
    per_host: usize,
    hosts: DashMap<String, Arc<Semaphore>>,
}

impl HostSlots {
    #[must_use]
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: DashMap::new(),
        }
    }

    /// Waits for a free slot on the URL's host. The slot is held until the permit drops.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] if the host semaphore was closed by [`HostSlots::close`].
    pub async fn acquire(&self, url: &str) -> Result<OwnedSemaphorePermit, AcquireError> {
        let semaphore = self
            .hosts
            .entry(extract_domain(url))
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone();
        semaphore.acquire_owned().await
    }

    /// Slots currently free on a host.
    #[must_use]
    pub fn available(&self, host: &str) -> usize {
        self.hosts
            .get(host)
            .map_or(self.per_host, |semaphore| semaphore.available_permits())
    }

    /// Closes every host semaphore, failing pending and future acquisitions.
    pub fn close(&self) {
        for entry in &self.hosts {
            entry.value().close();
        }
    }
}
