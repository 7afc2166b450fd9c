//! Repository seam for transfer-state persistence.
//!
//! The download manager and verifier depend on this trait rather than on
//! [`Catalog`] directly, so transfer orchestration can be driven against any
//! store that honors the same transition rules.

use async_trait::async_trait;

use super::{Catalog, Entry, Result, TransferStatus, Verification};

/// Data-access contract for download and verification state.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Looks up one entry by address.
    async fn entry(&self, address: &str) -> Result<Option<Entry>>;

    /// Atomic status/progress update, guarded by the transition table.
    async fn update_transfer_state(
        &self,
        address: &str,
        status: TransferStatus,
        bytes_transferred: u64,
    ) -> Result<()>;

    /// Status-only transition, keeping the recorded progress.
    async fn set_status(&self, address: &str, status: TransferStatus) -> Result<()>;

    /// Moves the entry to `failed`, recording the concrete cause.
    async fn mark_failed(&self, address: &str, bytes_transferred: u64, error: &str) -> Result<()>;

    /// Records the attempt counter and the most recent error without changing status.
    async fn record_attempt(&self, address: &str, attempts: u32, error: Option<&str>)
    -> Result<()>;

    /// Stores a size learned from the remote when the listing did not declare one.
    async fn record_size(&self, address: &str, size: u64) -> Result<()>;

    /// Records where the transfer writes locally.
    async fn set_local_path(&self, address: &str, local_path: &str) -> Result<()>;

    /// Sets or clears the throttled flag.
    async fn set_throttled(&self, address: &str, throttled: bool) -> Result<()>;

    /// Stores the digest and average throughput of a finished transfer.
    async fn record_completion(
        &self,
        address: &str,
        sha256: &str,
        average_speed_bps: Option<f64>,
    ) -> Result<()>;

    /// Stores the advisory verification flag.
    async fn record_verification(
        &self,
        address: &str,
        verification: Verification,
        detail: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
impl TransferStore for Catalog {
    async fn entry(&self, address: &str) -> Result<Option<Entry>> {
        Catalog::entry(self, address).await
    }

    async fn update_transfer_state(
        &self,
        address: &str,
        status: TransferStatus,
        bytes_transferred: u64,
    ) -> Result<()> {
        Catalog::update_transfer_state(self, address, status, bytes_transferred).await
    }

    async fn set_status(&self, address: &str, status: TransferStatus) -> Result<()> {
        Catalog::set_status(self, address, status).await
    }

    async fn mark_failed(&self, address: &str, bytes_transferred: u64, error: &str) -> Result<()> {
        Catalog::mark_failed(self, address, bytes_transferred, error).await
    }

    async fn record_attempt(
        &self,
        address: &str,
        attempts: u32,
        error: Option<&str>,
    ) -> Result<()> {
        Catalog::record_attempt(self, address, attempts, error).await
    }

    async fn record_size(&self, address: &str, size: u64) -> Result<()> {
        Catalog::record_size(self, address, size).await
    }

    async fn set_local_path(&self, address: &str, local_path: &str) -> Result<()> {
        Catalog::set_local_path(self, address, local_path).await
    }

    async fn set_throttled(&self, address: &str, throttled: bool) -> Result<()> {
        Catalog::set_throttled(self, address, throttled).await
    }

    async fn record_completion(
        &self,
        address: &str,
        sha256: &str,
        average_speed_bps: Option<f64>,
    ) -> Result<()> {
        Catalog::record_completion(self, address, sha256, average_speed_bps).await
    }

    async fn record_verification(
        &self,
        address: &str,
        verification: Verification,
        detail: Option<&str>,
    ) -> Result<()> {
        Catalog::record_verification(self, address, verification, detail).await
    }
}
