//! Durable catalog of collections, discovered entries and their transfer state.
//!
//! Every write is a single guarded statement (or a short transaction for
//! upserts) so unrelated entries never contend on anything wider than
//! SQLite's own write serialization. Status changes go through
//! [`TransferStatus::can_transition_to`]; the guard is part of the `UPDATE`
//! itself, so a concurrent writer cannot slip an illegal transition in
//! between a read and a write.
//!
//! # Example
//!
//! ```no_run
//! use myrient_core::{Catalog, Database};
//! use myrient_core::catalog::EntryFilter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let catalog = Catalog::new(db);
//! let filter = EntryFilter {
//!     console: Some("Game Boy".to_string()),
//!     ..EntryFilter::default()
//! };
//! let page = catalog.query_by_filter(&filter, 50, 0).await?;
//! println!("{} entries", page.len());
//! # Ok(())
//! # }
//! ```

mod entry;
mod error;
mod repository;
mod stats;

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::search::normalize;

pub use entry::{
    Cadence, CollectionSpec, ContentType, Entry, NewEntry, TransferStatus, UpsertOutcome,
    Verification,
};
pub use error::{CatalogDbErrorKind, CatalogError};
pub use repository::TransferStore;
pub use stats::{CatalogStats, CollectionStats, OverallStats};

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

const ENTRY_SELECT: &str = r"SELECT
    e.id, e.address, e.name, e.normalized_name, e.size, e.size_exact, e.console, e.region,
    c.name AS collection, e.parent_path, e.format, e.requires_conversion, e.status,
    e.bytes_transferred, e.local_path, e.attempts, e.last_error, e.throttled,
    e.average_speed_bps, e.verification, e.verification_detail, e.sha256,
    e.added_at, e.updated_at, e.completed_at
FROM entries e
JOIN collections c ON c.id = e.collection_id";

/// Hard predicates for catalog queries. `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// Exact console/platform name.
    pub console: Option<String>,
    /// Exact collection name.
    pub collection: Option<String>,
    /// Free text, normalized and matched as a normalized-name prefix.
    pub text: Option<String>,
    pub status: Option<TransferStatus>,
}

/// Lightweight row used to score search candidates without loading full entries.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SearchCandidate {
    pub id: i64,
    pub address: String,
    pub name: String,
    pub normalized_name: String,
}

/// Summary counters of one finished crawl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRunRecord<'a> {
    pub root: &'a str,
    /// `completed` or `failed`.
    pub state: &'a str,
    pub locations_visited: u64,
    pub entries_discovered: u64,
    pub errors: u64,
    pub started_at: SystemTime,
}

/// Catalog store backed by SQLite.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn check_affected(address: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(CatalogError::EntryNotFound(address.to_string()))
    } else {
        Ok(())
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> String {
    format!("{prefix}{}", char::MAX)
}

impl Catalog {
    /// Creates a catalog over an open, migrated database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new entry or refreshes an existing one, keyed by address.
    ///
    /// Refreshing never touches transfer state. A byte-exact size learned
    /// from the remote is never replaced by a rounded listing value, and a
    /// completed entry keeps its size.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the write fails.
    #[instrument(skip(self, entry), fields(address = %entry.address))]
    pub async fn upsert(&self, entry: &NewEntry) -> Result<UpsertOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let collection_id: i64 = sqlx::query_scalar(
            r"INSERT INTO collections (name, content_type, cadence)
              VALUES (?, ?, ?)
              ON CONFLICT(name) DO UPDATE
              SET content_type = excluded.content_type,
                  cadence = excluded.cadence,
                  updated_at = datetime('now')
              RETURNING id",
        )
        .bind(&entry.collection.name)
        .bind(entry.collection.content_type.as_str())
        .bind(entry.collection.cadence.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let size = entry.size.map(to_i64);
        let inserted = sqlx::query(
            r"INSERT INTO entries
                (address, name, normalized_name, size, size_exact, console, region,
                 collection_id, parent_path, format, requires_conversion)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(address) DO NOTHING",
        )
        .bind(&entry.address)
        .bind(&entry.name)
        .bind(&entry.normalized_name)
        .bind(size)
        .bind(entry.size_exact)
        .bind(&entry.console)
        .bind(&entry.region)
        .bind(collection_id)
        .bind(&entry.parent_path)
        .bind(&entry.format)
        .bind(entry.requires_conversion)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if inserted == 1 {
            UpsertOutcome::Inserted
        } else {
            // Right-hand sides see the pre-update row.
            sqlx::query(
                r"UPDATE entries
                  SET name = ?,
                      normalized_name = ?,
                      size = CASE
                          WHEN size_exact = 1 OR status = 'completed' THEN size
                          ELSE MAX(COALESCE(?, size), bytes_transferred)
                      END,
                      size_exact = CASE
                          WHEN size_exact = 1 OR status = 'completed' THEN size_exact
                          ELSE ?
                      END,
                      console = ?,
                      region = ?,
                      collection_id = ?,
                      parent_path = ?,
                      format = ?,
                      requires_conversion = ?,
                      updated_at = datetime('now')
                  WHERE address = ?",
            )
            .bind(&entry.name)
            .bind(&entry.normalized_name)
            .bind(size)
            .bind(entry.size_exact)
            .bind(&entry.console)
            .bind(&entry.region)
            .bind(collection_id)
            .bind(&entry.parent_path)
            .bind(&entry.format)
            .bind(entry.requires_conversion)
            .bind(&entry.address)
            .execute(&mut *tx)
            .await?;
            UpsertOutcome::Updated
        };

        tx.commit().await?;
        debug!(?outcome, "upserted entry");
        Ok(outcome)
    }

    /// Looks up one entry by address.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn entry(&self, address: &str) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>(&format!("{ENTRY_SELECT} WHERE e.address = ?"))
            .bind(address)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(entry)
    }

    /// Returns entries matching every provided filter, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn query_by_filter(
        &self,
        filter: &EntryFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Entry>> {
        let mut builder = QueryBuilder::<Sqlite>::new(ENTRY_SELECT);
        builder.push(" WHERE 1 = 1");
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY e.name ASC, e.id ASC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let entries = builder
            .build_query_as::<Entry>()
            .fetch_all(self.db.pool())
            .await?;
        Ok(entries)
    }

    /// Loads one batch of name columns of entries passing the hard filters,
    /// for scoring.
    ///
    /// Batches are keyed on id: pass the last id of the previous batch as
    /// `after_id` (zero for the first). A batch shorter than `batch` is the last.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn search_candidates(
        &self,
        console: Option<&str>,
        collection: Option<&str>,
        after_id: i64,
        batch: u32,
    ) -> Result<Vec<SearchCandidate>> {
        let filter = EntryFilter {
            console: console.map(str::to_string),
            collection: collection.map(str::to_string),
            ..EntryFilter::default()
        };
        let mut builder = QueryBuilder::<Sqlite>::new(
            r"SELECT e.id, e.address, e.name, e.normalized_name
              FROM entries e
              JOIN collections c ON c.id = e.collection_id
              WHERE e.id > ",
        );
        builder.push_bind(after_id);
        push_filter(&mut builder, &filter);
        builder
            .push(" ORDER BY e.id LIMIT ")
            .push_bind(i64::from(batch));

        let candidates = builder
            .build_query_as::<SearchCandidate>()
            .fetch_all(self.db.pool())
            .await?;
        Ok(candidates)
    }

    /// Atomic status/progress update guarded by the transition table.
    ///
    /// Leaves every other column alone, except that `completed_at` is stamped
    /// on completion and the throttled flag is cleared when a transfer stops.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::EntryNotFound`] if no entry has this address
    /// - [`CatalogError::IllegalTransition`] if the transition is not allowed
    /// - [`CatalogError::InvalidProgress`] if the byte count breaks the size invariants
    #[instrument(skip(self))]
    pub async fn update_transfer_state(
        &self,
        address: &str,
        status: TransferStatus,
        bytes_transferred: u64,
    ) -> Result<()> {
        self.transition(address, status, Some(bytes_transferred), None)
            .await
    }

    /// Changes status while keeping the stored byte count.
    ///
    /// # Errors
    ///
    /// Same as [`Catalog::update_transfer_state`].
    pub async fn set_status(&self, address: &str, status: TransferStatus) -> Result<()> {
        self.transition(address, status, None, None).await
    }

    /// Moves the entry to `failed` and records the concrete cause.
    ///
    /// # Errors
    ///
    /// Same as [`Catalog::update_transfer_state`].
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, address: &str, bytes_transferred: u64, error: &str) -> Result<()> {
        self.transition(
            address,
            TransferStatus::Failed,
            Some(bytes_transferred),
            Some(error),
        )
        .await
    }

    async fn transition(
        &self,
        address: &str,
        to: TransferStatus,
        bytes: Option<u64>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE entries SET status = ");
        builder.push_bind(to.as_str());
        if let Some(bytes) = bytes {
            builder
                .push(", bytes_transferred = ")
                .push_bind(to_i64(bytes));
        }
        if let Some(error) = error {
            builder.push(", last_error = ").push_bind(error.to_string());
        }
        if to == TransferStatus::Completed {
            builder.push(", completed_at = datetime('now'), last_error = NULL");
        }
        if to != TransferStatus::Downloading {
            builder.push(", throttled = 0");
        }
        builder
            .push(", updated_at = datetime('now') WHERE address = ")
            .push_bind(address.to_string())
            .push(" AND status IN (");
        let mut allowed = builder.separated(", ");
        for from in TransferStatus::predecessors(to) {
            allowed.push_bind(from.as_str());
        }
        allowed.push_unseparated(")");

        match bytes {
            Some(bytes) => {
                builder
                    .push(" AND (size IS NULL OR size_exact = 0 OR size >= ")
                    .push_bind(to_i64(bytes))
                    .push(")");
                if to == TransferStatus::Completed {
                    builder
                        .push(" AND (size IS NULL OR size_exact = 0 OR size = ")
                        .push_bind(to_i64(bytes))
                        .push(")");
                }
            }
            None if to == TransferStatus::Completed => {
                builder.push(" AND (size IS NULL OR size_exact = 0 OR size = bytes_transferred)");
            }
            None => {}
        }

        let rows = builder
            .build()
            .execute(self.db.pool())
            .await?
            .rows_affected();
        if rows == 1 {
            debug!(address, status = %to, bytes, "transfer state updated");
            return Ok(());
        }

        Err(self.explain_rejected_transition(address, to, bytes).await?)
    }

    async fn explain_rejected_transition(
        &self,
        address: &str,
        to: TransferStatus,
        bytes: Option<u64>,
    ) -> Result<CatalogError> {
        let Some(current) = self.entry(address).await? else {
            return Ok(CatalogError::EntryNotFound(address.to_string()));
        };
        let from = current.status();
        if !from.can_transition_to(to) {
            return Ok(CatalogError::IllegalTransition {
                address: address.to_string(),
                from,
                to,
            });
        }
        let bytes = bytes.unwrap_or_else(|| current.bytes());
        match current.size_bytes().filter(|_| current.size_exact) {
            Some(size) => Ok(CatalogError::InvalidProgress {
                address: address.to_string(),
                bytes,
                size,
            }),
            // Status moved underneath us between the update and this read.
            None => Ok(CatalogError::IllegalTransition {
                address: address.to_string(),
                from,
                to,
            }),
        }
    }

    /// Records the attempt counter and, when given, the most recent error.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EntryNotFound`] if no entry has this address.
    pub async fn record_attempt(
        &self,
        address: &str,
        attempts: u32,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE entries
              SET attempts = ?, last_error = COALESCE(?, last_error), updated_at = datetime('now')
              WHERE address = ?",
        )
        .bind(i64::from(attempts))
        .bind(error)
        .bind(address)
        .execute(self.db.pool())
        .await?;
        check_affected(address, result.rows_affected())
    }

    /// Stores a byte-exact size reported by the remote.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EntryNotFound`] if no entry has this address, or
    /// [`CatalogError::Database`] if the size is below the stored progress.
    pub async fn record_size(&self, address: &str, size: u64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE entries
              SET size = ?, size_exact = 1, updated_at = datetime('now')
              WHERE address = ?",
        )
        .bind(to_i64(size))
        .bind(address)
        .execute(self.db.pool())
        .await?;
        check_affected(address, result.rows_affected())
    }

    /// Records the local path the transfer writes to.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EntryNotFound`] if no entry has this address.
    pub async fn set_local_path(&self, address: &str, local_path: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE entries SET local_path = ?, updated_at = datetime('now') WHERE address = ?",
        )
        .bind(local_path)
        .bind(address)
        .execute(self.db.pool())
        .await?;
        check_affected(address, result.rows_affected())
    }

    /// Sets or clears the throttled flag.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EntryNotFound`] if no entry has this address.
    pub async fn set_throttled(&self, address: &str, throttled: bool) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE entries SET throttled = ?, updated_at = datetime('now') WHERE address = ?",
        )
        .bind(throttled)
        .bind(address)
        .execute(self.db.pool())
        .await?;
        check_affected(address, result.rows_affected())
    }

    /// Stores the content digest and average throughput of a finished transfer.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EntryNotFound`] if no entry has this address.
    pub async fn record_completion(
        &self,
        address: &str,
        sha256: &str,
        average_speed_bps: Option<f64>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE entries
              SET sha256 = ?, average_speed_bps = ?, updated_at = datetime('now')
              WHERE address = ?",
        )
        .bind(sha256)
        .bind(average_speed_bps)
        .bind(address)
        .execute(self.db.pool())
        .await?;
        check_affected(address, result.rows_affected())
    }

    /// Stores the advisory verification flag. Transfer status is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::EntryNotFound`] if no entry has this address.
    pub async fn record_verification(
        &self,
        address: &str,
        verification: Verification,
        detail: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE entries
              SET verification = ?, verification_detail = ?, updated_at = datetime('now')
              WHERE address = ?",
        )
        .bind(verification.as_str())
        .bind(detail)
        .bind(address)
        .execute(self.db.pool())
        .await?;
        check_affected(address, result.rows_affected())
    }

    /// Moves entries left `downloading` by a dead process to `paused`.
    ///
    /// Returns the number of entries recovered.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE entries
              SET status = 'paused', throttled = 0, updated_at = datetime('now')
              WHERE status = 'downloading'",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Counts entries in a status.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn count_by_status(&self, status: TransferStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Distinct consoles present in the catalog, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn consoles(&self) -> Result<Vec<String>> {
        let consoles: Vec<String> = sqlx::query_scalar(
            r"SELECT DISTINCT console FROM entries WHERE console IS NOT NULL ORDER BY console",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(consoles)
    }

    /// Per-collection aggregates recomputed from current rows.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn collection_stats(&self) -> Result<Vec<CollectionStats>> {
        let stats = sqlx::query_as::<_, CollectionStats>(stats::COLLECTION_STATS_SQL)
            .fetch_all(self.db.pool())
            .await?;
        Ok(stats)
    }

    /// Catalog-wide aggregates recomputed from current rows.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn overall_stats(&self) -> Result<OverallStats> {
        let stats = sqlx::query_as::<_, OverallStats>(stats::OVERALL_STATS_SQL)
            .fetch_one(self.db.pool())
            .await?;
        Ok(stats)
    }

    /// Both aggregates read inside one transaction, so they describe the same snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if either query fails.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<CatalogStats> {
        let mut tx = self.db.pool().begin().await?;
        let overall = sqlx::query_as::<_, OverallStats>(stats::OVERALL_STATS_SQL)
            .fetch_one(&mut *tx)
            .await?;
        let collections = sqlx::query_as::<_, CollectionStats>(stats::COLLECTION_STATS_SQL)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(CatalogStats {
            overall,
            collections,
        })
    }

    /// Persists the summary counters of a finished crawl.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the insert fails.
    pub async fn record_crawl_run(&self, run: &CrawlRunRecord<'_>) -> Result<i64> {
        let started = run
            .started_at
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| to_i64(elapsed.as_secs()))
            .unwrap_or(0);
        let id: i64 = sqlx::query_scalar(
            r"INSERT INTO crawl_runs
                (root, state, locations_visited, entries_discovered, errors, started_at)
              VALUES (?, ?, ?, ?, ?, datetime(?, 'unixepoch'))
              RETURNING id",
        )
        .bind(run.root)
        .bind(run.state)
        .bind(to_i64(run.locations_visited))
        .bind(to_i64(run.entries_discovered))
        .bind(to_i64(run.errors))
        .bind(started)
        .fetch_one(self.db.pool())
        .await?;
        Ok(id)
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &EntryFilter) {
    if let Some(console) = &filter.console {
        builder.push(" AND e.console = ").push_bind(console.clone());
    }
    if let Some(collection) = &filter.collection {
        builder.push(" AND c.name = ").push_bind(collection.clone());
    }
    if let Some(text) = &filter.text {
        let prefix = normalize(text);
        if !prefix.is_empty() {
            // Range form keeps the normalized_name index usable.
            builder
                .push(" AND e.normalized_name >= ")
                .push_bind(prefix.clone())
                .push(" AND e.normalized_name < ")
                .push_bind(prefix_upper_bound(&prefix));
        }
    }
    if let Some(status) = filter.status {
        builder.push(" AND e.status = ").push_bind(status.as_str());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn collection(name: &str) -> CollectionSpec {
        CollectionSpec {
            name: name.to_string(),
            content_type: ContentType::Cartridge,
            cadence: Cadence::Daily,
        }
    }

    fn new_entry(address: &str, name: &str, size: Option<u64>) -> NewEntry {
        NewEntry {
            address: address.to_string(),
            name: name.to_string(),
            normalized_name: normalize(name),
            size,
            size_exact: true,
            console: Some("Game Boy".to_string()),
            region: Some("USA".to_string()),
            collection: collection("No-Intro"),
            parent_path: "No-Intro/Nintendo - Game Boy".to_string(),
            format: "zip".to_string(),
            requires_conversion: false,
        }
    }

    async fn catalog() -> Catalog {
        Catalog::new(Database::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates_same_address() {
        let catalog = catalog().await;
        let entry = new_entry("https://h/a.zip", "Alpha (USA).zip", Some(10));

        assert_eq!(catalog.upsert(&entry).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(catalog.upsert(&entry).await.unwrap(), UpsertOutcome::Updated);

        let stats = catalog.overall_stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.collections, 1);
    }

    #[tokio::test]
    async fn test_upsert_does_not_touch_transfer_state() {
        let catalog = catalog().await;
        let entry = new_entry("https://h/a.zip", "Alpha.zip", Some(10));
        catalog.upsert(&entry).await.unwrap();
        catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Downloading, 4)
            .await
            .unwrap();

        catalog.upsert(&entry).await.unwrap();

        let stored = catalog.entry("https://h/a.zip").await.unwrap().unwrap();
        assert_eq!(stored.status(), TransferStatus::Downloading);
        assert_eq!(stored.bytes(), 4);
    }

    #[tokio::test]
    async fn test_update_transfer_state_rejects_illegal_transition() {
        let catalog = catalog().await;
        catalog
            .upsert(&new_entry("https://h/a.zip", "Alpha.zip", Some(10)))
            .await
            .unwrap();

        let result = catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Completed, 10)
            .await;

        assert!(matches!(
            result,
            Err(CatalogError::IllegalTransition {
                from: TransferStatus::Pending,
                to: TransferStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_update_transfer_state_rejects_bytes_beyond_size() {
        let catalog = catalog().await;
        catalog
            .upsert(&new_entry("https://h/a.zip", "Alpha.zip", Some(10)))
            .await
            .unwrap();

        let result = catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Downloading, 11)
            .await;

        assert!(matches!(
            result,
            Err(CatalogError::InvalidProgress { bytes: 11, size: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_rounded_size_does_not_bound_progress() {
        let catalog = catalog().await;
        let mut entry = new_entry("https://h/a.zip", "Alpha.zip", Some(1_000));
        entry.size_exact = false;
        catalog.upsert(&entry).await.unwrap();

        catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Downloading, 3_000)
            .await
            .unwrap();
        catalog
            .mark_failed("https://h/a.zip", 3_100, "connection reset")
            .await
            .unwrap();

        let stored = catalog.entry("https://h/a.zip").await.unwrap().unwrap();
        assert_eq!(stored.status(), TransferStatus::Failed);
        assert_eq!(stored.bytes(), 3_100);
        assert_eq!(stored.progress_percent(), Some(100.0));
    }

    #[tokio::test]
    async fn test_completed_requires_full_length() {
        let catalog = catalog().await;
        catalog
            .upsert(&new_entry("https://h/a.zip", "Alpha.zip", Some(10)))
            .await
            .unwrap();
        catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Downloading, 5)
            .await
            .unwrap();

        let short = catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Completed, 5)
            .await;
        assert!(matches!(short, Err(CatalogError::InvalidProgress { .. })));

        catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Completed, 10)
            .await
            .unwrap();
        let stored = catalog.entry("https://h/a.zip").await.unwrap().unwrap();
        assert_eq!(stored.status(), TransferStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.progress_percent(), Some(100.0));
    }

    #[tokio::test]
    async fn test_update_transfer_state_unknown_address() {
        let catalog = catalog().await;
        let result = catalog
            .update_transfer_state("https://h/missing.zip", TransferStatus::Downloading, 0)
            .await;
        assert!(matches!(result, Err(CatalogError::EntryNotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_cause() {
        let catalog = catalog().await;
        catalog
            .upsert(&new_entry("https://h/a.zip", "Alpha.zip", Some(10)))
            .await
            .unwrap();
        catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Downloading, 3)
            .await
            .unwrap();

        catalog
            .mark_failed("https://h/a.zip", 3, "HTTP 503 downloading https://h/a.zip")
            .await
            .unwrap();

        let stored = catalog.entry("https://h/a.zip").await.unwrap().unwrap();
        assert_eq!(stored.status(), TransferStatus::Failed);
        assert_eq!(stored.bytes(), 3);
        assert_eq!(
            stored.last_error.as_deref(),
            Some("HTTP 503 downloading https://h/a.zip")
        );
    }

    #[tokio::test]
    async fn test_query_by_filter_applies_all_predicates_and_paginates() {
        let catalog = catalog().await;
        for (i, name) in ["Alpha.zip", "Alpine.zip", "Beta.zip"].iter().enumerate() {
            catalog
                .upsert(&new_entry(&format!("https://h/{i}.zip"), name, Some(1)))
                .await
                .unwrap();
        }
        let mut other = new_entry("https://h/snes.zip", "Alpha.zip", Some(1));
        other.console = Some("Super Nintendo".to_string());
        catalog.upsert(&other).await.unwrap();

        let filter = EntryFilter {
            console: Some("Game Boy".to_string()),
            text: Some("AL".to_string()),
            ..EntryFilter::default()
        };
        let all = catalog.query_by_filter(&filter, 10, 0).await.unwrap();
        let names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha.zip", "Alpine.zip"]);

        let second_page = catalog.query_by_filter(&filter, 1, 1).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].name, "Alpine.zip");

        let unfiltered = catalog
            .query_by_filter(&EntryFilter::default(), 100, 0)
            .await
            .unwrap();
        assert_eq!(unfiltered.len(), 4);
    }

    #[tokio::test]
    async fn test_recrawl_does_not_overwrite_exact_size() {
        let catalog = catalog().await;
        let mut entry = new_entry("https://h/a.zip", "Alpha.zip", Some(1000));
        entry.size_exact = false;
        catalog.upsert(&entry).await.unwrap();
        catalog.record_size("https://h/a.zip", 1023).await.unwrap();

        catalog.upsert(&entry).await.unwrap();

        let stored = catalog.entry("https://h/a.zip").await.unwrap().unwrap();
        assert_eq!(stored.size, Some(1023));
        assert!(stored.size_exact);
    }

    #[tokio::test]
    async fn test_recover_interrupted_pauses_downloading() {
        let catalog = catalog().await;
        catalog
            .upsert(&new_entry("https://h/a.zip", "Alpha.zip", Some(10)))
            .await
            .unwrap();
        catalog
            .update_transfer_state("https://h/a.zip", TransferStatus::Downloading, 6)
            .await
            .unwrap();

        assert_eq!(catalog.recover_interrupted().await.unwrap(), 1);
        let stored = catalog.entry("https://h/a.zip").await.unwrap().unwrap();
        assert_eq!(stored.status(), TransferStatus::Paused);
        assert_eq!(stored.bytes(), 6);
    }

    #[tokio::test]
    async fn test_stats_snapshot_counts_and_sizes() {
        let catalog = catalog().await;
        catalog
            .upsert(&new_entry("https://h/a.zip", "Alpha.zip", Some(10)))
            .await
            .unwrap();
        let mut redump = new_entry("https://h/b.iso", "Beta.iso", Some(90));
        redump.collection = CollectionSpec {
            name: "Redump".to_string(),
            content_type: ContentType::OpticalDisc,
            cadence: Cadence::Weekly,
        };
        redump.console = Some("PlayStation".to_string());
        catalog.upsert(&redump).await.unwrap();

        let stats = catalog.stats().await.unwrap();
        assert_eq!(stats.overall.total_entries, 2);
        assert_eq!(stats.overall.total_size, 100);
        assert_eq!(stats.overall.pending, 2);
        assert_eq!(stats.overall.consoles, 2);
        let names: Vec<_> = stats.collections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["No-Intro", "Redump"]);
        assert_eq!(stats.collections[1].total_size, 90);
    }

    #[tokio::test]
    async fn test_record_crawl_run_returns_id() {
        let catalog = catalog().await;
        let id = catalog
            .record_crawl_run(&CrawlRunRecord {
                root: "https://h/files/",
                state: "completed",
                locations_visited: 3,
                entries_discovered: 12,
                errors: 1,
                started_at: SystemTime::now(),
            })
            .await
            .unwrap();
        assert!(id > 0);
    }
}
