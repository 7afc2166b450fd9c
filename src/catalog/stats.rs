//! Aggregate statistics recomputed from current catalog rows.

use serde::Serialize;
use sqlx::FromRow;

/// Per-collection aggregate, read from the `collection_stats` view.
#[derive(Debug, Clone, FromRow, Serialize, PartialEq)]
pub struct CollectionStats {
    pub name: String,
    pub content_type: String,
    pub cadence: String,
    pub entry_count: i64,
    pub total_size: i64,
    pub completed_count: i64,
    pub completed_size: i64,
}

/// Catalog-wide aggregate.
#[derive(Debug, Clone, Default, FromRow, Serialize, PartialEq)]
pub struct OverallStats {
    pub total_entries: i64,
    pub total_size: i64,
    pub pending: i64,
    pub downloading: i64,
    pub completed: i64,
    pub failed: i64,
    pub paused: i64,
    pub completed_size: i64,
    pub collections: i64,
    pub consoles: i64,
    pub requires_conversion: i64,
    pub verified: i64,
}

/// Both aggregates taken from one read snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogStats {
    pub overall: OverallStats,
    pub collections: Vec<CollectionStats>,
}

pub(super) const OVERALL_STATS_SQL: &str = r"
SELECT
    COUNT(*) AS total_entries,
    COALESCE(SUM(size), 0) AS total_size,
    COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
    COALESCE(SUM(CASE WHEN status = 'downloading' THEN 1 ELSE 0 END), 0) AS downloading,
    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
    COALESCE(SUM(CASE WHEN status = 'paused' THEN 1 ELSE 0 END), 0) AS paused,
    COALESCE(SUM(CASE WHEN status = 'completed' THEN size ELSE 0 END), 0) AS completed_size,
    (SELECT COUNT(*) FROM collections) AS collections,
    COUNT(DISTINCT console) AS consoles,
    COALESCE(SUM(requires_conversion), 0) AS requires_conversion,
    COALESCE(SUM(CASE WHEN verification = 'verified' THEN 1 ELSE 0 END), 0) AS verified
FROM entries
";

pub(super) const COLLECTION_STATS_SQL: &str = r"
SELECT name, content_type, cadence, entry_count, total_size, completed_count, completed_size
FROM collection_stats
ORDER BY name ASC
";
