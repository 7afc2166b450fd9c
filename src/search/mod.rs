//! Ranked fuzzy search over the catalog.
//!
//! Console and collection filters are hard SQL predicates applied before any
//! scoring. Surviving candidates are read in id-ordered batches and scored on
//! their cached normalized names, ranked by descending score (ties by
//! ascending name) and cut at the configured minimum score. Only the best
//! `limit` hits are held between batches, so every candidate is considered.
//!
//! # Scoring
//!
//! ```text
//! score = max(lev(query, name), 0.9 * mean_q(max_n lev(q_token, n_token)))
//! ```
//!
//! where `lev` is the normalized Levenshtein similarity. The first term rewards
//! whole-title matches (an exact title scores 1.0), the second lets a short
//! query match inside a longer title without outranking an exact title.

mod normalize;
mod selection;

use std::cmp::Ordering;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::catalog::{Catalog, CatalogError, Entry, SearchCandidate};
use crate::classify::canonical_console;

pub use normalize::{normalize, tokens};
pub use selection::{SelectionError, parse_selection};

/// Default minimum score for a result to be returned.
pub const DEFAULT_MIN_SCORE: f64 = 0.6;

/// Default number of candidates loaded per scoring batch.
pub const DEFAULT_SEARCH_BATCH: u32 = 10_000;

/// Weight applied to the token-coverage term.
const TOKEN_MATCH_WEIGHT: f64 = 0.9;

/// Errors from search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("scoring task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Optional hard filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Console name or a known alias (`gb`, `snes`, `ps2`, ...).
    pub console: Option<String>,
    pub collection: Option<String>,
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entry: Entry,
    pub score: f64,
}

/// Read-only query layer over the catalog.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    catalog: Catalog,
    min_score: f64,
    batch_size: u32,
}

impl SearchEngine {
    #[must_use]
    pub fn new(catalog: Catalog, min_score: f64, batch_size: u32) -> Self {
        Self {
            catalog,
            min_score: min_score.clamp(0.0, 1.0),
            batch_size: batch_size.max(1),
        }
    }

    /// Returns the configured minimum score.
    #[must_use]
    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    /// Searches the catalog.
    ///
    /// An empty normalized query returns no results.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Catalog`] if the catalog cannot be read.
    #[instrument(skip(self), fields(min_score = self.min_score))]
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let query_norm = normalize(query);
        if query_norm.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let console = filters
            .console
            .as_deref()
            .map(|console| canonical_console(console).unwrap_or(console));
        let mut ranked: Vec<(SearchCandidate, f64)> = Vec::new();
        let mut candidate_count = 0usize;
        let mut after_id = 0i64;
        loop {
            let batch = self
                .catalog
                .search_candidates(
                    console,
                    filters.collection.as_deref(),
                    after_id,
                    self.batch_size,
                )
                .await?;
            let Some(last) = batch.last() else { break };
            after_id = last.id;
            candidate_count += batch.len();
            let exhausted = batch.len() < self.batch_size as usize;

            let query = query_norm.clone();
            let min_score = self.min_score;
            let best = std::mem::take(&mut ranked);
            ranked = tokio::task::spawn_blocking(move || {
                merge_ranked(best, rank_candidates(&query, batch, min_score, limit), limit)
            })
            .await?;
            if exhausted {
                break;
            }
        }

        let mut hits = Vec::with_capacity(ranked.len());
        for (candidate, score) in ranked {
            if let Some(entry) = self.catalog.entry(&candidate.address).await? {
                hits.push(SearchHit { entry, score });
            }
        }

        debug!(candidate_count, hits = hits.len(), "search complete");
        Ok(hits)
    }
}

/// Scores, thresholds, orders and truncates candidates.
#[must_use]
pub fn rank_candidates(
    query_norm: &str,
    candidates: Vec<SearchCandidate>,
    min_score: f64,
    limit: usize,
) -> Vec<(SearchCandidate, f64)> {
    let mut scored: Vec<(SearchCandidate, f64)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let score = score(query_norm, &candidate.normalized_name);
            (score >= min_score).then_some((candidate, score))
        })
        .collect();

    scored.sort_by(compare_ranked);
    scored.truncate(limit);
    scored
}

/// Merges two ranked lists, keeping the best `limit`.
fn merge_ranked(
    mut best: Vec<(SearchCandidate, f64)>,
    batch: Vec<(SearchCandidate, f64)>,
    limit: usize,
) -> Vec<(SearchCandidate, f64)> {
    best.extend(batch);
    best.sort_by(compare_ranked);
    best.truncate(limit);
    best
}

/// Best first; equal scores fall back to ascending name.
fn compare_ranked(left: &(SearchCandidate, f64), right: &(SearchCandidate, f64)) -> Ordering {
    right
        .1
        .partial_cmp(&left.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| left.0.name.cmp(&right.0.name))
        .then_with(|| left.0.address.cmp(&right.0.address))
}

/// Similarity in `[0, 1]` between a normalized query and a normalized name.
#[must_use]
pub fn score(query_norm: &str, name_norm: &str) -> f64 {
    if query_norm.is_empty() || name_norm.is_empty() {
        return 0.0;
    }
    if query_norm == name_norm {
        return 1.0;
    }

    let whole = strsim::normalized_levenshtein(query_norm, name_norm);

    let name_tokens = tokens(name_norm);
    let query_tokens = tokens(query_norm);
    #[allow(clippy::cast_precision_loss)]
    let coverage = query_tokens
        .iter()
        .map(|query_token| {
            name_tokens
                .iter()
                .map(|name_token| strsim::normalized_levenshtein(query_token, name_token))
                .fold(0.0_f64, f64::max)
        })
        .sum::<f64>()
        / query_tokens.len().max(1) as f64;

    whole.max(TOKEN_MATCH_WEIGHT * coverage).clamp(0.0, 1.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> SearchCandidate {
        SearchCandidate {
            id: 0,
            address: format!("https://h/{name}"),
            name: name.to_string(),
            normalized_name: normalize(name),
        }
    }

    #[test]
    fn test_score_exact_title_is_one() {
        assert!((score("tetris", "tetris") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_token_match_below_exact() {
        let inside = score("mario", "super mario land");
        assert!((inside - 0.9).abs() < 1e-9, "got {inside}");
    }

    #[test]
    fn test_score_unrelated_is_low() {
        assert!(score("mario", "zelda") < DEFAULT_MIN_SCORE);
    }

    #[test]
    fn test_score_bounds() {
        for (q, n) in [("a", "b"), ("abc", "abcdef ghi"), ("x y z", "x")] {
            let s = score(q, n);
            assert!((0.0..=1.0).contains(&s), "{q} vs {n} = {s}");
        }
        assert!(score("", "x").abs() < f64::EPSILON);
    }

    #[test]
    fn test_rank_candidates_orders_by_score_then_name() {
        let ranked = rank_candidates(
            "mario",
            vec![
                candidate("Super Mario Land (World).zip"),
                candidate("Mario (USA).zip"),
                candidate("Dr. Mario (World).zip"),
                candidate("Tetris (World).zip"),
            ],
            DEFAULT_MIN_SCORE,
            10,
        );

        let names: Vec<_> = ranked.iter().map(|(c, _)| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Mario (USA).zip",
                "Dr. Mario (World).zip",
                "Super Mario Land (World).zip"
            ]
        );
    }

    #[test]
    fn test_rank_candidates_threshold_applies_before_limit() {
        let ranked = rank_candidates(
            "mario",
            vec![candidate("Mario.zip"), candidate("Kirby.zip")],
            DEFAULT_MIN_SCORE,
            10,
        );
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_rank_candidates_truncates_to_limit() {
        let ranked = rank_candidates(
            "mario",
            vec![
                candidate("Mario.zip"),
                candidate("Mario 2.zip"),
                candidate("Mario 3.zip"),
            ],
            0.0,
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0.name, "Mario.zip");
    }

    #[test]
    fn test_merge_ranked_keeps_best_across_batches() {
        let first = rank_candidates(
            "mario",
            vec![candidate("Super Mario Land.zip"), candidate("Dr. Mario.zip")],
            DEFAULT_MIN_SCORE,
            2,
        );
        let second = rank_candidates("mario", vec![candidate("Mario.zip")], DEFAULT_MIN_SCORE, 2);

        let merged = merge_ranked(first, second, 2);

        let names: Vec<_> = merged.iter().map(|(c, _)| c.name.as_str()).collect();
        assert_eq!(names, vec!["Mario.zip", "Dr. Mario.zip"]);
    }
}
