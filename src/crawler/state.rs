//! Process-wide crawl state, polled by collaborators while a run is active.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::Serialize;

/// Lifecycle of a crawl run: `idle → running → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl CrawlState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlSnapshot {
    pub state: CrawlState,
    pub root: Option<String>,
    /// Location currently being fetched, if any.
    pub current_location: Option<String>,
    pub locations_visited: u64,
    /// Files cataloged (inserted or refreshed).
    pub entries_discovered: u64,
    /// Files passed over by include/exclude patterns or the size cap.
    pub entries_filtered: u64,
    /// Non-fatal location failures.
    pub errors: u64,
    pub cancelled: bool,
    /// Cause of a `failed` run.
    pub failure: Option<String>,
}

#[derive(Debug)]
struct Phase {
    state: CrawlState,
    root: Option<String>,
    current_location: Option<String>,
    started_at: Option<SystemTime>,
    cancelled: bool,
    failure: Option<String>,
}

/// Shared, single-instance crawl state. A new run resets the counters.
#[derive(Debug)]
pub struct CrawlTracker {
    phase: Mutex<Phase>,
    visited: AtomicU64,
    discovered: AtomicU64,
    filtered: AtomicU64,
    errors: AtomicU64,
}

impl Default for CrawlTracker {
    fn default() -> Self {
        Self {
            phase: Mutex::new(Phase {
                state: CrawlState::Idle,
                root: None,
                current_location: None,
                started_at: None,
                cancelled: false,
                failure: None,
            }),
            visited: AtomicU64::new(0),
            discovered: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl CrawlTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves to `running` and resets counters. Returns false if a run is already active.
    pub fn begin(&self, root: &str) -> bool {
        let mut phase = self.lock();
        if phase.state == CrawlState::Running {
            return false;
        }
        *phase = Phase {
            state: CrawlState::Running,
            root: Some(root.to_string()),
            current_location: None,
            started_at: Some(SystemTime::now()),
            cancelled: false,
            failure: None,
        };
        for counter in [&self.visited, &self.discovered, &self.filtered, &self.errors] {
            counter.store(0, Ordering::SeqCst);
        }
        true
    }

    pub(crate) fn visiting(&self, location: &str) {
        self.visited.fetch_add(1, Ordering::SeqCst);
        self.lock().current_location = Some(location.to_string());
    }

    pub(crate) fn add_discovered(&self, count: u64) {
        self.discovered.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn add_filtered(&self, count: u64) {
        self.filtered.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn mark_cancelled(&self) {
        self.lock().cancelled = true;
    }

    pub(crate) fn complete(&self) {
        let mut phase = self.lock();
        phase.state = CrawlState::Completed;
        phase.current_location = None;
    }

    pub(crate) fn fail(&self, cause: &str) {
        let mut phase = self.lock();
        phase.state = CrawlState::Failed;
        phase.current_location = None;
        phase.failure = Some(cause.to_string());
    }

    /// When the current or last run began.
    #[must_use]
    pub fn started_at(&self) -> Option<SystemTime> {
        self.lock().started_at
    }

    #[must_use]
    pub fn snapshot(&self) -> CrawlSnapshot {
        let phase = self.lock();
        CrawlSnapshot {
            state: phase.state,
            root: phase.root.clone(),
            current_location: phase.current_location.clone(),
            locations_visited: self.visited.load(Ordering::SeqCst),
            entries_discovered: self.discovered.load(Ordering::SeqCst),
            entries_filtered: self.filtered.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            cancelled: phase.cancelled,
            failure: phase.failure.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Phase> {
        // A panic while holding the lock leaves plain data; keep using it.
        self.phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_lifecycle() {
        let tracker = CrawlTracker::new();
        assert_eq!(tracker.snapshot().state, CrawlState::Idle);

        assert!(tracker.begin("https://a/files/"));
        assert!(!tracker.begin("https://a/files/"));
        tracker.visiting("https://a/files/x/");
        tracker.add_discovered(3);
        tracker.add_error();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.state, CrawlState::Running);
        assert_eq!(snapshot.current_location.as_deref(), Some("https://a/files/x/"));
        assert_eq!(snapshot.entries_discovered, 3);
        assert_eq!(snapshot.errors, 1);

        tracker.complete();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.state, CrawlState::Completed);
        assert!(snapshot.current_location.is_none());
    }

    #[test]
    fn test_new_run_resets_counters() {
        let tracker = CrawlTracker::new();
        tracker.begin("https://a/");
        tracker.add_discovered(10);
        tracker.fail("root unreachable");
        assert_eq!(tracker.snapshot().failure.as_deref(), Some("root unreachable"));

        assert!(tracker.begin("https://a/"));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.entries_discovered, 0);
        assert!(snapshot.failure.is_none());
    }
}
