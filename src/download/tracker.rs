//! Shared counters for a download manager, polled by collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::{DashMap, DashSet};
use serde::Serialize;

/// Live counters updated by transfer tasks and the coordinator.
///
/// Counters are cumulative for the life of the manager except `queued` and
/// `active`, which track current occupancy.
#[derive(Debug, Default)]
pub struct DownloadTracker {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    paused: AtomicUsize,
    retried: AtomicUsize,
    throttled: DashSet<String>,
    advisories: DashMap<String, String>,
}

/// Point-in-time view of a [`DownloadTracker`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStatus {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
    pub retried: usize,
    /// Addresses currently flagged as throttled, sorted.
    pub throttled: Vec<String>,
    /// Conversion advisories for completed entries, by address.
    pub advisories: Vec<String>,
}

impl DownloadStatus {
    /// True when nothing is waiting or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.active == 0
    }
}

impl DownloadTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> DownloadStatus {
        let mut throttled: Vec<String> = self.throttled.iter().map(|a| a.key().clone()).collect();
        throttled.sort();
        let mut advisories: Vec<(String, String)> = self
            .advisories
            .iter()
            .map(|a| (a.key().clone(), a.value().clone()))
            .collect();
        advisories.sort();
        DownloadStatus {
            queued: self.queued.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            throttled,
            advisories: advisories.into_iter().map(|(_, message)| message).collect(),
        }
    }

    pub(crate) fn enqueued(&self, count: usize) {
        self.queued.fetch_add(count, Ordering::SeqCst);
    }

    /// Moves one entry from queued to active.
    pub(crate) fn started(&self) {
        decrement(&self.queued);
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Drops one entry from the queue without it ever running.
    pub(crate) fn dequeued_unstarted(&self) {
        decrement(&self.queued);
    }

    pub(crate) fn finished_completed(&self, address: &str) {
        self.finish(address);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finished_failed(&self, address: &str) {
        self.finish(address);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finished_paused(&self, address: &str) {
        self.finish(address);
        self.paused.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_advisory(&self, address: &str, message: &str) {
        self.advisories
            .insert(address.to_string(), message.to_string());
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn mark_throttled(&self, address: &str) {
        self.throttled.insert(address.to_string());
    }

    pub(crate) fn clear_throttled(&self, address: &str) {
        self.throttled.remove(address);
    }

    fn finish(&self, address: &str) {
        decrement(&self.active);
        self.clear_throttled(address);
    }
}

fn decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_moves_entries_through_states() {
        let tracker = DownloadTracker::new();
        tracker.enqueued(3);
        tracker.started();
        tracker.started();
        tracker.mark_throttled("https://h/a.zip");

        let status = tracker.snapshot();
        assert_eq!(status.queued, 1);
        assert_eq!(status.active, 2);
        assert_eq!(status.throttled, vec!["https://h/a.zip".to_string()]);

        tracker.finished_completed("https://h/a.zip");
        tracker.record_advisory("https://h/a.zip", "a.chd needs conversion");
        tracker.finished_failed("https://h/b.zip");
        tracker.dequeued_unstarted();

        let status = tracker.snapshot();
        assert!(status.is_idle());
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 1);
        assert!(status.throttled.is_empty());
        assert_eq!(status.advisories, vec!["a.chd needs conversion".to_string()]);
    }

    #[test]
    fn test_decrement_saturates_at_zero() {
        let tracker = DownloadTracker::new();
        tracker.dequeued_unstarted();
        assert_eq!(tracker.snapshot().queued, 0);
    }
}
