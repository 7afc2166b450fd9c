//! Progress UI (bar and spinner) for crawl and download runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use myrient_core::{CrawlSnapshot, DownloadStatus};

/// How often commands poll the context for fresh counters.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(120);

/// Spinner for a crawl; hidden when `visible` is false.
pub(crate) fn crawl_spinner(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

pub(crate) fn crawl_message(snapshot: &CrawlSnapshot) -> String {
    let location = snapshot
        .current_location
        .as_deref()
        .unwrap_or("starting");
    format!(
        "[{} listings, {} files, {} errors] {location}",
        snapshot.locations_visited, snapshot.entries_discovered, snapshot.errors
    )
}

/// Bar over `total` queued transfers; hidden when `visible` is false.
pub(crate) fn download_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Transfers that reached a terminal or paused state.
pub(crate) fn settled(status: &DownloadStatus) -> u64 {
    (status.completed + status.failed + status.paused) as u64
}

pub(crate) fn download_message(status: &DownloadStatus) -> String {
    let mut message = format!("{} active, {} queued", status.active, status.queued);
    if status.failed > 0 {
        message.push_str(&format!(", {} failed", status.failed));
    }
    if !status.throttled.is_empty() {
        message.push_str(&format!(", {} throttled", status.throttled.len()));
    }
    message
}
