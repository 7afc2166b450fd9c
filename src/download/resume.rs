//! Local layout of transfers and partial-file reconciliation.
//!
//! A transfer writes to `<root>/<console or collection>/<name>.part` and
//! renames to the final name once complete. The partial file's length is the
//! record of what is on disk; the catalog's `bytes_transferred` is the record
//! of what was last persisted. On resume the smaller of the two is trusted and
//! the file is cut back to it.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::constants::PARTIAL_SUFFIX;
use crate::catalog::Entry;

/// Final location of a completed entry under `root`.
#[must_use]
pub fn final_path(root: &Path, entry: &Entry) -> PathBuf {
    let group = entry
        .console
        .as_deref()
        .filter(|console| !console.trim().is_empty())
        .unwrap_or(&entry.collection);
    root.join(sanitize_component(group))
        .join(sanitize_component(&entry.name))
}

/// In-flight location for a final path.
#[must_use]
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Makes a remote name safe as one path component.
///
/// ```
/// use myrient_core::download::sanitize_component;
///
/// assert_eq!(sanitize_component("Game: Part 1/2"), "Game_ Part 1_2");
/// assert_eq!(sanitize_component(".."), "_");
/// ```
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Length of a file, or zero when it does not exist.
///
/// # Errors
///
/// Returns any metadata error other than "not found".
pub async fn on_disk_len(path: &Path) -> io::Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Picks the offset to resume from and cuts the partial file back to it.
///
/// With `resume` disabled any partial data is discarded and zero is returned.
///
/// # Errors
///
/// Returns the IO error if the partial file cannot be inspected or truncated.
pub async fn reconcile_offset(partial: &Path, persisted: u64, resume: bool) -> io::Result<u64> {
    let on_disk = on_disk_len(partial).await?;
    let offset = if resume { on_disk.min(persisted) } else { 0 };
    if on_disk > offset {
        truncate(partial, offset).await?;
        debug!(
            path = %partial.display(),
            on_disk,
            persisted,
            offset,
            "partial file cut back to trusted length"
        );
    }
    Ok(offset)
}

/// Sets the file length, creating the file if missing.
///
/// # Errors
///
/// Returns the IO error from opening or resizing the file.
pub async fn truncate(path: &Path, len: u64) -> io::Result<()> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    file.set_len(len).await?;
    file.sync_all().await
}
