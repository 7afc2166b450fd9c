//! Integrity verification of zip / TorrentZip containers.
//!
//! [`verify_file`] parses the container's trailer and central directory,
//! then recomputes each member's CRC-32 over its decompressed bytes. Every
//! member is checked before an overall outcome is decided. The file is only
//! ever opened for reading.
//!
//! A file is [`VerifyOutcome::Verified`] only if every member passes (and a
//! TorrentZip comment, when present, matches the directory). Anything else is
//! [`VerifyOutcome::Unverifiable`], with the reason telling a damaged member
//! apart from an unreadable container.

mod container;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogError, TransferStatus, TransferStore, Verification};

/// Errors that prevent verification from running at all.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The file could not be opened.
    #[error("cannot open {path} for verification: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking verification task died.
    #[error("verification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of checking one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberResult {
    pub name: String,
    pub stored_crc32: u32,
    /// `None` when the data could not be read or decoded.
    pub computed_crc32: Option<u32>,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub passed: bool,
    /// What went wrong, for failed members.
    pub problem: Option<String>,
}

/// Outcome of the TorrentZip comment check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TorrentZipCheck {
    /// No `TORRENTZIPPED-` comment.
    NotTorrentZip,
    /// Comment CRC matches the central directory.
    Valid,
    /// Comment CRC does not match the central directory.
    Invalid { expected: u32, actual: u32 },
}

/// Why a file is not verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnverifiableReason {
    /// One or more members failed their checksum or size check.
    MemberMismatch { members: Vec<String> },
    /// The trailer or directory structure could not be read.
    Container { reason: String },
}

/// Overall verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Verified,
    Unverifiable(UnverifiableReason),
}

/// Per-member report for one file.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub path: PathBuf,
    pub members: Vec<MemberResult>,
    pub torrentzip: TorrentZipCheck,
    pub outcome: VerifyOutcome,
}

impl VerifyReport {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.outcome == VerifyOutcome::Verified
    }

    /// Names of members that failed.
    #[must_use]
    pub fn failed_members(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| !m.passed)
            .map(|m| m.name.as_str())
            .collect()
    }

    /// The advisory flag to store in the catalog.
    #[must_use]
    pub fn verification(&self) -> Verification {
        match &self.outcome {
            VerifyOutcome::Verified => Verification::Verified,
            VerifyOutcome::Unverifiable(UnverifiableReason::MemberMismatch { .. }) => {
                Verification::Mismatch
            }
            VerifyOutcome::Unverifiable(UnverifiableReason::Container { .. }) => {
                Verification::Unreadable
            }
        }
    }

    /// One-line description for the catalog's `verification_detail`.
    #[must_use]
    pub fn summary(&self) -> String {
        let passed = self.members.iter().filter(|m| m.passed).count();
        match &self.outcome {
            VerifyOutcome::Verified => format!("{passed}/{} members verified", self.members.len()),
            VerifyOutcome::Unverifiable(UnverifiableReason::MemberMismatch { members }) => {
                format!("member mismatch: {}", members.join(", "))
            }
            VerifyOutcome::Unverifiable(UnverifiableReason::Container { reason }) => {
                format!("unreadable container: {reason}")
            }
        }
    }
}

/// True for files this module knows how to verify.
#[must_use]
pub fn is_verifiable_format(format: &str) -> bool {
    format.eq_ignore_ascii_case("zip")
}

/// Verifies a container on a blocking thread.
///
/// # Errors
///
/// Returns [`VerifyError::Io`] if the file cannot be opened. Structural
/// problems are reported in the outcome, not as errors.
#[instrument(fields(path = %path.display()))]
pub async fn verify_file(path: &Path) -> Result<VerifyReport, VerifyError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || verify_file_blocking(&path)).await?
}

/// Synchronous form of [`verify_file`].
///
/// # Errors
///
/// Returns [`VerifyError::Io`] if the file cannot be opened.
pub fn verify_file_blocking(path: &Path) -> Result<VerifyReport, VerifyError> {
    let mut file = std::fs::File::open(path).map_err(|source| VerifyError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let directory = match container::read_central_directory(&mut file) {
        Ok(directory) => directory,
        Err(container::ContainerError(reason)) => {
            debug!(%reason, "container unreadable");
            return Ok(VerifyReport {
                path: path.to_path_buf(),
                members: Vec::new(),
                torrentzip: TorrentZipCheck::NotTorrentZip,
                outcome: VerifyOutcome::Unverifiable(UnverifiableReason::Container { reason }),
            });
        }
    };

    let members: Vec<MemberResult> = directory
        .members
        .iter()
        .map(|entry| container::check_member(&mut file, entry))
        .collect();

    let failed: Vec<String> = members
        .iter()
        .filter(|m| !m.passed)
        .map(|m| m.name.clone())
        .collect();
    let outcome = if !failed.is_empty() {
        VerifyOutcome::Unverifiable(UnverifiableReason::MemberMismatch { members: failed })
    } else if let TorrentZipCheck::Invalid { expected, actual } = directory.torrentzip {
        VerifyOutcome::Unverifiable(UnverifiableReason::Container {
            reason: format!(
                "TorrentZip comment declares {expected:08X}, directory hashes to {actual:08X}"
            ),
        })
    } else {
        VerifyOutcome::Verified
    };

    Ok(VerifyReport {
        path: path.to_path_buf(),
        members,
        torrentzip: directory.torrentzip,
        outcome,
    })
}

/// Writes a report back as the entry's advisory flag.
///
/// A member mismatch also moves a completed entry to `failed` so it is
/// picked up again by the next download run. The file itself is kept.
///
/// # Errors
///
/// Returns [`CatalogError`] if the catalog write fails.
pub async fn apply_report(
    store: &dyn TransferStore,
    address: &str,
    report: &VerifyReport,
) -> Result<(), CatalogError> {
    let detail = report.summary();
    store
        .record_verification(address, report.verification(), Some(&detail))
        .await?;

    match report.verification() {
        Verification::Verified => info!(address, %detail, "verification passed"),
        Verification::Mismatch => {
            warn!(address, %detail, "integrity mismatch; file retained for inspection");
            if let Some(entry) = store.entry(address).await?
                && entry.status() == TransferStatus::Completed
            {
                store
                    .mark_failed(address, entry.bytes(), &format!("integrity check failed: {detail}"))
                    .await?;
            }
        }
        Verification::Unreadable | Verification::Unchecked => {
            warn!(address, %detail, "container could not be verified");
        }
    }
    Ok(())
}
