//! Catalog record types and the transfer status machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Transfer status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Discovered, not yet transferred.
    Pending,
    /// Owned by a download worker.
    Downloading,
    /// Fully on disk at declared length.
    Completed,
    /// Last attempt ended in a terminal error.
    Failed,
    /// Stopped by the user or by a dead process; resumable.
    Paused,
}

impl TransferStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Downloading,
        Self::Completed,
        Self::Failed,
        Self::Paused,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Transition table for transfer status.
    ///
    /// `downloading -> downloading` is the progress-flush self loop. `completed`
    /// only leaves through an integrity failure.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TransferStatus::{Completed, Downloading, Failed, Paused, Pending};
        matches!(
            (self, next),
            (Pending, Downloading | Paused | Failed)
                | (Downloading, Downloading | Completed | Failed | Paused)
                | (Paused, Pending | Downloading | Failed)
                | (Failed, Pending | Downloading)
                | (Completed, Failed)
        )
    }

    /// Statuses from which `next` may be entered.
    #[must_use]
    pub fn predecessors(next: Self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("invalid transfer status: {s}")),
        }
    }
}

/// Advisory integrity flag, independent of [`TransferStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Unchecked,
    /// Every container member matched its stored checksum.
    Verified,
    /// At least one member failed its checksum.
    Mismatch,
    /// The container trailer or structure could not be parsed.
    Unreadable,
}

impl Verification {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Verified => "verified",
            Self::Mismatch => "mismatch",
            Self::Unreadable => "unreadable",
        }
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Verification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unchecked" => Ok(Self::Unchecked),
            "verified" => Ok(Self::Verified),
            "mismatch" => Ok(Self::Mismatch),
            "unreadable" => Ok(Self::Unreadable),
            _ => Err(format!("invalid verification state: {s}")),
        }
    }
}

/// Declared content category of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Cartridge,
    OpticalDisc,
    Arcade,
    Computer,
    Documentation,
    Mixed,
}

impl ContentType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cartridge => "cartridge",
            Self::OpticalDisc => "optical_disc",
            Self::Arcade => "arcade",
            Self::Computer => "computer",
            Self::Documentation => "documentation",
            Self::Mixed => "mixed",
        }
    }
}

/// Expected update cadence of a collection upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
    Irregular,
    Static,
}

impl Cadence {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Irregular => "irregular",
            Self::Static => "static",
        }
    }
}

/// Collection identity as produced by classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSpec {
    pub name: String,
    pub content_type: ContentType,
    pub cadence: Cadence,
}

/// A discovered file, ready to be upserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Absolute remote address; the unique key.
    pub address: String,
    /// Decoded leaf filename.
    pub name: String,
    /// Search key cached alongside the name.
    pub normalized_name: String,
    pub size: Option<u64>,
    /// True when `size` is a byte-exact count rather than a rounded listing value.
    pub size_exact: bool,
    pub console: Option<String>,
    pub region: Option<String>,
    pub collection: CollectionSpec,
    /// Archive-relative directory the file was listed in.
    pub parent_path: String,
    /// Lower-case filename extension, empty when absent.
    pub format: String,
    pub requires_conversion: bool,
}

/// Whether an upsert created a row or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// A catalog entry as stored.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Entry {
    pub id: i64,
    pub address: String,
    pub name: String,
    pub normalized_name: String,
    pub size: Option<i64>,
    pub size_exact: bool,
    pub console: Option<String>,
    pub region: Option<String>,
    /// Owning collection name.
    pub collection: String,
    pub parent_path: String,
    pub format: String,
    pub requires_conversion: bool,
    /// Transfer status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    pub bytes_transferred: i64,
    pub local_path: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub throttled: bool,
    pub average_speed_bps: Option<f64>,
    /// Verification flag (stored as text, parsed via `verification()`).
    #[sqlx(rename = "verification")]
    #[serde(rename = "verification")]
    pub verification_str: String,
    pub verification_detail: Option<String>,
    pub sha256: Option<String>,
    pub added_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl Entry {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.status_str.parse().unwrap_or(TransferStatus::Pending)
    }

    /// Returns the parsed verification flag.
    #[must_use]
    pub fn verification(&self) -> Verification {
        self.verification_str
            .parse()
            .unwrap_or(Verification::Unchecked)
    }

    /// Declared size in bytes, when known.
    #[must_use]
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.and_then(|size| u64::try_from(size).ok())
    }

    /// Bytes already transferred.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        u64::try_from(self.bytes_transferred).unwrap_or(0)
    }

    /// Derived progress in percent; `None` while the size is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> Option<f64> {
        match self.size_bytes() {
            Some(0) => Some(if self.status() == TransferStatus::Completed {
                100.0
            } else {
                0.0
            }),
            Some(size) => Some((self.bytes() as f64 / size as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entry {{ address: {}, status: {} }}",
            self.address,
            self.status()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_status_round_trip_strings() {
        for status in TransferStatus::ALL {
            assert_eq!(status.as_str().parse::<TransferStatus>(), Ok(status));
        }
        assert!("in_progress".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_transfer_status_completed_only_leaves_to_failed() {
        assert!(TransferStatus::Completed.can_transition_to(TransferStatus::Failed));
        assert!(!TransferStatus::Completed.can_transition_to(TransferStatus::Pending));
        assert!(!TransferStatus::Completed.can_transition_to(TransferStatus::Downloading));
        assert!(!TransferStatus::Failed.can_transition_to(TransferStatus::Completed));
    }

    #[test]
    fn test_transfer_status_progress_self_loop() {
        assert!(TransferStatus::Downloading.can_transition_to(TransferStatus::Downloading));
        assert!(!TransferStatus::Pending.can_transition_to(TransferStatus::Pending));
    }

    #[test]
    fn test_transfer_status_predecessors_of_completed() {
        assert_eq!(
            TransferStatus::predecessors(TransferStatus::Completed),
            vec![TransferStatus::Downloading]
        );
    }

    #[test]
    fn test_verification_parse() {
        assert_eq!("mismatch".parse::<Verification>(), Ok(Verification::Mismatch));
        assert!("ok".parse::<Verification>().is_err());
    }
}
