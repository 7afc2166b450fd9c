//! Error types for catalog operations.

use std::fmt;

use thiserror::Error;

use super::TransferStatus;

/// Structured classification for catalog/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl CatalogDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }

    /// Returns true when the catalog itself is unusable, not just one statement.
    #[must_use]
    pub fn is_unavailable(self) -> bool {
        matches!(self, Self::PoolClosed | Self::PoolTimeout | Self::Io)
    }
}

impl fmt::Display for CatalogDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> CatalogDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return CatalogDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return CatalogDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return CatalogDbErrorKind::BusyOrLocked;
    }

    CatalogDbErrorKind::Other
}

/// Errors that can occur during catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Database operation failed.
    #[error("catalog database error ({kind}): {message}")]
    Database {
        /// Typed classification of the failure.
        kind: CatalogDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// No entry exists for the address.
    #[error("no catalog entry for {0}")]
    EntryNotFound(String),

    /// The requested status change is not in the transition table.
    #[error("illegal transfer transition for {address}: {from} -> {to}")]
    IllegalTransition {
        /// Entry address.
        address: String,
        /// Current stored status.
        from: TransferStatus,
        /// Requested status.
        to: TransferStatus,
    },

    /// Progress would break an exact size: `bytes_transferred <= size` or `completed => bytes == size`.
    #[error("invalid progress for {address}: {bytes} bytes against declared size {size}")]
    InvalidProgress {
        /// Entry address.
        address: String,
        /// Requested byte count.
        bytes: u64,
        /// Declared size on record.
        size: u64,
    },

    /// A stored status string is not recognized.
    #[error("invalid status '{0}'")]
    InvalidStatus(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: CatalogDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl CatalogError {
    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<CatalogDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_from_pool_timeout_is_unavailable() {
        let error = CatalogError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(error.database_kind(), Some(CatalogDbErrorKind::PoolTimeout));
        assert!(CatalogDbErrorKind::PoolTimeout.is_unavailable());
    }

    #[test]
    fn test_catalog_error_illegal_transition_display() {
        let error = CatalogError::IllegalTransition {
            address: "https://h/x.zip".to_string(),
            from: TransferStatus::Failed,
            to: TransferStatus::Completed,
        };
        assert_eq!(
            error.to_string(),
            "illegal transfer transition for https://h/x.zip: failed -> completed"
        );
        assert_eq!(error.database_kind(), None);
    }

    #[test]
    fn test_catalog_db_error_kind_display() {
        assert_eq!(CatalogDbErrorKind::BusyOrLocked.to_string(), "busy_or_locked");
        assert_eq!(
            CatalogDbErrorKind::ConstraintViolation.to_string(),
            "constraint_violation"
        );
    }
}
