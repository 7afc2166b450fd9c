//! Error types for the download module.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors from a single request or transfer.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS, connection refused or reset, TLS).
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request did not complete within the configured timeout.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        url: String,
        status: u16,
        /// Raw Retry-After header, if the server sent one.
        retry_after: Option<String>,
    },

    /// The server refused the byte range (HTTP 416).
    #[error("range starting at byte {offset} rejected for {url}")]
    RangeRejected { url: String, offset: u64 },

    /// The remote total differs from the size on record.
    #[error("length mismatch for {url}: expected {expected} bytes, remote reports {actual}")]
    LengthMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// The body ended before the announced length.
    #[error("transfer of {url} ended early: expected {expected} bytes, got {received}")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },

    /// Local file system error (create, write, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The address is not a valid URL.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Catalog read or write failed mid-transfer.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest failure, separating timeouts from other network errors.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn range_rejected(url: impl Into<String>, offset: u64) -> Self {
        Self::RangeRejected {
            url: url.into(),
            offset,
        }
    }

    pub fn length_mismatch(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::LengthMismatch {
            url: url.into(),
            expected,
            actual,
        }
    }

    pub fn truncated(url: impl Into<String>, expected: u64, received: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            expected,
            received,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// True for remote-protocol failures that call for restarting from byte zero.
    #[must_use]
    pub fn requires_restart(&self) -> bool {
        matches!(self, Self::RangeRejected { .. } | Self::LengthMismatch { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_names_status_and_url() {
        let msg = DownloadError::http_status("https://h/a.zip", 503).to_string();
        assert!(msg.contains("503"), "{msg}");
        assert!(msg.contains("https://h/a.zip"), "{msg}");
    }

    #[test]
    fn test_length_mismatch_display_carries_both_sizes() {
        let msg = DownloadError::length_mismatch("https://h/a.zip", 100, 120).to_string();
        assert!(msg.contains("100") && msg.contains("120"), "{msg}");
    }

    #[test]
    fn test_requires_restart_only_for_protocol_errors() {
        assert!(DownloadError::range_rejected("u", 10).requires_restart());
        assert!(DownloadError::length_mismatch("u", 1, 2).requires_restart());
        assert!(!DownloadError::timeout("u").requires_restart());
        assert!(!DownloadError::truncated("u", 10, 5).requires_restart());
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;
        let err = DownloadError::io(
            "/tmp/x.part",
            std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/tmp/x.part"));
    }
}
