//! HTTP client wrapper for listings and byte-range transfers.
//!
//! Listings go through a client with transparent gzip decoding. Transfers use
//! a second client with decoding disabled so `Content-Length` and
//! `Content-Range` describe exactly the bytes written to disk.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;

/// HTTP client shared by the crawler and the download manager.
///
/// Cheap to clone; both inner clients pool connections.
#[derive(Debug, Clone)]
pub struct HttpClient {
    listing: Client,
    transfer: Client,
}

/// A successful response to a (possibly ranged) transfer request.
#[derive(Debug)]
pub struct RangeResponse {
    pub response: Response,
    /// Offset the body starts at. Zero when the server ignored the range.
    pub start: u64,
    /// Total size of the remote file, when the server disclosed it.
    pub total: Option<u64>,
}

impl RangeResponse {
    /// True when the server honored a non-zero range.
    #[must_use]
    pub fn resumed(&self) -> bool {
        self.start > 0
    }
}

impl HttpClient {
    /// Builds both clients with the given timeouts and User-Agent.
    ///
    /// `read_timeout` bounds a whole listing request. For transfers it bounds
    /// each read instead, so a slow body that keeps arriving never times out.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if TLS or proxy setup fails.
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, reqwest::Error> {
        let listing = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .gzip(true)
            .user_agent(user_agent)
            .build()?;
        let transfer = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .gzip(false)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { listing, transfer })
    }

    /// Fetches a directory listing page as text.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on network failure or non-success status.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_listing(&self, url: &str) -> Result<String, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let response = self
            .listing
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;
        let response = check_status(url, response)?;
        response
            .text()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))
    }

    /// Requests the file starting at `offset`.
    ///
    /// A 206 answer must start exactly at `offset`; a 200 answer means the
    /// server ignored the range and the body starts at zero.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::RangeRejected`] on HTTP 416 or a misaligned 206
    /// - [`DownloadError::HttpStatus`] on any other non-success status
    /// - [`DownloadError::Network`] / [`DownloadError::Timeout`] on transport failure
    #[instrument(level = "debug", skip(self))]
    pub async fn open_range(&self, url: &str, offset: u64) -> Result<RangeResponse, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self.transfer.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(DownloadError::range_rejected(url, offset));
        }
        let response = check_status(url, response)?;

        if response.status() == StatusCode::PARTIAL_CONTENT {
            let content_range = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range);
            let Some((start, total)) = content_range else {
                return Err(DownloadError::range_rejected(url, offset));
            };
            if start != offset {
                debug!(start, offset, "server returned a misaligned range");
                return Err(DownloadError::range_rejected(url, offset));
            }
            return Ok(RangeResponse {
                response,
                start,
                total,
            });
        }

        if offset > 0 {
            debug!(offset, "server ignored range request; restarting from zero");
        }
        let total = content_length(&response);
        Ok(RangeResponse {
            response,
            start: 0,
            total,
        })
    }
}

fn check_status(url: &str, response: Response) -> Result<Response, DownloadError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Err(DownloadError::http_status_with_retry_after(
        url,
        response.status().as_u16(),
        retry_after,
    ))
}

fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parses `bytes <start>-<end>/<total|*>` into `(start, total)`.
///
/// ```
/// use myrient_core::download::parse_content_range;
///
/// assert_eq!(parse_content_range("bytes 100-199/200"), Some((100, Some(200))));
/// assert_eq!(parse_content_range("bytes 0-9/*"), Some((0, None)));
/// assert_eq!(parse_content_range("items 0-9/10"), None);
/// ```
#[must_use]
pub fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        raw => {
            let total: u64 = raw.parse().ok()?;
            if total <= end {
                return None;
            }
            Some(total)
        }
    };
    Some((start, total))
}
