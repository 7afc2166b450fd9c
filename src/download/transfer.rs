//! One entry's transfer: resume, stream, retry, complete.
//!
//! A transfer is owned by exactly one task for its whole lifetime, so all of
//! an entry's catalog updates come from one place in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::constants::WRITE_BUFFER_BYTES;
use super::error::DownloadError;
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::resume::{final_path, on_disk_len, partial_path, reconcile_offset, truncate};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::speed::{SpeedMonitor, ThrottleChange};
use super::tracker::DownloadTracker;
use crate::catalog::{Entry, TransferStatus, TransferStore};
use crate::config::Config;
use crate::verify::{self, VerifyReport};

/// Per-transfer behavior taken from configuration.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub download_root: PathBuf,
    pub resume: bool,
    pub verify_on_completion: bool,
    pub progress_flush: Duration,
    pub speed_window: Duration,
    pub low_speed_threshold_bps: u64,
    pub throttle_grace: Duration,
}

impl TransferSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_root: config.download_root.clone(),
            resume: config.resume,
            verify_on_completion: config.verify_on_completion,
            progress_flush: config.progress_flush_interval(),
            speed_window: config.speed_window(),
            low_speed_threshold_bps: config.low_speed_threshold_bps,
            throttle_grace: config.throttle_grace(),
        }
    }
}

/// A finished transfer.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub path: PathBuf,
    pub bytes: u64,
    /// Absent when the finished file could not be read back for hashing.
    pub sha256: Option<String>,
    /// Set when the file needs external conversion before use.
    pub conversion_advisory: Option<String>,
    /// Present when verification ran on completion.
    pub verification: Option<VerifyReport>,
}

/// How a transfer ended.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed(CompletedTransfer),
    /// Stopped by cancellation; progress is persisted and resumable.
    Paused { bytes: u64 },
    /// Gave up; the entry is `failed` with this error.
    Failed { error: String, bytes: u64 },
}

/// Everything a transfer task needs, shared by all tasks of one manager.
#[derive(Clone)]
pub(crate) struct TransferContext {
    pub store: Arc<dyn TransferStore>,
    pub client: HttpClient,
    pub rate_limiter: Arc<RateLimiter>,
    pub retry_policy: RetryPolicy,
    pub settings: Arc<TransferSettings>,
    pub cancel: CancellationToken,
    pub tracker: Arc<DownloadTracker>,
}

/// How one request attempt ended.
enum StreamEnd {
    /// Body fully received; `bytes` is the final length.
    Complete { bytes: u64 },
    Cancelled { bytes: u64 },
}

/// Mutable state carried across attempts.
struct Session {
    address: String,
    partial: PathBuf,
    /// Bytes on disk and persisted.
    offset: u64,
    /// Byte-exact remote total once known.
    remote_total: Option<u64>,
    /// Progress at the start of this run, for the average speed.
    start_offset: u64,
    started: Instant,
}

/// Runs one entry to completion, pause or failure.
///
/// The entry must already be `downloading`.
#[instrument(skip_all, fields(address = %entry.address))]
pub(crate) async fn run_transfer(ctx: &TransferContext, entry: &Entry) -> TransferOutcome {
    let final_path = final_path(&ctx.settings.download_root, entry);
    let partial = partial_path(&final_path);

    let offset = match prepare(ctx, entry, &final_path, &partial).await {
        Ok(offset) => offset,
        Err(e) => return fail(ctx, &entry.address, &partial, entry.bytes(), &e).await,
    };

    let mut session = Session {
        address: entry.address.clone(),
        partial,
        offset,
        remote_total: entry.size_exact.then(|| entry.size_bytes()).flatten(),
        start_offset: offset,
        started: Instant::now(),
    };
    let prior_attempts = u32::try_from(entry.attempts).unwrap_or(0);
    // `requests` is persisted; `attempt` is the retry budget, which restarts
    // whenever a request moved the transfer forward.
    let mut requests = 0u32;
    let mut attempt = 0u32;

    loop {
        requests += 1;
        attempt += 1;
        if let Err(e) = ctx
            .store
            .record_attempt(&session.address, prior_attempts + requests, None)
            .await
        {
            let error = DownloadError::from(e);
            return fail(ctx, &session.address, &session.partial, session.offset, &error).await;
        }

        if ctx.cancel.is_cancelled() {
            return pause(ctx, &session).await;
        }
        tokio::select! {
            _ = ctx.rate_limiter.acquire(&session.address) => {}
            () = ctx.cancel.cancelled() => return pause(ctx, &session).await,
        }

        let offset_before = session.offset;
        let error = match stream_once(ctx, &mut session).await {
            Ok(StreamEnd::Complete { bytes }) => {
                return match finish(ctx, entry, &session, &final_path, bytes).await {
                    Ok(done) => TransferOutcome::Completed(done),
                    Err(e) => {
                        // After the rename the data lives at the final path.
                        let landed = on_disk_len(&session.partial).await.is_ok_and(|n| n == 0)
                            && on_disk_len(&final_path).await.is_ok_and(|n| n > 0);
                        let measured = if landed { &final_path } else { &session.partial };
                        fail(ctx, &session.address, measured, bytes, &e).await
                    }
                };
            }
            Ok(StreamEnd::Cancelled { bytes }) => {
                session.offset = bytes;
                return pause(ctx, &session).await;
            }
            Err(error) => error,
        };

        let failure_type = classify_error(&error);
        if failure_type != FailureType::RemoteProtocol && session.offset > offset_before {
            debug!(
                from = offset_before,
                to = session.offset,
                "attempt made progress; retry budget restarts"
            );
            attempt = 1;
        }
        if failure_type == FailureType::RemoteProtocol
            && let Err(e) = restart_from_zero(ctx, &mut session).await
        {
            return fail(ctx, &session.address, &session.partial, session.offset, &e).await;
        }
        let retry_after = penalize_host(ctx, &session.address, &error).await;
        if let Err(e) = ctx
            .store
            .record_attempt(
                &session.address,
                prior_attempts + requests,
                Some(&error.to_string()),
            )
            .await
        {
            let error = DownloadError::from(e);
            return fail(ctx, &session.address, &session.partial, session.offset, &error).await;
        }

        match ctx.retry_policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry { delay, attempt: next } => {
                let delay = retry_after.map_or(delay, |server| server.max(delay));
                info!(
                    attempt = next,
                    max_attempts = ctx.retry_policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    bytes = session.offset,
                    error = %error,
                    "retrying transfer"
                );
                ctx.tracker.increment_retried();
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = ctx.cancel.cancelled() => return pause(ctx, &session).await,
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "not retrying transfer");
                return fail(ctx, &session.address, &session.partial, session.offset, &error).await;
            }
        }
    }
}

/// Creates the target directory, records the local path and reconciles the offset.
async fn prepare(
    ctx: &TransferContext,
    entry: &Entry,
    final_path: &Path,
    partial: &Path,
) -> Result<u64, DownloadError> {
    if let Some(dir) = final_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DownloadError::io(dir, e))?;
    }
    ctx.store
        .set_local_path(&entry.address, &final_path.to_string_lossy())
        .await?;

    let offset = reconcile_offset(partial, entry.bytes(), ctx.settings.resume)
        .await
        .map_err(|e| DownloadError::io(partial, e))?;
    if offset != entry.bytes() {
        ctx.store
            .update_transfer_state(&entry.address, TransferStatus::Downloading, offset)
            .await?;
    }
    debug!(offset, partial = %partial.display(), "transfer prepared");
    Ok(offset)
}

/// One request: open the range, validate the total, stream the body.
///
/// On error the partial file has been flushed and `session.offset` holds the
/// last length the catalog accepted.
async fn stream_once(
    ctx: &TransferContext,
    session: &mut Session,
) -> Result<StreamEnd, DownloadError> {
    let address = session.address.clone();
    let range = tokio::select! {
        range = ctx.client.open_range(&address, session.offset) => range?,
        () = ctx.cancel.cancelled() => {
            return Ok(StreamEnd::Cancelled { bytes: session.offset });
        }
    };

    if let Some(total) = range.total
        && let Some(expected) = session.remote_total
        && expected != total
    {
        return Err(DownloadError::length_mismatch(&address, expected, total));
    }
    if range.start != session.offset {
        // Server ignored the range; the body starts at zero.
        warn!(offset = session.offset, "range not honored; restarting from zero");
        restart_from_zero(ctx, session).await?;
    } else if range.resumed() {
        debug!(offset = range.start, "resuming from partial data");
    }
    if let Some(total) = range.total
        && total < session.offset
    {
        return Err(DownloadError::length_mismatch(&address, session.offset, total));
    }
    if let Some(total) = range.total
        && session.remote_total != Some(total)
    {
        ctx.store.record_size(&address, total).await?;
        session.remote_total = Some(total);
    }

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&session.partial)
        .await
        .map_err(|e| DownloadError::io(&session.partial, e))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
    writer
        .seek(std::io::SeekFrom::Start(session.offset))
        .await
        .map_err(|e| DownloadError::io(&session.partial, e))?;

    let mut written = session.offset;
    let mut monitor = SpeedMonitor::new(
        ctx.settings.speed_window,
        ctx.settings.low_speed_threshold_bps,
        ctx.settings.throttle_grace,
        Instant::now(),
    );
    let flush_every = ctx.settings.progress_flush;
    let mut flush_tick = tokio::time::interval_at(Instant::now() + flush_every, flush_every);
    let mut body = range.response.bytes_stream();

    let end = loop {
        tokio::select! {
            biased;
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    if let Some(total) = session.remote_total
                        && written + bytes.len() as u64 > total
                    {
                        checkpoint(ctx, session, &mut writer, written).await?;
                        return Err(DownloadError::length_mismatch(
                            &address,
                            total,
                            written + bytes.len() as u64,
                        ));
                    }
                    if let Err(e) = writer.write_all(&bytes).await {
                        let on_disk = on_disk_len(&session.partial).await.unwrap_or(session.offset);
                        session.offset = on_disk.min(written);
                        return Err(DownloadError::io(&session.partial, e));
                    }
                    written += bytes.len() as u64;
                    let change = monitor.record_at(bytes.len() as u64, Instant::now());
                    report_throttle(ctx, &address, change).await?;
                    if ctx.cancel.is_cancelled() {
                        checkpoint(ctx, session, &mut writer, written).await?;
                        break StreamEnd::Cancelled { bytes: written };
                    }
                }
                Some(Err(e)) => {
                    checkpoint(ctx, session, &mut writer, written).await?;
                    return Err(DownloadError::from_reqwest(&address, e));
                }
                None => break StreamEnd::Complete { bytes: written },
            },
            _ = flush_tick.tick() => {
                checkpoint(ctx, session, &mut writer, written).await?;
                let change = monitor.record_at(0, Instant::now());
                report_throttle(ctx, &address, change).await?;
            }
            () = ctx.cancel.cancelled() => {
                checkpoint(ctx, session, &mut writer, written).await?;
                break StreamEnd::Cancelled { bytes: written };
            }
        }
    };

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(&session.partial, e))?;
    if monitor.is_throttled() {
        ctx.store.set_throttled(&address, false).await?;
        ctx.tracker.clear_throttled(&address);
    }

    if let StreamEnd::Complete { bytes } = end
        && let Some(total) = session.remote_total
        && bytes < total
    {
        ctx.store
            .update_transfer_state(&address, TransferStatus::Downloading, bytes)
            .await?;
        session.offset = bytes;
        return Err(DownloadError::truncated(&address, total, bytes));
    }
    session.offset = written;
    Ok(end)
}

/// Flushes buffered bytes and persists the progress they represent.
async fn checkpoint(
    ctx: &TransferContext,
    session: &mut Session,
    writer: &mut BufWriter<tokio::fs::File>,
    written: u64,
) -> Result<(), DownloadError> {
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(&session.partial, e))?;
    ctx.store
        .update_transfer_state(&session.address, TransferStatus::Downloading, written)
        .await?;
    session.offset = written;
    Ok(())
}

async fn report_throttle(
    ctx: &TransferContext,
    address: &str,
    change: Option<ThrottleChange>,
) -> Result<(), DownloadError> {
    match change {
        Some(ThrottleChange::Throttled { bytes_per_sec }) => {
            warn!(
                address,
                bytes_per_sec = bytes_per_sec.round(),
                threshold_bps = ctx.settings.low_speed_threshold_bps,
                "transfer appears throttled; continuing"
            );
            ctx.store.set_throttled(address, true).await?;
            ctx.tracker.mark_throttled(address);
        }
        Some(ThrottleChange::Recovered { bytes_per_sec }) => {
            info!(address, bytes_per_sec = bytes_per_sec.round(), "throughput recovered");
            ctx.store.set_throttled(address, false).await?;
            ctx.tracker.clear_throttled(address);
        }
        None => {}
    }
    Ok(())
}

/// Discards partial data after a range or length disagreement.
async fn restart_from_zero(
    ctx: &TransferContext,
    session: &mut Session,
) -> Result<(), DownloadError> {
    truncate(&session.partial, 0)
        .await
        .map_err(|e| DownloadError::io(&session.partial, e))?;
    session.offset = 0;
    session.start_offset = 0;
    session.remote_total = None;
    ctx.store
        .update_transfer_state(&session.address, TransferStatus::Downloading, 0)
        .await?;
    debug!("partial data discarded");
    Ok(())
}

/// Applies a server's Retry-After to the whole host. Returns the delay when present.
async fn penalize_host(
    ctx: &TransferContext,
    address: &str,
    error: &DownloadError,
) -> Option<Duration> {
    let DownloadError::HttpStatus {
        retry_after: Some(raw),
        ..
    } = error
    else {
        return None;
    };
    let delay = parse_retry_after(raw)?;
    ctx.rate_limiter.penalize(address, delay).await;
    Some(delay)
}

async fn finish(
    ctx: &TransferContext,
    entry: &Entry,
    session: &Session,
    final_path: &Path,
    bytes: u64,
) -> Result<CompletedTransfer, DownloadError> {
    let address = &session.address;
    if session.remote_total.is_none() {
        // Length-unknown stream closed cleanly; what arrived is the file.
        ctx.store.record_size(address, bytes).await?;
    }

    tokio::fs::rename(&session.partial, final_path)
        .await
        .map_err(|e| DownloadError::io(final_path, e))?;
    ctx.store
        .update_transfer_state(address, TransferStatus::Completed, bytes)
        .await?;

    // The entry is completed from here on; later bookkeeping only warns.
    let elapsed = session.started.elapsed().as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let average_speed = (elapsed > 0.0)
        .then(|| bytes.saturating_sub(session.start_offset) as f64 / elapsed);
    let sha256 = match sha256_file(final_path).await {
        Ok(digest) => Some(digest),
        Err(e) => {
            warn!(error = %e, "could not hash finished file");
            None
        }
    };
    if let Some(digest) = &sha256
        && let Err(e) = ctx
            .store
            .record_completion(address, digest, average_speed)
            .await
    {
        warn!(error = %e, "could not record completion details");
    }

    let conversion_advisory = entry.requires_conversion.then(|| {
        format!(
            "{} is a .{} image and must be converted with an external tool before use",
            entry.name, entry.format
        )
    });
    if let Some(advisory) = &conversion_advisory {
        warn!(%advisory, "conversion required");
    }

    let verification = if ctx.settings.verify_on_completion
        && verify::is_verifiable_format(&entry.format)
    {
        match verify::verify_file(final_path).await {
            Ok(report) => {
                if let Err(e) = verify::apply_report(ctx.store.as_ref(), address, &report).await {
                    warn!(error = %e, "could not record verification");
                }
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "verification could not run");
                None
            }
        }
    } else {
        None
    };

    info!(
        path = %final_path.display(),
        bytes,
        average_speed_bps = average_speed.map(f64::round),
        "transfer complete"
    );
    Ok(CompletedTransfer {
        path: final_path.to_path_buf(),
        bytes,
        sha256,
        conversion_advisory,
        verification,
    })
}

async fn sha256_file(path: &Path) -> Result<String, DownloadError> {
    let owned = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&owned)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| DownloadError::io(path, std::io::Error::other(e)))?;
    digest.map_err(|e| DownloadError::io(path, e))
}

async fn pause(ctx: &TransferContext, session: &Session) -> TransferOutcome {
    match ctx
        .store
        .update_transfer_state(&session.address, TransferStatus::Paused, session.offset)
        .await
    {
        Ok(()) => {
            info!(bytes = session.offset, "transfer paused");
            TransferOutcome::Paused {
                bytes: session.offset,
            }
        }
        Err(e) => {
            warn!(error = %e, "could not persist pause");
            TransferOutcome::Failed {
                error: e.to_string(),
                bytes: session.offset,
            }
        }
    }
}

/// Marks the entry failed with the concrete cause, persisting the bytes actually on disk.
///
/// If the catalog rejects that byte count the entry still fails, keeping its
/// last persisted progress.
async fn fail(
    ctx: &TransferContext,
    address: &str,
    data: &Path,
    bytes: u64,
    error: &DownloadError,
) -> TransferOutcome {
    let on_disk = on_disk_len(data).await.unwrap_or(bytes);
    let bytes = on_disk.min(bytes);
    let message = error.to_string();
    warn!(error = %message, bytes, "transfer failed");
    if let Err(e) = ctx.store.mark_failed(address, bytes, &message).await {
        warn!(error = %e, bytes, "could not record failure; keeping persisted progress");
        let fallback = match ctx.store.entry(address).await {
            Ok(Some(entry)) => ctx.store.mark_failed(address, entry.bytes(), &message).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = fallback {
            warn!(error = %e, "could not record failure");
        }
    }
    TransferOutcome::Failed {
        error: message,
        bytes,
    }
}
