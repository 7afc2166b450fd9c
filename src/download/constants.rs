//! Constants for the download module.

use std::time::Duration;

/// Warning threshold for cumulative token wait per host (30 seconds).
pub const CUMULATIVE_WAIT_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum honored Retry-After value (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Maximum jitter added to backoff delays.
pub const MAX_JITTER: Duration = Duration::from_millis(500);

/// Suffix for in-flight partial files.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Write buffer for partial files.
pub const WRITE_BUFFER_BYTES: usize = 256 * 1024;

/// Capacity of the download manager's work channel.
pub const QUEUE_CHANNEL_CAPACITY: usize = 1024;
