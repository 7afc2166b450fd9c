//! Sliding-window throughput monitoring and throttle detection.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Throttle state change reported by [`SpeedMonitor::record_at`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleChange {
    /// Throughput stayed below the threshold for the whole grace period.
    Throttled { bytes_per_sec: f64 },
    /// Throughput climbed back above the threshold.
    Recovered { bytes_per_sec: f64 },
}

/// Byte samples over a sliding window for one transfer.
///
/// Until a full window has elapsed the rate is taken over the time observed so
/// far. The grace period runs from the first sample below the threshold, so a
/// transfer that is slow from the start is flagged once `grace` has passed.
#[derive(Debug)]
pub struct SpeedMonitor {
    window: Duration,
    threshold_bps: f64,
    grace: Duration,
    started: Instant,
    samples: VecDeque<(Instant, u64)>,
    below_since: Option<Instant>,
    throttled: bool,
}

impl SpeedMonitor {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(window: Duration, threshold_bps: u64, grace: Duration, started: Instant) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            threshold_bps: threshold_bps as f64,
            grace,
            started,
            samples: VecDeque::new(),
            below_since: None,
            throttled: false,
        }
    }

    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Records `bytes` received at `now`; zero-byte samples act as a clock tick.
    pub fn record_at(&mut self, bytes: u64, now: Instant) -> Option<ThrottleChange> {
        self.samples.push_back((now, bytes));
        let cutoff = now.checked_sub(self.window).unwrap_or(self.started);
        while self
            .samples
            .front()
            .is_some_and(|(at, _)| *at < cutoff)
        {
            self.samples.pop_front();
        }

        let observed = now.saturating_duration_since(self.started);
        if observed.is_zero() {
            return None;
        }

        let bytes_per_sec = self.rate_over(observed.min(self.window));
        if bytes_per_sec < self.threshold_bps {
            let since = *self.below_since.get_or_insert(now);
            if !self.throttled && now.saturating_duration_since(since) >= self.grace {
                self.throttled = true;
                return Some(ThrottleChange::Throttled { bytes_per_sec });
            }
        } else {
            self.below_since = None;
            if self.throttled {
                self.throttled = false;
                return Some(ThrottleChange::Recovered { bytes_per_sec });
            }
        }
        None
    }

    /// Mean throughput across the current window.
    #[must_use]
    pub fn current_rate(&self) -> f64 {
        self.rate_over(self.window)
    }

    #[allow(clippy::cast_precision_loss)]
    fn rate_over(&self, span: Duration) -> f64 {
        let total: u64 = self.samples.iter().map(|(_, bytes)| bytes).sum();
        total as f64 / span.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;

    fn monitor(start: Instant) -> SpeedMonitor {
        SpeedMonitor::new(
            Duration::from_secs(10),
            32 * KIB,
            Duration::from_secs(30),
            start,
        )
    }

    /// Feeds one sample per second at `rate` bytes/s for `secs` seconds.
    fn feed(
        monitor: &mut SpeedMonitor,
        start: Instant,
        from: u64,
        secs: u64,
        rate: u64,
    ) -> Vec<(u64, ThrottleChange)> {
        (from..from + secs)
            .filter_map(|s| {
                monitor
                    .record_at(rate, start + Duration::from_secs(s + 1))
                    .map(|c| (s + 1, c))
            })
            .collect()
    }

    #[test]
    fn test_sustained_low_speed_flags_throttle_after_grace() {
        let start = Instant::now();
        let mut monitor = monitor(start);

        let changes = feed(&mut monitor, start, 0, 60, 8 * KIB);

        assert_eq!(changes.len(), 1);
        let (at, change) = changes[0];
        assert!(matches!(change, ThrottleChange::Throttled { .. }));
        // low from the first sample at t=1, flagged once the grace has run
        assert_eq!(at, 31);
        assert!(monitor.is_throttled());
    }

    #[test]
    fn test_short_dip_does_not_flag() {
        let start = Instant::now();
        let mut monitor = monitor(start);

        assert!(feed(&mut monitor, start, 0, 20, 100 * KIB).is_empty());
        assert!(feed(&mut monitor, start, 20, 15, 4 * KIB).is_empty());
        assert!(feed(&mut monitor, start, 35, 20, 100 * KIB).is_empty());
        assert!(!monitor.is_throttled());
    }

    #[test]
    fn test_recovery_clears_flag() {
        let start = Instant::now();
        let mut monitor = monitor(start);

        feed(&mut monitor, start, 0, 45, 8 * KIB);
        assert!(monitor.is_throttled());

        let changes = feed(&mut monitor, start, 45, 15, 200 * KIB);
        assert!(matches!(
            changes.first(),
            Some((_, ThrottleChange::Recovered { .. }))
        ));
        assert!(!monitor.is_throttled());
    }

    #[test]
    fn test_slow_start_is_judged_over_elapsed_time() {
        let start = Instant::now();
        let mut monitor = monitor(start);

        // 64 KiB in the first 2s is 32 KiB/s, not 6.4 KiB/s over a 10s window
        assert!(monitor.record_at(64 * KIB, start + Duration::from_secs(2)).is_none());
        assert!(feed(&mut monitor, start, 2, 40, 64 * KIB).is_empty());
        assert!(!monitor.is_throttled());
    }

    #[test]
    fn test_zero_grace_flags_on_first_low_sample() {
        let start = Instant::now();
        let mut monitor = SpeedMonitor::new(Duration::from_secs(10), 32 * KIB, Duration::ZERO, start);

        let change = monitor.record_at(KIB, start + Duration::from_millis(500));

        assert!(matches!(change, Some(ThrottleChange::Throttled { .. })));
    }

    #[test]
    fn test_fast_transfer_never_flags() {
        let start = Instant::now();
        let mut monitor = monitor(start);
        assert!(feed(&mut monitor, start, 0, 120, 1024 * KIB).is_empty());
        assert!(monitor.current_rate() > 1000.0 * 1024.0);
    }
}
