//! Sliding-window counter for a single service.
//!
//! Holds one bucket per completed second (at most `avg_time` of them),
//! the in-progress second's counter, and the set of backends seen inside
//! the window. Each bucket carries its own expiry; a bucket whose expiry
//! has passed contributes zero even if it has not been evicted yet, so a
//! late read never double counts stale seconds.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use qscale_core::ExpiringSet;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    expires_at: SystemTime,
}

#[derive(Debug)]
pub struct QpsWindow {
    window: Duration,
    capacity: usize,
    buckets: VecDeque<Bucket>,
    /// Events in the second that has not been rolled yet.
    current: u64,
    backends: ExpiringSet<String>,
}

impl QpsWindow {
    /// Empty window averaging over `window` (one bucket per second).
    pub fn new(window: Duration) -> Self {
        let capacity = window.as_secs().max(1) as usize;
        Self {
            window,
            capacity,
            buckets: VecDeque::with_capacity(capacity),
            current: 0,
            backends: ExpiringSet::new(window),
        }
    }

    /// Averaging window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one event routed to `upstream` at `event_time`.
    ///
    /// Events older than the window are ignored and `false` is returned.
    /// A future timestamp counts as seen `now`, so clock skew cannot keep a
    /// backend alive past the window.
    pub fn record(&mut self, upstream: &str, event_time: SystemTime, now: SystemTime) -> bool {
        if event_time + self.window <= now {
            return false;
        }
        self.backends.touch(upstream.to_string(), event_time.min(now));
        self.current += 1;
        true
    }

    /// Close the in-progress second: push its count into the ring with an
    /// expiry of `now + window` and start a fresh counter.
    pub fn roll(&mut self, now: SystemTime) {
        if self.buckets.len() == self.capacity {
            self.buckets.pop_front();
        }
        self.buckets.push_back(Bucket {
            count: self.current,
            expires_at: now + self.window,
        });
        self.current = 0;
    }

    /// Events in unexpired buckets plus the in-progress second.
    pub fn total(&self, now: SystemTime) -> u64 {
        self.buckets
            .iter()
            .filter(|b| b.expires_at > now)
            .map(|b| b.count)
            .sum::<u64>()
            + self.current
    }

    /// Distinct backends seen within the window as of `now`.
    pub fn active_backends(&self, now: SystemTime) -> usize {
        self.backends.live_count(now)
    }

    /// Events counted in the second that has not been rolled yet.
    pub fn in_progress(&self) -> u64 {
        self.current
    }

    /// Purge stale backends, then report `(total, active_backends)`.
    pub fn sample(&mut self, now: SystemTime) -> (u64, usize) {
        self.backends.sweep(now);
        (self.total(now), self.backends.len())
    }

    /// Physically drop expired buckets and stale backends.
    pub fn sweep(&mut self, now: SystemTime) {
        self.buckets.retain(|b| b.expires_at > now);
        self.backends.sweep(now);
    }
}
