//! Expiring set keyed by last-seen time.
//!
//! Tracks when each key was last observed. A key is live while
//! `last_seen + ttl > now`. Reads can count live keys without mutating;
//! `sweep()` physically drops the stale ones and is meant to run
//! periodically so the map does not grow with long-dead keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct ExpiringSet<K> {
    ttl: Duration,
    entries: HashMap<K, SystemTime>,
}

impl<K: Eq + Hash> ExpiringSet<K> {
    /// Empty set whose keys live for `ttl` after they were last seen.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// How long a key stays live after its last sighting.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `key` was seen at `seen_at`. Never moves a key backwards
    /// in time, so out-of-order events cannot shorten its life.
    pub fn touch(&mut self, key: K, seen_at: SystemTime) {
        self.entries
            .entry(key)
            .and_modify(|t| {
                if seen_at > *t {
                    *t = seen_at;
                }
            })
            .or_insert(seen_at);
    }

    fn is_live(&self, seen_at: SystemTime, now: SystemTime) -> bool {
        seen_at + self.ttl > now
    }

    /// Number of keys still live at `now`, including ones not yet swept.
    pub fn live_count(&self, now: SystemTime) -> usize {
        self.entries
            .values()
            .filter(|&&seen| self.is_live(seen, now))
            .count()
    }

    /// True if `key` was seen within the ttl before `now`.
    pub fn contains_live(&self, key: &K, now: SystemTime) -> bool {
        self.entries
            .get(key)
            .is_some_and(|&seen| self.is_live(seen, now))
    }

    /// Drop every key that expired at or before `now`. Returns how many
    /// were removed.
    pub fn sweep(&mut self, now: SystemTime) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, seen| *seen + ttl > now);
        before - self.entries.len()
    }

    /// Physical size, stale entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
