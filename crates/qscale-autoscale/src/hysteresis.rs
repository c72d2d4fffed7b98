//! Per-service hysteresis: streak rings plus cooldown bookkeeping.
//!
//! The danger ring records `qps < max_qps`, the wasteful ring records
//! `qps < safe_qps / 2`. Neither ring says anything until it is full, and
//! both are cleared after a successful scale so the next decision needs a
//! fresh, complete streak.

use std::time::{Duration, SystemTime};

use qscale_core::BoolRing;

/// What a full streak says about a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// Every sample in the streak was at or above `max_qps`.
    Danger,
    /// Every sample in the streak was below half of `safe_qps`.
    Wasteful,
    /// The streak is mixed or not yet full.
    Steady,
}

/// Decision lifecycle of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A scale request has been dispatched and its outcome is outstanding.
    Pending,
    /// A scale succeeded; no new request until `until`.
    Cooling { until: SystemTime },
}

#[derive(Debug, Clone)]
pub struct HysteresisState {
    below_max: BoolRing,
    below_half_safe: BoolRing,
    next_eligible: Option<SystemTime>,
    pending: bool,
}

impl HysteresisState {
    /// Idle state with empty rings of `streak_len` samples.
    pub fn new(streak_len: usize) -> Self {
        Self {
            below_max: BoolRing::new(streak_len),
            below_half_safe: BoolRing::new(streak_len),
            next_eligible: None,
            pending: false,
        }
    }

    /// Push one sample into both rings and classify the streak.
    pub fn observe(&mut self, qps: f64, max_qps: f64, safe_qps: f64) -> Pressure {
        let danger = self.below_max.push_and_check_all_false(qps < max_qps);
        let wasteful = self.below_half_safe.push_and_check_all_true(qps < safe_qps / 2.0);
        if danger {
            Pressure::Danger
        } else if wasteful {
            Pressure::Wasteful
        } else {
            Pressure::Steady
        }
    }

    /// Lifecycle phase as of `now`.
    pub fn phase(&self, now: SystemTime) -> Phase {
        if self.pending {
            return Phase::Pending;
        }
        match self.next_eligible {
            Some(until) if now < until => Phase::Cooling { until },
            _ => Phase::Idle,
        }
    }

    /// No request in flight and the cooldown (if any) has elapsed.
    pub fn is_eligible(&self, now: SystemTime) -> bool {
        self.phase(now) == Phase::Idle
    }

    /// Mark a request as dispatched.
    pub fn begin(&mut self) {
        self.pending = true;
    }

    /// The replica count was changed at `now`.
    pub fn succeeded(&mut self, now: SystemTime, cooldown: Duration) {
        self.pending = false;
        self.next_eligible = Some(now + cooldown);
        self.below_max.clear();
        self.below_half_safe.clear();
    }

    /// The request was a no-op or failed; streaks and cooldown are kept.
    pub fn abandoned(&mut self) {
        self.pending = false;
    }

    /// End of the current cooldown, if one was ever started.
    pub fn next_eligible(&self) -> Option<SystemTime> {
        self.next_eligible
    }

    /// Samples a streak must hold before it is trusted.
    pub fn streak_len(&self) -> usize {
        self.below_max.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn danger_needs_a_full_streak() {
        let mut h = HysteresisState::new(3);
        assert_eq!(h.observe(120.0, 100.0, 40.0), Pressure::Steady);
        assert_eq!(h.observe(120.0, 100.0, 40.0), Pressure::Steady);
        assert_eq!(h.observe(120.0, 100.0, 40.0), Pressure::Danger);
    }

    #[test]
    fn one_quiet_sample_breaks_the_streak() {
        let mut h = HysteresisState::new(3);
        h.observe(100.0, 100.0, 40.0);
        h.observe(99.0, 100.0, 40.0);
        assert_eq!(h.observe(100.0, 100.0, 40.0), Pressure::Steady);
        // The quiet sample is still in the ring.
        assert_eq!(h.observe(100.0, 100.0, 40.0), Pressure::Steady);
        assert_eq!(h.observe(100.0, 100.0, 40.0), Pressure::Danger);
    }

    #[test]
    fn wasteful_is_below_half_safe() {
        let mut h = HysteresisState::new(2);
        h.observe(19.0, 100.0, 40.0);
        assert_eq!(h.observe(19.0, 100.0, 40.0), Pressure::Wasteful);

        let mut h = HysteresisState::new(2);
        h.observe(20.0, 100.0, 40.0);
        assert_eq!(h.observe(20.0, 100.0, 40.0), Pressure::Steady);
    }

    #[test]
    fn lifecycle_idle_pending_cooling_idle() {
        let mut h = HysteresisState::new(1);
        assert_eq!(h.phase(at(0)), Phase::Idle);

        h.begin();
        assert_eq!(h.phase(at(1)), Phase::Pending);
        assert!(!h.is_eligible(at(1)));

        h.succeeded(at(10), Duration::from_secs(300));
        assert_eq!(h.phase(at(11)), Phase::Cooling { until: at(310) });
        assert!(!h.is_eligible(at(309)));
        assert!(h.is_eligible(at(310)));
    }

    #[test]
    fn success_clears_streaks() {
        let mut h = HysteresisState::new(2);
        h.observe(500.0, 100.0, 40.0);
        assert_eq!(h.observe(500.0, 100.0, 40.0), Pressure::Danger);

        h.begin();
        h.succeeded(at(0), Duration::from_secs(60));
        assert_eq!(h.observe(500.0, 100.0, 40.0), Pressure::Steady);
    }

    #[test]
    fn abandoned_keeps_streaks_and_cooldown() {
        let mut h = HysteresisState::new(2);
        h.observe(500.0, 100.0, 40.0);
        h.observe(500.0, 100.0, 40.0);
        h.begin();
        h.abandoned();

        assert_eq!(h.next_eligible(), None);
        assert_eq!(h.observe(500.0, 100.0, 40.0), Pressure::Danger);
    }
}
