//! Rate samples handed from the metrics side to the decision engine.

use std::time::Duration;

use qscale_core::ServiceKey;

/// Traffic observed for one service over one averaging period.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSample {
    pub service_key: ServiceKey,
    /// Events counted over the window, in-progress second included.
    pub total: u64,
    /// Distinct backends seen within the window.
    pub active_backends: usize,
    /// Length of the averaging window.
    pub period: Duration,
}

impl RateSample {
    /// Average per-backend QPS; zero when no backend is active.
    pub fn avg_qps(&self) -> f64 {
        let secs = self.period.as_secs_f64();
        if self.active_backends == 0 || secs == 0.0 {
            return 0.0;
        }
        self.total as f64 / self.active_backends as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(total: u64, active: usize, secs: u64) -> RateSample {
        RateSample {
            service_key: ServiceKey::new("web", "ns"),
            total,
            active_backends: active,
            period: Duration::from_secs(secs),
        }
    }

    #[test]
    fn per_backend_average() {
        // 500 events over 5s across 2 backends → 50 qps per backend.
        assert_eq!(sample(500, 2, 5).avg_qps(), 50.0);
    }

    #[test]
    fn no_backends_is_zero() {
        assert_eq!(sample(500, 0, 5).avg_qps(), 0.0);
    }
}
