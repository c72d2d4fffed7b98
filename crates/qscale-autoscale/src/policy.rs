//! Replica count policy.

/// Replicas needed to keep every backend below `max_qps`, clamped to
/// `[min_pod, max_pod]`. Zero traffic yields `min_pod`.
pub fn target_replicas(qps: f64, max_qps: f64, min_pod: u32, max_pod: u32) -> u32 {
    let raw = if qps.is_finite() && qps > 0.0 && max_qps > 0.0 {
        // Float-to-int casts saturate.
        (qps / max_qps).ceil() as u32
    } else {
        0
    };
    raw.clamp(min_pod, max_pod.max(min_pod))
}
