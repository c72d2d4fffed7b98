//! qscale-autoscale — turns per-service rate samples into replica targets.
//!
//! Each `RateSample` is converted to a per-backend QPS (times the service's
//! load factor) and pushed into two streak rings. A service is scaled only
//! when a full decision window agrees and its cooldown has passed:
//!
//! ```text
//!  RateSample ──► HysteresisState ──► Pressure::{Danger,Wasteful}
//!                                          │ eligible?
//!                                          ▼
//!                               target_replicas(qps) ──► ReplicaScaler
//!                                          ▲                  │
//!                                          └── ScaleOutcome ◄─┘
//! ```

pub mod hysteresis;
pub mod policy;
pub mod scaler;

pub use hysteresis::{HysteresisState, Phase, Pressure};
pub use policy::target_replicas;
pub use scaler::{Autoscaler, NotifyHook, ScaleNotice, ScaleOutcome, ScaleRequest};
