//! qscale-core — shared types for the qscale autoscaler.
//!
//! Holds the normalized access event, the service key, the daemon
//! configuration (TOML file plus environment overrides), and the two small
//! time/streak primitives the metrics and decision crates build on.

pub mod config;
pub mod error;
pub mod expiring;
pub mod ring;
pub mod types;

pub use config::{
    ClusterConfig, Config, Defaults, ForwardConfig, IngressConfig, IngressKind, ListenConfig,
    NotifyConfig, ServiceScaleConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use expiring::ExpiringSet;
pub use ring::BoolRing;
pub use types::*;
