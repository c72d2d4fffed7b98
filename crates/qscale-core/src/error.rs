//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the daemon configuration.
///
/// Every variant is fatal at startup: the daemon must not run with an
/// inconsistent scaling policy.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no services configured for autoscaling")]
    NoServices,

    #[error("duplicate service entry: {0}")]
    DuplicateService(String),

    #[error("service {service}: {reason}")]
    InvalidService { service: String, reason: String },

    #[error("invalid defaults: {0}")]
    InvalidDefaults(String),

    #[error("invalid QSCALE_SERVICES entry {entry:?}: {reason}")]
    InvalidServiceEnv { entry: String, reason: String },
}
