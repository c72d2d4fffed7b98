//! Cluster adapter error types.

use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors talking to the orchestrator. None of them are fatal to the
/// decision engine; the affected cycle is abandoned.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] ::http::Error),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("unexpected status {status} from {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unknown workload: {0}")]
    NotFound(String),
}
