use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("udp socket for {target}: {source}")]
    Socket {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("send to {target}: {source}")]
    Send {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("short write to {target}: {sent} of {len} bytes")]
    ShortWrite { target: String, sent: usize, len: usize },

    #[error(transparent)]
    Http(#[from] qscale_cluster::ClusterError),

    #[error("webhook {url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
