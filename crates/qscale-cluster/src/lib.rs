//! qscale-cluster — the boundary to the cluster orchestrator.
//!
//! The decision engine only needs two operations per namespaced service:
//! read the current replica count and set a new one. Both are treated as
//! slow network calls and are never awaited on the ingestion path.
//!
//! # Implementations
//!
//! - **`KubeScaler`**: Kubernetes deployment `scale` subresource over
//!   plain HTTP/1.1 (`kubectl proxy` or an in-cluster sidecar)
//! - **`DryRunScaler`**: in-memory replica counts, for `--dry-run` and tests
//!
//! The `client` module is the small hyper client both the adapter and the
//! notification relay use.

pub mod client;
pub mod dry_run;
pub mod error;
pub mod kube;

use std::future::Future;
use std::pin::Pin;

pub use dry_run::{DryRunScaler, ScaleChange};
pub use error::{ClusterError, ClusterResult};
pub use kube::KubeScaler;

/// Boxed future returned by adapter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Replica count operations the autoscaler consumes.
pub trait ReplicaScaler: Send + Sync {
    /// Current desired replica count of `namespace/service`.
    fn replica_count<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, ClusterResult<u32>>;

    /// Set the desired replica count of `namespace/service`.
    fn set_replica_count<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
        count: u32,
    ) -> BoxFuture<'a, ClusterResult<()>>;
}
