//! In-memory scaler for `--dry-run` and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

use crate::error::{ClusterError, ClusterResult};
use crate::{BoxFuture, ReplicaScaler};

/// Holds replica counts in memory and records every change.
#[derive(Debug, Default)]
pub struct DryRunScaler {
    replicas: Mutex<HashMap<(String, String), u32>>,
    history: Mutex<Vec<ScaleChange>>,
    failing: Mutex<bool>,
}

/// A replica change applied through [`DryRunScaler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleChange {
    pub namespace: String,
    pub service: String,
    pub from: u32,
    pub to: u32,
}

impl DryRunScaler {
    /// Scaler with no workloads; add them with [`seed`](Self::seed).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workload with an initial replica count.
    pub fn seed(&self, namespace: &str, service: &str, count: u32) {
        lock(&self.replicas).insert((namespace.to_string(), service.to_string()), count);
    }

    /// Current in-memory count, if the workload is known.
    pub fn get(&self, namespace: &str, service: &str) -> Option<u32> {
        lock(&self.replicas)
            .get(&(namespace.to_string(), service.to_string()))
            .copied()
    }

    /// Every change applied so far, oldest first.
    pub fn history(&self) -> Vec<ScaleChange> {
        lock(&self.history).clone()
    }

    /// Make every subsequent call fail, simulating an unreachable cluster.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    fn check_failing(&self) -> ClusterResult<()> {
        if *lock(&self.failing) {
            return Err(ClusterError::Timeout("dry-run cluster".into()));
        }
        Ok(())
    }

    fn read(&self, namespace: &str, service: &str) -> ClusterResult<u32> {
        self.check_failing()?;
        self.get(namespace, service)
            .ok_or_else(|| ClusterError::NotFound(format!("{namespace}/{service}")))
    }

    fn write(&self, namespace: &str, service: &str, count: u32) -> ClusterResult<()> {
        self.check_failing()?;
        let mut replicas = lock(&self.replicas);
        let slot = replicas
            .get_mut(&(namespace.to_string(), service.to_string()))
            .ok_or_else(|| ClusterError::NotFound(format!("{namespace}/{service}")))?;
        let from = *slot;
        *slot = count;
        drop(replicas);

        info!(namespace, service, from, to = count, "dry-run: replicas set");
        lock(&self.history).push(ScaleChange {
            namespace: namespace.to_string(),
            service: service.to_string(),
            from,
            to: count,
        });
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ReplicaScaler for DryRunScaler {
    fn replica_count<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, ClusterResult<u32>> {
        Box::pin(async move { self.read(namespace, service) })
    }

    fn set_replica_count<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
        count: u32,
    ) -> BoxFuture<'a, ClusterResult<()>> {
        Box::pin(async move { self.write(namespace, service, count) })
    }
}
