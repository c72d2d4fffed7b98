//! Kubernetes deployment scaling through the `scale` subresource.

use std::time::Duration;

use ::http::Method;
use qscale_core::ClusterConfig;
use serde::Deserialize;
use tracing::info;

use crate::client::{Call, Response};
use crate::error::{ClusterError, ClusterResult};
use crate::{BoxFuture, ReplicaScaler};

const MERGE_PATCH: &str = "application/merge-patch+json";

#[derive(Debug, Deserialize)]
struct Scale {
    #[serde(default)]
    spec: ScaleSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ScaleSpec {
    #[serde(default)]
    replicas: u32,
}

/// Reads and writes `spec.replicas` of a Deployment.
#[derive(Debug, Clone)]
pub struct KubeScaler {
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl KubeScaler {
    /// Scaler talking to the API at `endpoint` (`host:port`).
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            timeout,
        }
    }

    /// Scaler built from the `[cluster]` section.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.token.clone(),
            Duration::from_secs(config.timeout),
        )
    }

    /// API endpoint this scaler talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn scale_path(namespace: &str, service: &str) -> String {
        format!("/apis/apps/v1/namespaces/{namespace}/deployments/{service}/scale")
    }

    fn call<'a>(&'a self, method: Method, path: &'a str) -> Call<'a> {
        Call::new(&self.endpoint, method, path, self.timeout).bearer(self.token.as_deref())
    }

    async fn get_replicas(&self, namespace: &str, service: &str) -> ClusterResult<u32> {
        let path = Self::scale_path(namespace, service);
        let resp = self.call(Method::GET, &path).send().await?;
        if resp.status == ::http::StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(format!("{namespace}/{service}")));
        }
        check_status(&resp, &path)?;
        let scale: Scale = serde_json::from_slice(&resp.body)?;
        Ok(scale.spec.replicas)
    }

    async fn patch_replicas(&self, namespace: &str, service: &str, count: u32) -> ClusterResult<()> {
        let path = Self::scale_path(namespace, service);
        let body = serde_json::to_vec(&serde_json::json!({ "spec": { "replicas": count } }))?;
        let resp = self
            .call(Method::PATCH, &path)
            .json(MERGE_PATCH, body)
            .send()
            .await?;
        if resp.status == ::http::StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(format!("{namespace}/{service}")));
        }
        check_status(&resp, &path)?;
        info!(namespace, service, replicas = count, "deployment scaled");
        Ok(())
    }
}

fn check_status(resp: &Response, path: &str) -> ClusterResult<()> {
    if resp.status.is_success() {
        return Ok(());
    }
    Err(ClusterError::Status {
        status: resp.status.as_u16(),
        path: path.to_string(),
        body: resp.body_text(),
    })
}

impl ReplicaScaler for KubeScaler {
    fn replica_count<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, ClusterResult<u32>> {
        Box::pin(self.get_replicas(namespace, service))
    }

    fn set_replica_count<'a>(
        &'a self,
        namespace: &'a str,
        service: &'a str,
        count: u32,
    ) -> BoxFuture<'a, ClusterResult<()>> {
        Box::pin(self.patch_replicas(namespace, service, count))
    }
}
