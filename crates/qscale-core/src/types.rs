//! Event model shared across qscale crates.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identity of a logical backend group: a service inside a namespace.
///
/// The canonical string form is `"<service>.<namespace>"`, which is also
/// how the ingress log composes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub service: String,
    pub namespace: String,
}

impl ServiceKey {
    /// Key for `service` in `namespace`.
    pub fn new(service: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            namespace: namespace.into(),
        }
    }

    /// Parse the canonical `"<service>.<namespace>"` form.
    ///
    /// Kubernetes names cannot contain dots, so the first dot separates the
    /// two halves. Returns `None` if either half is empty.
    pub fn parse(s: &str) -> Option<Self> {
        let (service, namespace) = s.split_once('.')?;
        if service.is_empty() || namespace.is_empty() {
            return None;
        }
        Some(Self::new(service, namespace))
    }

    /// True for the key produced when a log line carries neither a service
    /// nor a namespace (renders as `"."`).
    pub fn is_placeholder(&self) -> bool {
        self.service.is_empty() && self.namespace.is_empty()
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.namespace)
    }
}

/// One normalized reverse-proxy access, produced only by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessEvent {
    /// When the proxy handled the request.
    pub access_time: SystemTime,
    /// Backend address the request was routed to.
    pub upstream: String,
    pub service_key: ServiceKey,
    /// HTTP status returned to the client.
    pub status: u16,
}
