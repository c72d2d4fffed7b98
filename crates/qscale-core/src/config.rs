//! qscale.toml configuration parser.
//!
//! The file is read once at startup. Selected values can be overridden by
//! `QSCALE_*` environment variables so a container image can be reused
//! without rebuilding its config. Validation runs after overrides and any
//! failure is fatal.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::types::ServiceKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub services: Vec<ServiceScaleConfig>,
    #[serde(default)]
    pub forwards: Vec<ForwardConfig>,
    #[serde(default)]
    pub notifies: Vec<NotifyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub address: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
    /// Receive buffer size. A read that fills it is treated as a fragment
    /// of a larger message.
    #[serde(default = "default_max_datagram")]
    pub max_datagram: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: default_listen_port(),
            max_datagram: default_max_datagram(),
        }
    }
}

impl ListenConfig {
    /// `address:port` to bind the UDP listener on.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Reverse proxy whose access log we consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressKind {
    #[default]
    Nginx,
}

impl IngressKind {
    /// Tag the proxy's syslog writer puts in front of the JSON body.
    pub fn default_marker(&self) -> &'static str {
        match self {
            IngressKind::Nginx => "nginx: ",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngressConfig {
    #[serde(default)]
    pub kind: IngressKind,
    /// Overrides the kind's default marker.
    pub marker: Option<String>,
}

impl IngressConfig {
    /// Explicit marker if configured, otherwise the kind's default.
    pub fn marker(&self) -> &str {
        self.marker
            .as_deref()
            .unwrap_or_else(|| self.kind.default_marker())
    }
}

/// Global timing and pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Averaging window in seconds; also the sampling period.
    #[serde(default = "default_avg_time")]
    pub avg_time: u64,
    /// Minimum seconds between two scale actions on the same service.
    #[serde(default = "default_scale_interval")]
    pub scale_interval: u64,
    /// Seconds of samples that must agree before a decision is trusted.
    #[serde(default = "default_decision_window")]
    pub decision_window: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            avg_time: default_avg_time(),
            scale_interval: default_scale_interval(),
            decision_window: default_decision_window(),
            pool_size: default_pool_size(),
            queue_size: default_queue_size(),
        }
    }
}

impl Defaults {
    /// Averaging window as a `Duration`.
    pub fn avg_window(&self) -> Duration {
        Duration::from_secs(self.avg_time)
    }

    /// Minimum time between two scale actions for one service.
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_interval)
    }

    /// Number of samples in one decision window (60 / avg_time by default).
    pub fn streak_len(&self) -> usize {
        (self.decision_window / self.avg_time.max(1)).max(1) as usize
    }

    fn validate(&self) -> ConfigResult<()> {
        if !(1..=60).contains(&self.avg_time) {
            return Err(ConfigError::InvalidDefaults(format!(
                "avg_time must be within 1..=60 seconds, got {}",
                self.avg_time
            )));
        }
        if self.decision_window < self.avg_time {
            return Err(ConfigError::InvalidDefaults(format!(
                "decision_window ({}) must be >= avg_time ({})",
                self.decision_window, self.avg_time
            )));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidDefaults("pool_size must be >= 1".into()));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::InvalidDefaults("queue_size must be >= 1".into()));
        }
        Ok(())
    }
}

/// Where to reach the orchestrator's API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// `host:port` of a plain-HTTP API endpoint (e.g. `kubectl proxy`).
    #[serde(default = "default_cluster_endpoint")]
    pub endpoint: String,
    pub token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_cluster_timeout")]
    pub timeout: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoint: default_cluster_endpoint(),
            token: None,
            timeout: default_cluster_timeout(),
        }
    }
}

/// Static scaling policy for one watched service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceScaleConfig {
    pub namespace: String,
    pub service: String,
    pub min_pod: u32,
    pub max_pod: u32,
    /// Per-backend QPS above which the service is in danger.
    pub max_qps: f64,
    /// Comfortable per-backend QPS; below half of it the service is wasteful.
    pub safe_qps: f64,
    /// Multiplier applied to the computed QPS before comparison.
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl ServiceScaleConfig {
    /// The `service.namespace` key this policy applies to.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.service, &self.namespace)
    }

    fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigError::InvalidService {
            service: self.key().to_string(),
            reason,
        };
        if self.service.is_empty() || self.namespace.is_empty() {
            return Err(invalid("service and namespace must be set".into()));
        }
        if self.min_pod < 1 {
            return Err(invalid("min_pod must be >= 1".into()));
        }
        if self.max_pod < self.min_pod {
            return Err(invalid(format!(
                "max_pod ({}) < min_pod ({})",
                self.max_pod, self.min_pod
            )));
        }
        for (name, value) in [
            ("max_qps", self.max_qps),
            ("safe_qps", self.safe_qps),
            ("factor", self.factor),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("{name} must be a finite number, got {value}")));
            }
        }
        if !(self.safe_qps > 0.0) {
            return Err(invalid(format!("safe_qps must be > 0, got {}", self.safe_qps)));
        }
        if !(self.max_qps >= self.safe_qps) {
            return Err(invalid(format!(
                "max_qps ({}) < safe_qps ({})",
                self.max_qps, self.safe_qps
            )));
        }
        if !(self.factor > 0.0) {
            return Err(invalid(format!("factor must be > 0, got {}", self.factor)));
        }
        Ok(())
    }

    /// Parse one `QSCALE_SERVICES` entry:
    /// `service.namespace:minPod:maxPod:safeQPS:maxQPS[:factor]`.
    pub fn from_env_entry(entry: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidServiceEnv {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = entry.trim().split(':').collect();
        if !(5..=6).contains(&parts.len()) {
            return Err(invalid("expected 5 or 6 ':'-separated fields"));
        }
        let key = ServiceKey::parse(parts[0]).ok_or_else(|| invalid("name is not service.namespace"))?;
        let min_pod = parts[1].parse().map_err(|_| invalid("bad minPod"))?;
        let max_pod = parts[2].parse().map_err(|_| invalid("bad maxPod"))?;
        let safe_qps = parts[3].parse().map_err(|_| invalid("bad safeQPS"))?;
        let max_qps = parts[4].parse().map_err(|_| invalid("bad maxQPS"))?;
        let factor = match parts.get(5) {
            Some(f) => f.parse().map_err(|_| invalid("bad factor"))?,
            None => default_factor(),
        };
        Ok(Self {
            namespace: key.namespace,
            service: key.service,
            min_pod,
            max_pod,
            max_qps,
            safe_qps,
            factor,
        })
    }
}

/// Duplicate every raw payload to an auxiliary collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Only `rsyslog` (UDP) is understood; others are skipped.
    pub kind: String,
    pub address: String,
}

/// Where to announce successful scale actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Only `webhook` is understood; others are skipped.
    pub kind: String,
    pub url: String,
}

impl Config {
    /// Read, apply environment overrides, and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without overrides or validation.
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Apply `QSCALE_*` overrides read through `lookup`.
    ///
    /// Numeric values that fail to parse are ignored with a warning; a bad
    /// `QSCALE_SERVICES` entry is an error because it would silently change
    /// which services are scaled.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("QSCALE_LISTEN_ADDR") {
            self.listen.address = addr;
        }
        env_number(&lookup, "QSCALE_LISTEN_PORT", &mut self.listen.port);
        env_number(&lookup, "QSCALE_AVG_TIME", &mut self.defaults.avg_time);
        env_number(&lookup, "QSCALE_SCALE_INTERVAL", &mut self.defaults.scale_interval);
        if let Some(endpoint) = lookup("QSCALE_CLUSTER_ENDPOINT") {
            self.cluster.endpoint = endpoint;
        }
        if let Some(token) = lookup("QSCALE_CLUSTER_TOKEN") {
            self.cluster.token = Some(token);
        }
        if let Some(services) = lookup("QSCALE_SERVICES")
            && !services.trim().is_empty()
        {
            self.services = services
                .split(',')
                .filter(|e| !e.trim().is_empty())
                .map(ServiceScaleConfig::from_env_entry)
                .collect::<ConfigResult<Vec<_>>>()?;
        }
        Ok(())
    }

    /// Check defaults and every service policy. Any error is fatal at startup.
    pub fn validate(&self) -> ConfigResult<()> {
        self.defaults.validate()?;
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        let mut seen = HashSet::new();
        for svc in &self.services {
            svc.validate()?;
            if !seen.insert(svc.key()) {
                return Err(ConfigError::DuplicateService(svc.key().to_string()));
            }
        }
        Ok(())
    }

    /// Policy for `key`, if it is watched.
    pub fn service(&self, key: &ServiceKey) -> Option<&ServiceScaleConfig> {
        self.services.iter().find(|s| s.key() == *key)
    }

    /// Keys of every configured service.
    pub fn watched_keys(&self) -> HashSet<ServiceKey> {
        self.services.iter().map(ServiceScaleConfig::key).collect()
    }
}

fn env_number<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => warn!(var = name, value = %raw, "ignoring unparseable environment override"),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    514
}

fn default_max_datagram() -> usize {
    1024
}

fn default_avg_time() -> u64 {
    5
}

fn default_scale_interval() -> u64 {
    300
}

fn default_decision_window() -> u64 {
    60
}

fn default_pool_size() -> usize {
    10
}

fn default_queue_size() -> usize {
    1024
}

fn default_cluster_endpoint() -> String {
    "127.0.0.1:8001".to_string()
}

fn default_cluster_timeout() -> u64 {
    5
}

fn default_factor() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
[listen]
address = "127.0.0.1"
port = 5140

[defaults]
avg_time = 5
scale_interval = 120

[[services]]
namespace = "ns"
service = "web"
min_pod = 1
max_pod = 4
max_qps = 5.0
safe_qps = 2.0

[[forwards]]
kind = "rsyslog"
address = "10.0.0.1:514"
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn non_finite_thresholds_are_rejected() {
        for (field, value) in [
            ("max_qps", "nan"),
            ("max_qps", "inf"),
            ("safe_qps", "nan"),
            ("safe_qps", "inf"),
            ("factor", "nan"),
            ("factor", "inf"),
        ] {
            let mut config = Config::from_toml_str(SAMPLE).unwrap();
            let svc = &mut config.services[0];
            let parsed: f64 = value.parse().unwrap();
            match field {
                "max_qps" => svc.max_qps = parsed,
                "safe_qps" => svc.safe_qps = parsed,
                _ => svc.factor = parsed,
            }
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidService { .. }),
                "{field} = {value} accepted"
            );
        }
    }

    #[test]
    fn nan_max_qps_in_toml_is_fatal() {
        let toml = SAMPLE.replace("max_qps = 5.0", "max_qps = nan");
        let config = Config::from_toml_str(&toml).unwrap();
        assert!(config.service(&ServiceKey::new("web", "ns")).unwrap().max_qps.is_nan());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidService { .. })
        ));
    }

    #[test]
    fn parse_sample_with_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen.socket_addr(), "127.0.0.1:5140");
        assert_eq!(config.listen.max_datagram, 1024);
        assert_eq!(config.ingress.marker(), "nginx: ");
        assert_eq!(config.defaults.pool_size, 10);
        assert_eq!(config.defaults.streak_len(), 12);
        assert_eq!(config.defaults.cooldown(), Duration::from_secs(120));

        let svc = &config.services[0];
        assert_eq!(svc.key().to_string(), "web.ns");
        assert_eq!(svc.factor, 1.0);
        assert_eq!(config.forwards.len(), 1);
    }

    #[test]
    fn custom_marker_overrides_kind() {
        let config = Config::from_toml_str(
            r#"
[ingress]
kind = "nginx"
marker = "ingress-log: "
"#,
        )
        .unwrap();
        assert_eq!(config.ingress.marker(), "ingress-log: ");
    }

    #[test]
    fn unknown_ingress_kind_is_rejected() {
        let err = Config::from_toml_str("[ingress]\nkind = \"traefik\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn max_below_min_is_fatal() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.services[0].min_pod = 5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidService { .. }));
    }

    #[test]
    fn max_qps_below_safe_qps_is_fatal() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.services[0].max_qps = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_min_pod_is_fatal() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.services[0].min_pod = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn no_services_is_fatal() {
        let config = Config::from_toml_str("").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoServices)));
    }

    #[test]
    fn duplicate_services_are_rejected() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.services.push(config.services[0].clone());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateService(_))
        ));
    }

    #[test]
    fn avg_time_out_of_range() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.defaults.avg_time = 0;
        assert!(config.validate().is_err());
        config.defaults.avg_time = 61;
        config.defaults.decision_window = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config
            .apply_env(env(&[
                ("QSCALE_LISTEN_PORT", "9000"),
                ("QSCALE_AVG_TIME", "10"),
                ("QSCALE_SERVICES", "api.prod:2:8:10:20:1.5,web.ns:1:3:2:5"),
            ]))
            .unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen.port, 9000);
        assert_eq!(config.defaults.avg_time, 10);
        assert_eq!(config.defaults.streak_len(), 6);
        assert_eq!(config.services.len(), 2);

        let api = config.service(&ServiceKey::new("api", "prod")).unwrap();
        assert_eq!((api.min_pod, api.max_pod), (2, 8));
        assert_eq!((api.safe_qps, api.max_qps, api.factor), (10.0, 20.0, 1.5));
        let web = config.service(&ServiceKey::new("web", "ns")).unwrap();
        assert_eq!(web.factor, 1.0);
    }

    #[test]
    fn bad_numeric_env_is_ignored() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config
            .apply_env(env(&[("QSCALE_LISTEN_PORT", "not-a-port")]))
            .unwrap();
        assert_eq!(config.listen.port, 5140);
    }

    #[test]
    fn bad_services_env_is_an_error() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        let err = config
            .apply_env(env(&[("QSCALE_SERVICES", "web:1:2:3")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServiceEnv { .. }));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.watched_keys().contains(&ServiceKey::new("web", "ns")));
    }

    #[test]
    fn load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/qscale.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
