//! Autoscaler — the per-service decision engine and its run loop.
//!
//! `evaluate()` is synchronous and owns every `HysteresisState`; cluster
//! calls happen in spawned tasks and report back through a channel, so a
//! slow orchestrator never holds up sample processing. A service with a
//! request in flight is `Pending` and gets no second request until the
//! outcome is applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use qscale_cluster::{BoxFuture, ReplicaScaler};
use qscale_core::{Config, ServiceKey, ServiceScaleConfig};
use qscale_metrics::RateSample;

use crate::hysteresis::{HysteresisState, Phase, Pressure};
use crate::policy::target_replicas;

/// A replica change the engine wants applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleRequest {
    pub service_key: ServiceKey,
    pub target: u32,
    /// Factored per-backend QPS that produced the request.
    pub qps: f64,
    pub pressure: Pressure,
}

/// Result of executing a [`ScaleRequest`] against the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleOutcome {
    Scaled { from: u32, to: u32 },
    /// The cluster already runs the target count.
    Unchanged { replicas: u32 },
    Failed(String),
}

/// Sent to the notify hook after every successful scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleNotice {
    pub service_key: ServiceKey,
    pub from: u32,
    pub to: u32,
}

/// Callback invoked (in its own task) after a successful scale.
pub type NotifyHook = Arc<dyn Fn(ScaleNotice) -> BoxFuture<'static, ()> + Send + Sync>;

struct ServiceEntry {
    config: ServiceScaleConfig,
    state: HysteresisState,
}

pub struct Autoscaler {
    services: HashMap<ServiceKey, ServiceEntry>,
    scaler: Arc<dyn ReplicaScaler>,
    cooldown: Duration,
    notify: Option<NotifyHook>,
}

impl Autoscaler {
    /// Engine for `services`, each starting idle with empty streaks.
    pub fn new(
        services: impl IntoIterator<Item = ServiceScaleConfig>,
        streak_len: usize,
        cooldown: Duration,
        scaler: Arc<dyn ReplicaScaler>,
    ) -> Self {
        let services = services
            .into_iter()
            .map(|config| {
                let entry = ServiceEntry {
                    config,
                    state: HysteresisState::new(streak_len),
                };
                (entry.config.key(), entry)
            })
            .collect();
        Self {
            services,
            scaler,
            cooldown,
            notify: None,
        }
    }

    /// Engine using the services, streak length and cooldown from `config`.
    pub fn from_config(config: &Config, scaler: Arc<dyn ReplicaScaler>) -> Self {
        Self::new(
            config.services.iter().cloned(),
            config.defaults.streak_len(),
            config.defaults.cooldown(),
            scaler,
        )
    }

    /// Call `hook` after every successful scale.
    pub fn with_notify(mut self, hook: NotifyHook) -> Self {
        self.notify = Some(hook);
        self
    }

    /// Lifecycle phase of `key`, if it is configured.
    pub fn phase(&self, key: &ServiceKey, now: SystemTime) -> Option<Phase> {
        self.services.get(key).map(|e| e.state.phase(now))
    }

    /// Feed one sample through the service's streak rings. Returns a
    /// request when a full streak agrees and the service is idle; the
    /// service is then `Pending` until [`apply_outcome`](Self::apply_outcome).
    pub fn evaluate(&mut self, sample: &RateSample, now: SystemTime) -> Option<ScaleRequest> {
        let Some(entry) = self.services.get_mut(&sample.service_key) else {
            debug!(service = %sample.service_key, "sample for unconfigured service");
            return None;
        };
        let cfg = &entry.config;

        let qps = sample.avg_qps() * cfg.factor;
        info!(
            service = %sample.service_key,
            avg_time = sample.period.as_secs(),
            factor = cfg.factor,
            qps,
            backends = sample.active_backends,
            "rate sample"
        );

        let pressure = entry.state.observe(qps, cfg.max_qps, cfg.safe_qps);
        if pressure == Pressure::Steady {
            return None;
        }

        let phase = entry.state.phase(now);
        if phase != Phase::Idle {
            debug!(service = %sample.service_key, ?pressure, ?phase, "scale deferred");
            return None;
        }

        let target = target_replicas(qps, cfg.max_qps, cfg.min_pod, cfg.max_pod);
        entry.state.begin();
        info!(service = %sample.service_key, ?pressure, qps, target, "scale requested");

        Some(ScaleRequest {
            service_key: sample.service_key.clone(),
            target,
            qps,
            pressure,
        })
    }

    /// Read the current replica count and change it if it differs from the
    /// target. Errors are logged and reported as `Failed`; nothing retries.
    pub async fn execute(scaler: &dyn ReplicaScaler, request: &ScaleRequest) -> ScaleOutcome {
        let key = &request.service_key;

        let current = match scaler.replica_count(&key.namespace, &key.service).await {
            Ok(n) => n,
            Err(e) => {
                warn!(service = %key, error = %e, "reading replica count failed");
                return ScaleOutcome::Failed(e.to_string());
            }
        };

        if current == request.target {
            debug!(service = %key, replicas = current, "already at target");
            return ScaleOutcome::Unchanged { replicas: current };
        }

        match scaler
            .set_replica_count(&key.namespace, &key.service, request.target)
            .await
        {
            Ok(()) => {
                info!(service = %key, from = current, to = request.target, "replicas changed");
                ScaleOutcome::Scaled {
                    from: current,
                    to: request.target,
                }
            }
            Err(e) => {
                warn!(
                    service = %key,
                    target = request.target,
                    error = %e,
                    "scaling action failed"
                );
                ScaleOutcome::Failed(e.to_string())
            }
        }
    }

    /// Settle a `Pending` service: a change starts the cooldown and clears
    /// the streaks; a no-op or failure just returns it to `Idle`.
    pub fn apply_outcome(&mut self, key: &ServiceKey, outcome: &ScaleOutcome, now: SystemTime) {
        let Some(entry) = self.services.get_mut(key) else {
            return;
        };
        match outcome {
            ScaleOutcome::Scaled { .. } => entry.state.succeeded(now, self.cooldown),
            ScaleOutcome::Unchanged { .. } | ScaleOutcome::Failed(_) => entry.state.abandoned(),
        }
    }

    /// Evaluate, execute and apply inline.
    pub async fn step(&mut self, sample: &RateSample, now: SystemTime) -> Option<ScaleOutcome> {
        let request = self.evaluate(sample, now)?;
        let outcome = Self::execute(&*self.scaler, &request).await;
        self.apply_outcome(&request.service_key, &outcome, now);
        if let ScaleOutcome::Scaled { from, to } = outcome
            && let Some(hook) = &self.notify
        {
            hook(ScaleNotice {
                service_key: request.service_key,
                from,
                to,
            })
            .await;
        }
        Some(outcome)
    }

    /// Consume samples until the channel closes or shutdown is signalled.
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<RateSample>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (done_tx, mut done_rx) = mpsc::channel::<(ServiceKey, ScaleOutcome)>(64);

        info!(
            services = self.services.len(),
            cooldown_secs = self.cooldown.as_secs(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                sample = samples.recv() => {
                    let Some(sample) = sample else {
                        info!("sample channel closed, autoscaler stopping");
                        break;
                    };
                    if let Some(request) = self.evaluate(&sample, SystemTime::now()) {
                        self.dispatch(request, done_tx.clone());
                    }
                }
                Some((key, outcome)) = done_rx.recv() => {
                    self.apply_outcome(&key, &outcome, SystemTime::now());
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, request: ScaleRequest, done: mpsc::Sender<(ServiceKey, ScaleOutcome)>) {
        let scaler = Arc::clone(&self.scaler);
        let notify = self.notify.clone();
        tokio::spawn(async move {
            let outcome = Self::execute(&*scaler, &request).await;
            if let ScaleOutcome::Scaled { from, to } = outcome
                && let Some(hook) = notify
            {
                tokio::spawn(hook(ScaleNotice {
                    service_key: request.service_key.clone(),
                    from,
                    to,
                }));
            }
            let _ = done.send((request.service_key, outcome)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qscale_cluster::DryRunScaler;
    use std::sync::Mutex;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn web_config() -> ServiceScaleConfig {
        ServiceScaleConfig {
            namespace: "ns".into(),
            service: "web".into(),
            min_pod: 2,
            max_pod: 5,
            max_qps: 100.0,
            safe_qps: 40.0,
            factor: 1.0,
        }
    }

    /// A sample from one backend over 5 s averaging `qps`.
    fn sample(qps: u64) -> RateSample {
        RateSample {
            service_key: ServiceKey::new("web", "ns"),
            total: qps * 5,
            active_backends: 1,
            period: Duration::from_secs(5),
        }
    }

    fn engine(streak: usize, replicas: u32) -> (Autoscaler, Arc<DryRunScaler>) {
        let cluster = Arc::new(DryRunScaler::new());
        cluster.seed("ns", "web", replicas);
        let scaler = Autoscaler::new([web_config()], streak, Duration::from_secs(300), cluster.clone());
        (scaler, cluster)
    }

    #[tokio::test]
    async fn partial_streak_never_scales() {
        let (mut scaler, cluster) = engine(3, 2);

        assert_eq!(scaler.step(&sample(100), at(0)).await, None);
        assert_eq!(scaler.step(&sample(100), at(5)).await, None);
        assert!(cluster.history().is_empty());

        // Third agreeing sample completes the streak; 1000/100 clamps to 5.
        let outcome = scaler.step(&sample(1000), at(10)).await;
        assert_eq!(outcome, Some(ScaleOutcome::Scaled { from: 2, to: 5 }));
    }

    #[tokio::test]
    async fn cooldown_allows_one_call() {
        let (mut scaler, cluster) = engine(1, 2);

        assert!(matches!(
            scaler.step(&sample(300), at(0)).await,
            Some(ScaleOutcome::Scaled { from: 2, to: 3 })
        ));
        assert_eq!(scaler.step(&sample(500), at(5)).await, None);
        assert_eq!(cluster.history().len(), 1);
        assert_eq!(
            scaler.phase(&ServiceKey::new("web", "ns"), at(5)),
            Some(Phase::Cooling { until: at(300) })
        );

        // After the cooldown the next agreeing sample acts again.
        assert!(matches!(
            scaler.step(&sample(500), at(300)).await,
            Some(ScaleOutcome::Scaled { from: 3, to: 5 })
        ));
    }

    #[tokio::test]
    async fn at_target_is_a_no_op() {
        let (mut scaler, cluster) = engine(1, 5);

        let outcome = scaler.step(&sample(1000), at(0)).await;
        assert_eq!(outcome, Some(ScaleOutcome::Unchanged { replicas: 5 }));
        assert!(cluster.history().is_empty());
        assert_eq!(
            scaler.phase(&ServiceKey::new("web", "ns"), at(0)),
            Some(Phase::Idle)
        );
    }

    #[tokio::test]
    async fn failure_leaves_state_for_next_cycle() {
        let (mut scaler, cluster) = engine(2, 2);
        cluster.set_failing(true);

        scaler.step(&sample(500), at(0)).await;
        let outcome = scaler.step(&sample(500), at(5)).await;
        assert!(matches!(outcome, Some(ScaleOutcome::Failed(_))));
        assert_eq!(
            scaler.phase(&ServiceKey::new("web", "ns"), at(5)),
            Some(Phase::Idle)
        );

        // Streak is intact, so the next sample retries without waiting.
        cluster.set_failing(false);
        let outcome = scaler.step(&sample(500), at(10)).await;
        assert_eq!(outcome, Some(ScaleOutcome::Scaled { from: 2, to: 5 }));
    }

    #[tokio::test]
    async fn wasteful_scales_down_to_floor() {
        let (mut scaler, cluster) = engine(2, 4);

        scaler.step(&sample(0), at(0)).await;
        let outcome = scaler.step(&sample(0), at(5)).await;
        assert_eq!(outcome, Some(ScaleOutcome::Scaled { from: 4, to: 2 }));
        assert_eq!(cluster.get("ns", "web"), Some(2));
    }

    #[tokio::test]
    async fn factor_is_applied_before_comparison() {
        let (mut scaler, _cluster) = engine(1, 2);
        scaler.services.values_mut().for_each(|e| e.config.factor = 3.0);

        // 50 qps * 3 = 150 >= 100.
        let request = scaler.evaluate(&sample(50), at(0)).unwrap();
        assert_eq!(request.qps, 150.0);
        assert_eq!(request.target, 2);
        assert_eq!(request.pressure, Pressure::Danger);
    }

    #[tokio::test]
    async fn pending_blocks_second_request() {
        let (mut scaler, _cluster) = engine(1, 2);

        assert!(scaler.evaluate(&sample(500), at(0)).is_some());
        assert!(scaler.evaluate(&sample(500), at(5)).is_none());
        assert_eq!(
            scaler.phase(&ServiceKey::new("web", "ns"), at(5)),
            Some(Phase::Pending)
        );
    }

    #[tokio::test]
    async fn unknown_service_is_ignored() {
        let (mut scaler, _cluster) = engine(1, 2);
        let mut s = sample(500);
        s.service_key = ServiceKey::new("api", "ns");
        assert!(scaler.evaluate(&s, at(0)).is_none());
    }

    #[tokio::test]
    async fn notify_hook_sees_successful_scale() {
        let seen: Arc<Mutex<Vec<ScaleNotice>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let hook: NotifyHook = Arc::new(move |notice: ScaleNotice| -> BoxFuture<'static, ()> {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(notice);
            })
        });

        let (scaler, _cluster) = engine(1, 2);
        let mut scaler = scaler.with_notify(hook);
        scaler.step(&sample(300), at(0)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ScaleNotice {
                service_key: ServiceKey::new("web", "ns"),
                from: 2,
                to: 3,
            }]
        );
    }

    #[tokio::test]
    async fn run_loop_dispatches_and_notifies() {
        let (notice_tx, mut notice_rx) = mpsc::channel::<ScaleNotice>(4);
        let hook: NotifyHook = Arc::new(move |notice: ScaleNotice| -> BoxFuture<'static, ()> {
            let tx = notice_tx.clone();
            Box::pin(async move {
                let _ = tx.send(notice).await;
            })
        });

        let (scaler, cluster) = engine(2, 2);
        let scaler = scaler.with_notify(hook);
        let (sample_tx, sample_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scaler.run(sample_rx, shutdown_rx));

        sample_tx.send(sample(400)).await.unwrap();
        sample_tx.send(sample(400)).await.unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), notice_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((notice.from, notice.to), (2, 4));
        assert_eq!(cluster.get("ns", "web"), Some(4));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
