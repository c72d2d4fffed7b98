//! Service table — the single owner of every service's `QpsWindow`.
//!
//! Ingestion lanes call `record()`; the table's `run()` loop rolls seconds
//! and emits samples. Windows are created lazily on the first event for a
//! watched service and live for the process lifetime. The outer map is
//! behind an `RwLock` (write only on first event per service); each window
//! has its own `Mutex`, so lanes for different services never contend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use qscale_core::{AccessEvent, ServiceKey};

use crate::sample::RateSample;
use crate::window::QpsWindow;

/// What happened to an event handed to `record()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Counted,
    /// Not in the configured watch set.
    Unwatched,
    /// Older than the averaging window.
    Stale,
}

#[derive(Clone)]
pub struct ServiceTable {
    windows: Arc<RwLock<HashMap<ServiceKey, Arc<Mutex<QpsWindow>>>>>,
    watched: Arc<HashSet<ServiceKey>>,
    window: Duration,
}

impl ServiceTable {
    /// Table counting only `watched` services over `window`.
    pub fn new(watched: HashSet<ServiceKey>, window: Duration) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            watched: Arc::new(watched),
            window,
        }
    }

    /// Averaging window shared by every service.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// True if events for `key` are counted.
    pub fn is_watched(&self, key: &ServiceKey) -> bool {
        self.watched.contains(key)
    }

    /// Count an event against its service's window using the wall clock.
    pub async fn record(&self, event: &AccessEvent) -> RecordOutcome {
        self.record_at(event, SystemTime::now()).await
    }

    /// Count an event as of `now`.
    pub async fn record_at(&self, event: &AccessEvent, now: SystemTime) -> RecordOutcome {
        if !self.is_watched(&event.service_key) {
            return RecordOutcome::Unwatched;
        }
        let window = self.get_or_create(&event.service_key).await;
        let mut window = window.lock().await;
        if window.record(&event.upstream, event.access_time, now) {
            RecordOutcome::Counted
        } else {
            RecordOutcome::Stale
        }
    }

    /// Fetch a service's window, creating it on first use.
    pub async fn get_or_create(&self, key: &ServiceKey) -> Arc<Mutex<QpsWindow>> {
        if let Some(w) = self.windows.read().await.get(key) {
            return Arc::clone(w);
        }
        let mut windows = self.windows.write().await;
        let w = windows.entry(key.clone()).or_insert_with(|| {
            debug!(service = %key, "created qps window");
            Arc::new(Mutex::new(QpsWindow::new(self.window)))
        });
        Arc::clone(w)
    }

    /// Services that have received at least one event.
    pub async fn services(&self) -> Vec<ServiceKey> {
        self.windows.read().await.keys().cloned().collect()
    }

    /// Close the current second on every window.
    pub async fn roll_all(&self, now: SystemTime) {
        let windows = self.windows.read().await;
        for w in windows.values() {
            w.lock().await.roll(now);
        }
    }

    /// Evict expired buckets and stale backends everywhere.
    pub async fn sweep_all(&self, now: SystemTime) {
        let windows = self.windows.read().await;
        for w in windows.values() {
            w.lock().await.sweep(now);
        }
    }

    /// One sample per known service.
    pub async fn sample_all(&self, now: SystemTime) -> Vec<RateSample> {
        let windows = self.windows.read().await;
        let mut samples = Vec::with_capacity(windows.len());
        for (key, w) in windows.iter() {
            let (total, active_backends) = w.lock().await.sample(now);
            samples.push(RateSample {
                service_key: key.clone(),
                total,
                active_backends,
                period: self.window,
            });
        }
        samples
    }

    /// Roll every second; every averaging period sweep, sample, and push
    /// the samples to the decision loop. Runs until shutdown.
    ///
    /// Samples are offered with `try_send`: if the decision loop is behind,
    /// the sample is dropped rather than delaying the per-second roll.
    pub async fn run(
        &self,
        samples: mpsc::Sender<RateSample>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period_secs = self.window.as_secs().max(1);
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + Duration::from_secs(1),
            Duration::from_secs(1),
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut elapsed = 0u64;

        info!(avg_time = period_secs, "qps window ticker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = SystemTime::now();
                    self.roll_all(now).await;
                    elapsed += 1;
                    if elapsed % period_secs != 0 {
                        continue;
                    }
                    self.sweep_all(now).await;
                    for sample in self.sample_all(now).await {
                        match samples.try_send(sample) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(s)) => {
                                warn!(service = %s.service_key, "decision loop lagging, sample dropped");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                info!("sample receiver closed, ticker stopping");
                                return;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("qps window ticker shutting down");
                    break;
                }
            }
        }
    }
}
