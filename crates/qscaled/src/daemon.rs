//! Daemon assembly: cluster adapter, startup checks, and the task graph.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::info;

use qscale_autoscale::{Autoscaler, NotifyHook, ScaleNotice};
use qscale_cluster::{BoxFuture, DryRunScaler, KubeScaler, ReplicaScaler};
use qscale_core::{Config, ServiceScaleConfig};
use qscale_ingest::{Decoder, IngestPool, IngestStats};
use qscale_metrics::ServiceTable;
use qscale_relay::{Forwarder, WebhookNotifier};

use crate::listener::Listener;

/// Samples buffered per watched service between the ticker and the engine.
const SAMPLES_PER_SERVICE: usize = 4;

/// Pick the cluster adapter. Dry-run counts start at each service's floor.
pub fn build_scaler(config: &Config, dry_run: bool) -> Arc<dyn ReplicaScaler> {
    if dry_run {
        let scaler = DryRunScaler::new();
        for svc in &config.services {
            scaler.seed(&svc.namespace, &svc.service, svc.min_pod);
        }
        info!("dry run: replica changes are logged, not applied");
        return Arc::new(scaler);
    }
    info!(endpoint = %config.cluster.endpoint, "using deployment scale subresource");
    Arc::new(KubeScaler::from_config(&config.cluster))
}

/// Read every watched service's replica count once. Any failure is fatal.
pub async fn check_cluster(
    scaler: &dyn ReplicaScaler,
    services: &[ServiceScaleConfig],
) -> anyhow::Result<()> {
    for svc in services {
        let replicas = scaler
            .replica_count(&svc.namespace, &svc.service)
            .await
            .with_context(|| format!("cluster check for {} failed", svc.key()))?;
        info!(service = %svc.key(), replicas, "cluster reachable");
    }
    Ok(())
}

/// One line per watched service with its scaling policy.
pub fn log_banner(config: &Config) {
    info!(
        avg_time = config.defaults.avg_time,
        scale_interval = config.defaults.scale_interval,
        streak = config.defaults.streak_len(),
        marker = %config.ingress.marker(),
        "qscale starting"
    );
    for svc in &config.services {
        info!(
            service = %svc.key(),
            safe_qps = svc.safe_qps,
            max_qps = svc.max_qps,
            min_pod = svc.min_pod,
            max_pod = svc.max_pod,
            factor = svc.factor,
            "watching service"
        );
    }
}

fn notify_hook(notifier: WebhookNotifier) -> NotifyHook {
    let notifier = Arc::new(notifier);
    Arc::new(move |notice: ScaleNotice| -> BoxFuture<'static, ()> {
        let notifier = Arc::clone(&notifier);
        Box::pin(async move {
            let text = WebhookNotifier::scale_message(&notice.service_key, notice.from, notice.to);
            notifier.notify(&text).await;
        })
    })
}

/// Check the cluster, bind the configured address, and serve until shutdown.
pub async fn run(
    config: Config,
    scaler: Arc<dyn ReplicaScaler>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Arc<IngestStats>> {
    check_cluster(&*scaler, &config.services).await?;
    log_banner(&config);

    let addr = config.listen.socket_addr();
    let listener = Listener::bind(&addr, config.listen.max_datagram)
        .await
        .with_context(|| format!("bind udp {addr}"))?;

    serve(config, scaler, listener, shutdown).await
}

/// Run the pipeline on an already bound listener. Returns the ingestion
/// counters once every task has stopped.
pub async fn serve(
    config: Config,
    scaler: Arc<dyn ReplicaScaler>,
    listener: Listener,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Arc<IngestStats>> {
    let defaults = &config.defaults;

    let forwarder = Forwarder::from_configs(&config.forwards)
        .await
        .context("forward targets")?;
    let notifier = WebhookNotifier::from_configs(&config.notifies).context("notify targets")?;

    let table = ServiceTable::new(config.watched_keys(), defaults.avg_window());
    let pool = IngestPool::start(
        defaults.pool_size,
        defaults.queue_size,
        Decoder::new(config.ingress.marker()),
        table.clone(),
    );

    let mut autoscaler = Autoscaler::from_config(&config, scaler);
    if !notifier.is_empty() {
        autoscaler = autoscaler.with_notify(notify_hook(notifier));
    }

    let (sample_tx, sample_rx) =
        mpsc::channel(config.services.len().max(1) * SAMPLES_PER_SERVICE);

    let ticker_shutdown = shutdown.clone();
    let ticker = tokio::spawn(async move {
        table.run(sample_tx, ticker_shutdown).await;
    });
    let engine = tokio::spawn(autoscaler.run(sample_rx, shutdown.clone()));

    let served = listener.run(&pool, &forwarder, shutdown).await;

    let stats = pool.stats();
    pool.shutdown().await;
    let _ = ticker.await;
    let _ = engine.await;

    served?;
    info!("qscale stopped");
    Ok(stats)
}
