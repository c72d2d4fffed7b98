//! Ingestion pool — fixed worker lanes running decode → dispatch.
//!
//! Payloads are assigned to a lane by arrival time in milliseconds modulo
//! the lane count: cheap, low-skew, and order-preserving within a lane.
//! Each lane has a bounded queue; `submit()` waits when it is full so the
//! UDP read loop sees the congestion and can drop at the socket instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use qscale_metrics::{RecordOutcome, ServiceTable};

use crate::decoder::Decoder;
use crate::error::IngestError;

/// Lane counters, shared by every lane.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    /// Not an access record, or no service identity.
    pub ignored: AtomicU64,
    pub unwatched: AtomicU64,
    pub stale: AtomicU64,
    pub counted: AtomicU64,
}

impl IngestStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of one counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

pub struct IngestPool {
    lanes: Vec<mpsc::Sender<Vec<u8>>>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<IngestStats>,
}

impl IngestPool {
    /// Spawn `size` lanes, each with a queue of `queue_size` payloads.
    pub fn start(size: usize, queue_size: usize, decoder: Decoder, table: ServiceTable) -> Self {
        let size = size.max(1);
        let decoder = Arc::new(decoder);
        let stats = Arc::new(IngestStats::default());
        let mut lanes = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for lane in 0..size {
            let (tx, rx) = mpsc::channel(queue_size.max(1));
            lanes.push(tx);
            handles.push(tokio::spawn(run_lane(
                lane,
                rx,
                Arc::clone(&decoder),
                table.clone(),
                Arc::clone(&stats),
            )));
        }

        info!(lanes = size, queue_size, "ingestion pool started");
        Self {
            lanes,
            handles,
            stats,
        }
    }

    /// Number of worker lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Shared counters, updated by every lane.
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Lane for a payload that arrived at `arrival`.
    pub fn lane_for(arrival: SystemTime, lanes: usize) -> usize {
        let millis = arrival
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        (millis % lanes.max(1) as u128) as usize
    }

    /// Queue a raw payload, waiting if its lane is full.
    pub async fn submit(&self, payload: Vec<u8>) -> Result<(), IngestError> {
        let lane = Self::lane_for(SystemTime::now(), self.lanes.len());
        self.submit_to(lane, payload).await
    }

    /// Queue a payload on a specific lane, waiting if it is full.
    pub async fn submit_to(&self, lane: usize, payload: Vec<u8>) -> Result<(), IngestError> {
        let lane = lane % self.lanes.len();
        self.lanes[lane]
            .send(payload)
            .await
            .map_err(|_| IngestError::LaneClosed(lane))
    }

    /// Close every queue and wait for the lanes to drain.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for handle in self.handles {
            let _ = handle.await;
        }
        let s = &self.stats;
        info!(
            received = IngestStats::get(&s.received),
            counted = IngestStats::get(&s.counted),
            malformed = IngestStats::get(&s.malformed),
            unwatched = IngestStats::get(&s.unwatched),
            "ingestion pool stopped"
        );
    }
}

async fn run_lane(
    lane: usize,
    mut rx: mpsc::Receiver<Vec<u8>>,
    decoder: Arc<Decoder>,
    table: ServiceTable,
    stats: Arc<IngestStats>,
) {
    debug!(lane, "ingestion lane started");
    while let Some(payload) = rx.recv().await {
        IngestStats::bump(&stats.received);
        let event = match decoder.decode(&payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                IngestStats::bump(&stats.ignored);
                continue;
            }
            Err(e) => {
                IngestStats::bump(&stats.malformed);
                warn!(lane, error = %e, "dropping undecodable payload");
                continue;
            }
        };
        match table.record(&event).await {
            RecordOutcome::Counted => IngestStats::bump(&stats.counted),
            RecordOutcome::Unwatched => IngestStats::bump(&stats.unwatched),
            RecordOutcome::Stale => IngestStats::bump(&stats.stale),
        }
    }
    debug!(lane, "ingestion lane stopped");
}
