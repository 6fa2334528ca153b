//! Ingest fan-out worker.
//!
//! Stream handlers stamp batches and hand them to this single worker over a
//! bounded channel, which preserves the per-session production order into
//! storage and the alert engine. Storage failures increment a counter and
//! are logged; they never terminate the sending stream.

use crate::bus::LiveBus;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use vigil_alert::engine::{AlertEngine, AlertSignal};
use vigil_notify::{Dispatcher, Notification, NotificationKind};
use vigil_storage::Storage;
use vigil_common::types::Sample;

/// Batches queued between the stream handlers and the worker. The bound is
/// the backpressure point: a stalled worker slows the streams down instead
/// of growing memory.
pub const INGEST_QUEUE: usize = 64;

/// Upper bound on labels per sample, to keep the key space sane.
pub const MAX_LABELS: usize = 32;

/// A storage commit that has not returned within this window counts as a
/// failure; the worker moves on so a stalled store cannot pin the streams
/// behind the ingest queue.
pub const STORAGE_WRITE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct IngestBatch {
    pub node_id: String,
    pub samples: Vec<Sample>,
}

#[derive(Default)]
pub struct IngestStats {
    pub batches: AtomicU64,
    pub samples: AtomicU64,
    pub storage_failures: AtomicU64,
    pub oversized_label_drops: AtomicU64,
}

pub struct IngestPipeline {
    pub tx: mpsc::Sender<IngestBatch>,
    pub stats: Arc<IngestStats>,
}

pub fn spawn(
    storage: Arc<dyn Storage>,
    alert_engine: Arc<Mutex<AlertEngine>>,
    dispatcher: Dispatcher,
    bus: Arc<LiveBus>,
) -> (IngestPipeline, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<IngestBatch>(INGEST_QUEUE);
    let stats = Arc::new(IngestStats::default());
    let worker_stats = Arc::clone(&stats);

    let handle = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            worker_stats.batches.fetch_add(1, Ordering::Relaxed);
            worker_stats
                .samples
                .fetch_add(batch.samples.len() as u64, Ordering::Relaxed);

            let write = {
                let storage = storage.clone();
                let samples = batch.samples.clone();
                tokio::task::spawn_blocking(move || storage.write_samples(&samples))
            };
            match timeout(STORAGE_WRITE_DEADLINE, write).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    worker_stats.storage_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        node_id = %batch.node_id,
                        error = %e,
                        "Failed to write sample batch"
                    );
                }
                Ok(Err(e)) => {
                    worker_stats.storage_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        node_id = %batch.node_id,
                        error = %e,
                        "Storage write task failed"
                    );
                }
                Err(_) => {
                    worker_stats.storage_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        node_id = %batch.node_id,
                        deadline_secs = STORAGE_WRITE_DEADLINE.as_secs(),
                        "Storage write timed out"
                    );
                }
            }

            let now = Utc::now();
            let updates = {
                let mut engine = alert_engine
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let mut updates = Vec::new();
                for sample in &batch.samples {
                    updates.extend(engine.ingest(sample, now));
                }
                updates
            };

            for update in updates {
                if let Err(e) = storage.save_alert(&update.alert) {
                    tracing::error!(
                        alert_id = %update.alert.id,
                        error = %e,
                        "Failed to persist alert"
                    );
                }
                bus.publish_alert(&update.alert);
                match update.signal {
                    AlertSignal::Fired => dispatcher.dispatch(Notification {
                        kind: NotificationKind::Fired,
                        alert: update.alert,
                    }),
                    AlertSignal::Resolved => dispatcher.dispatch(Notification {
                        kind: NotificationKind::Resolved,
                        alert: update.alert,
                    }),
                    AlertSignal::None => {}
                }
            }

            bus.publish_metrics(&batch.samples);
        }
    });

    (IngestPipeline { tx, stats }, handle)
}

/// Applies the ingress stamping rules to one wire batch: the session's node
/// id overrides whatever the agent sent, zero timestamps become the receive
/// time, and samples with an absurd label count are dropped.
pub fn stamp_samples(
    node_id: &str,
    samples: Vec<vigil_common::proto::Metric>,
    stats: &IngestStats,
) -> Vec<Sample> {
    let receive_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    samples
        .into_iter()
        .filter_map(|m| {
            if m.labels.len() > MAX_LABELS {
                stats.oversized_label_drops.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    metric = %m.name,
                    labels = m.labels.len(),
                    "Dropping sample with oversized label set"
                );
                return None;
            }
            if m.name.is_empty() {
                return None;
            }
            Some(Sample {
                metric_name: m.name,
                value: m.value,
                timestamp_ns: if m.timestamp_ns == 0 {
                    receive_ns
                } else {
                    m.timestamp_ns
                },
                labels: m.labels,
                node_id: node_id.to_string(),
                kind: vigil_common::types::MetricKind::from_wire(m.kind),
                help: m.help,
                unit: m.unit,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::proto::Metric;

    fn wire_metric(name: &str, ts: i64) -> Metric {
        Metric {
            name: name.to_string(),
            value: 1.0,
            timestamp_ns: ts,
            labels: Default::default(),
            kind: 0,
            help: String::new(),
            unit: String::new(),
        }
    }

    #[test]
    fn stamping_overrides_node_and_fills_timestamps() {
        let stats = IngestStats::default();
        let stamped = stamp_samples("n1", vec![wire_metric("cpu", 0)], &stats);
        assert_eq!(stamped.len(), 1);
        assert_eq!(stamped[0].node_id, "n1");
        assert!(stamped[0].timestamp_ns > 0);

        let stamped = stamp_samples("n1", vec![wire_metric("cpu", 42)], &stats);
        assert_eq!(stamped[0].timestamp_ns, 42);
    }

    #[test]
    fn oversized_label_sets_are_dropped_with_counter() {
        let stats = IngestStats::default();
        let mut metric = wire_metric("cpu", 1);
        for i in 0..(MAX_LABELS + 1) {
            metric.labels.insert(format!("k{i}"), "v".to_string());
        }
        let stamped = stamp_samples("n1", vec![metric], &stats);
        assert!(stamped.is_empty());
        assert_eq!(stats.oversized_label_drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unnamed_metrics_are_dropped() {
        let stats = IngestStats::default();
        let stamped = stamp_samples("n1", vec![wire_metric("", 1)], &stats);
        assert!(stamped.is_empty());
    }
}
