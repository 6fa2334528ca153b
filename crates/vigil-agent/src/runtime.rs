//! Collection driver: one timer task per enabled collector.
//!
//! Each tick invokes the collector with the interval as its deadline, tags
//! the batch with node and collector labels, and offers it to the uplink
//! queue without blocking. A full queue drops the batch and bumps the drop
//! counter; a slow tick is logged but intervals never compound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use vigil_collector::container::ContainerCollector;
use vigil_collector::disk::DiskCollector;
use vigil_collector::kubernetes::KubernetesCollector;
use vigil_collector::network::NetworkCollector;
use vigil_collector::process::ProcessCollector;
use vigil_collector::system::SystemCollector;
use vigil_collector::Collector;
use vigil_common::proto::CollectorConfig;
use vigil_common::types::Sample;

#[derive(Default)]
pub struct DriverStats {
    pub queue_drops: AtomicU64,
    pub collect_errors: AtomicU64,
}

/// Instantiates a collector from a plan entry. Unknown names are logged and
/// skipped so a newer server cannot break an older agent.
fn build_collector(entry: &CollectorConfig) -> Option<Box<dyn Collector>> {
    let interval = Duration::from_millis(entry.interval_ms.max(100) as u64);
    match entry.name.as_str() {
        "system" => Some(Box::new(SystemCollector::new(interval))),
        "process" => {
            let max_processes = entry
                .params
                .get("max_processes")
                .and_then(|v| v.parse().ok())
                .unwrap_or(100);
            Some(Box::new(ProcessCollector::new(interval, max_processes)))
        }
        "container" => Some(Box::new(ContainerCollector::new(interval))),
        "disk" => Some(Box::new(DiskCollector::new(interval))),
        "network" => Some(Box::new(NetworkCollector::new(interval))),
        "kubernetes" => Some(Box::new(KubernetesCollector::new(interval))),
        other => {
            tracing::warn!(collector = other, "Unknown collector in plan, skipping");
            None
        }
    }
}

/// Spawns a driver task per enabled plan entry. Tasks stop when the
/// shutdown channel fires.
pub fn spawn_collectors(
    plan: &[CollectorConfig],
    node_id: &str,
    tx: mpsc::Sender<Vec<Sample>>,
    shutdown: &broadcast::Sender<()>,
    stats: Arc<DriverStats>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for entry in plan {
        if !entry.enabled {
            continue;
        }
        let Some(collector) = build_collector(entry) else {
            continue;
        };
        if !collector.enabled() {
            tracing::info!(
                collector = collector.name(),
                "Collector disabled on this host"
            );
            continue;
        }

        tracing::info!(
            collector = collector.name(),
            interval_ms = entry.interval_ms,
            "Starting collector"
        );
        handles.push(tokio::spawn(run_collector(
            collector,
            node_id.to_string(),
            tx.clone(),
            shutdown.subscribe(),
            stats.clone(),
        )));
    }

    handles
}

async fn run_collector(
    mut collector: Box<dyn Collector>,
    node_id: String,
    tx: mpsc::Sender<Vec<Sample>>,
    mut shutdown: broadcast::Receiver<()>,
    stats: Arc<DriverStats>,
) {
    let period = collector.interval();
    let name = collector.name().to_string();
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(collector = %name, "Collector stopped");
                return;
            }
            _ = tick.tick() => {
                let started = Instant::now();
                let mut samples = match collector.collect(period) {
                    Ok(samples) => samples,
                    Err(e) => {
                        stats.collect_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(collector = %name, error = %e, "Collection failed");
                        continue;
                    }
                };
                if samples.is_empty() {
                    continue;
                }

                for sample in &mut samples {
                    sample
                        .labels
                        .insert("node".to_string(), node_id.clone());
                    sample
                        .labels
                        .insert("collector".to_string(), name.clone());
                }

                let count = samples.len();
                if tx.try_send(samples).is_err() {
                    let drops = stats.queue_drops.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        collector = %name,
                        samples = count,
                        drops,
                        "Uplink queue full, dropping batch"
                    );
                }

                let elapsed = started.elapsed();
                if elapsed > period {
                    tracing::warn!(
                        collector = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        interval_ms = period.as_millis() as u64,
                        "Collection exceeded its interval"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    struct TickCollector {
        ticks: u32,
    }

    impl Collector for TickCollector {
        fn name(&self) -> &str {
            "tick"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn collect(&mut self, _deadline: Duration) -> Result<Vec<Sample>> {
            self.ticks += 1;
            Ok(vec![Sample {
                metric_name: "tick.count".to_string(),
                value: self.ticks as f64,
                timestamp_ns: 1,
                labels: Default::default(),
                node_id: String::new(),
                kind: Default::default(),
                help: String::new(),
                unit: String::new(),
            }])
        }
    }

    #[tokio::test]
    async fn driver_stamps_node_and_collector_labels() {
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown, _) = broadcast::channel(1);
        let stats = Arc::new(DriverStats::default());

        let handle = tokio::spawn(run_collector(
            Box::new(TickCollector { ticks: 0 }),
            "n1".to_string(),
            tx,
            shutdown.subscribe(),
            stats,
        ));

        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].labels.get("node").unwrap(), "n1");
        assert_eq!(batch[0].labels.get("collector").unwrap(), "tick");

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_drops_batch_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown, _) = broadcast::channel(1);
        let stats = Arc::new(DriverStats::default());

        let handle = tokio::spawn(run_collector(
            Box::new(TickCollector { ticks: 0 }),
            "n1".to_string(),
            tx,
            shutdown.subscribe(),
            stats.clone(),
        ));

        // The receiver is never drained: capacity one, so from the second
        // batch onward everything drops.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.send(()).unwrap();
        handle.await.unwrap();

        assert!(stats.queue_drops.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn unknown_plan_entries_are_skipped() {
        let entry = CollectorConfig {
            name: "quantum".to_string(),
            enabled: true,
            interval_ms: 1000,
            params: Default::default(),
        };
        assert!(build_collector(&entry).is_none());
    }
}
