use crate::{now_ns, Collector};
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use vigil_common::types::{MetricKind, Sample};

/// Per-process CPU and memory for the heaviest processes by CPU, bounded by
/// `max_processes` to keep batch sizes predictable.
pub struct ProcessCollector {
    interval: Duration,
    max_processes: usize,
    sys: System,
}

impl ProcessCollector {
    pub fn new(interval: Duration, max_processes: usize) -> Self {
        Self {
            interval,
            max_processes,
            sys: System::new(),
        }
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, _deadline: Duration) -> Result<Vec<Sample>> {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        let now = now_ns();

        let mut procs: Vec<_> = self.sys.processes().values().collect();
        procs.sort_by(|a, b| b.cpu_usage().total_cmp(&a.cpu_usage()));

        let mut points = Vec::with_capacity(self.max_processes * 2 + 1);
        points.push(Sample {
            metric_name: "process.count".to_string(),
            value: procs.len() as f64,
            timestamp_ns: now,
            labels: HashMap::new(),
            node_id: String::new(),
            kind: MetricKind::Gauge,
            help: String::new(),
            unit: String::new(),
        });

        for proc in procs.into_iter().take(self.max_processes) {
            let mut labels = HashMap::new();
            labels.insert("pid".to_string(), proc.pid().to_string());
            labels.insert(
                "name".to_string(),
                proc.name().to_string_lossy().to_string(),
            );

            points.push(Sample {
                metric_name: "process.cpu_percent".to_string(),
                value: proc.cpu_usage() as f64,
                timestamp_ns: now,
                labels: labels.clone(),
                node_id: String::new(),
                kind: MetricKind::Gauge,
                help: String::new(),
                unit: String::new(),
            });
            points.push(Sample {
                metric_name: "process.memory_bytes".to_string(),
                value: proc.memory() as f64,
                timestamp_ns: now,
                labels,
                node_id: String::new(),
                kind: MetricKind::Gauge,
                help: String::new(),
                unit: String::new(),
            });
        }

        Ok(points)
    }
}
