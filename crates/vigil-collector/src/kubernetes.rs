use crate::Collector;
use anyhow::Result;
use std::time::Duration;
use vigil_common::types::Sample;

/// Kubernetes pod/workload collector. Declared for the collector plan but
/// not yet implemented. Yields empty batches and never errors.
pub struct KubernetesCollector {
    interval: Duration,
}

impl KubernetesCollector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Collector for KubernetesCollector {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn enabled(&self) -> bool {
        false
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, _deadline: Duration) -> Result<Vec<Sample>> {
        Ok(Vec::new())
    }
}
