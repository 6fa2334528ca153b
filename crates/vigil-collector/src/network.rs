use crate::Collector;
use anyhow::Result;
use std::time::Duration;
use vigil_common::types::Sample;

/// Dedicated network-flow collector. Declared for the collector plan but
/// not yet implemented; interface counters currently come from the system
/// collector. Yields empty batches and never errors.
pub struct NetworkCollector {
    interval: Duration,
}

impl NetworkCollector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        "network"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, _deadline: Duration) -> Result<Vec<Sample>> {
        Ok(Vec::new())
    }
}
