use crate::Collector;
use anyhow::Result;
use std::time::Duration;
use vigil_common::types::Sample;

/// Dedicated block-device collector. Declared for the collector plan but
/// not yet implemented; disk metrics currently come from the system
/// collector. Yields empty batches and never errors.
pub struct DiskCollector {
    interval: Duration,
}

impl DiskCollector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Collector for DiskCollector {
    fn name(&self) -> &str {
        "disk"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, _deadline: Duration) -> Result<Vec<Sample>> {
        Ok(Vec::new())
    }
}
