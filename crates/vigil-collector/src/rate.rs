//! Delta-rate conversion for cumulative counters.
//!
//! Each cumulative source (a NIC's byte count, a block device's read ops, a
//! CPU's time in a mode) is tracked by a fully qualified identifier so that
//! devices appearing and disappearing never cross-contaminate. On a counter
//! reset (value went backwards) the cache re-anchors and no rate is emitted
//! for that tick.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Observation {
    value: f64,
    timestamp_ns: i64,
}

#[derive(Debug, Default)]
pub struct RateTracker {
    last: HashMap<String, Observation>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation and returns the per-second rate since the
    /// previous one, or `None` on the first observation, on a counter
    /// reset, or when time has not advanced.
    pub fn observe(&mut self, source: &str, value: f64, timestamp_ns: i64) -> Option<f64> {
        let prev = self.last.insert(
            source.to_string(),
            Observation {
                value,
                timestamp_ns,
            },
        )?;

        if value < prev.value || timestamp_ns <= prev.timestamp_ns {
            return None;
        }
        let elapsed_secs = (timestamp_ns - prev.timestamp_ns) as f64 / 1e9;
        Some((value - prev.value) / elapsed_secs)
    }

    /// Drops cached observations for sources not seen any more, so a
    /// re-plugged device starts from a clean slate.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: Fn(&str) -> bool,
    {
        self.last.retain(|source, _| keep(source));
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
