//! Metric collectors for the agent.
//!
//! A collector is a periodic producer of samples for one domain, pure with
//! respect to the transport layer: the driver loop owns scheduling, label
//! stamping, and delivery.

pub mod container;
pub mod disk;
pub mod kubernetes;
pub mod network;
pub mod process;
pub mod rate;
pub mod system;

use anyhow::Result;
use std::time::Duration;
use vigil_common::types::Sample;

pub trait Collector: Send {
    fn name(&self) -> &str;

    /// Whether this collector should run on this host at all.
    fn enabled(&self) -> bool {
        true
    }

    /// Default cadence; the server's collector plan may override it.
    fn interval(&self) -> Duration;

    /// Produces one batch. `deadline` is the time budget for this tick
    /// (normally the interval); collectors doing blocking I/O should stay
    /// within it. Errors are logged by the driver and the tick is skipped.
    fn collect(&mut self, deadline: Duration) -> Result<Vec<Sample>>;
}

/// Current wall clock in nanoseconds since the epoch, the sample timestamp
/// resolution used throughout.
pub fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
