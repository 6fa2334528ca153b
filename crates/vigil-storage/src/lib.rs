//! Persistence layer for samples, node records, and alerts.
//!
//! The default implementation ([`engine::TimeSeriesStore`]) layers a narrow
//! ordered key-value interface ([`kv::KvStore`], SQLite with WAL) under an
//! order-preserving sample key encoding, so range scans by metric name walk
//! samples in time order. Node and alert records are point-keyed JSON.

pub mod codec;
pub mod engine;
pub mod error;
pub mod keys;
pub mod kv;

#[cfg(test)]
mod tests;

use error::Result;
use std::collections::HashMap;
use vigil_common::types::{Alert, AlertState, NodeRecord, Sample, TimeSeries};

/// Parameters for a range query over one metric.
///
/// `labels` are equality filters; a sample must match every entry. `step_ns`
/// is the downsampling bucket width (values below 1 are treated as 1).
#[derive(Debug, Clone)]
pub struct SampleQuery {
    pub metric_name: String,
    pub labels: HashMap<String, String>,
    pub start_ns: i64,
    pub end_ns: i64,
    pub step_ns: i64,
}

/// Filter for alert listings. Empty `states` means any state.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub states: Vec<AlertState>,
    pub node_id: Option<String>,
}

/// Persistence backend shared by the ingest path, the alert engine, and the
/// read API. Implementations synchronize internally; callers may invoke
/// them from any task, but one logical write batch must be a single call.
pub trait Storage: Send + Sync {
    /// Commits a batch of samples in one transaction. Samples that violate
    /// the stored-sample invariants (zero timestamp, empty node id) are
    /// skipped with a warning rather than poisoning the batch.
    fn write_samples(&self, samples: &[Sample]) -> Result<()>;

    /// Range-scans one metric, applies every label equality filter, and
    /// downsamples into `step_ns` buckets by arithmetic mean. Returns one
    /// series per canonical label set, samples ordered by bucket.
    ///
    /// Mean-within-bucket is the documented contract for every metric kind;
    /// a future version may dispatch on kind instead.
    fn query(&self, query: &SampleQuery) -> Result<Vec<TimeSeries>>;

    fn save_node(&self, node: &NodeRecord) -> Result<()>;
    fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>>;
    fn list_nodes(&self) -> Result<Vec<NodeRecord>>;
    /// Administrative removal. Returns false if the node was unknown.
    fn delete_node(&self, node_id: &str) -> Result<bool>;

    fn save_alert(&self, alert: &Alert) -> Result<()>;
    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;

    /// Deletes samples with `timestamp_ns < cutoff_ns`, in short
    /// transactions so writers and readers are never blocked for long.
    /// Node and alert records are never touched. Returns the number of
    /// samples removed.
    fn sweep_expired(&self, cutoff_ns: i64) -> Result<u64>;
}
