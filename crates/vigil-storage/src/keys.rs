//! Key encoding for the ordered keyspace.
//!
//! Sample keys are `metric:<name>:<timestamp>:<labels_hash>` with the
//! timestamp zero-padded to 19 decimal digits, so lexicographic key order
//! within one metric equals time order. Node and alert records are point
//! keys under their own prefixes.

use crate::error::{Result, StorageError};

pub const SAMPLE_PREFIX: &str = "metric:";
pub const NODE_PREFIX: &str = "node:";
pub const ALERT_PREFIX: &str = "alert:";

/// Width that fits every positive i64 nanosecond timestamp.
const TS_WIDTH: usize = 19;

pub fn sample_key(metric_name: &str, timestamp_ns: i64, labels_hash: &str) -> String {
    format!("{SAMPLE_PREFIX}{metric_name}:{timestamp_ns:0TS_WIDTH$}:{labels_hash}")
}

/// Prefix under which every sample of `metric_name` lives.
pub fn sample_prefix(metric_name: &str) -> String {
    format!("{SAMPLE_PREFIX}{metric_name}:")
}

/// Scan start key for samples of `metric_name` at or after `timestamp_ns`.
pub fn sample_seek(metric_name: &str, timestamp_ns: i64) -> String {
    format!("{SAMPLE_PREFIX}{metric_name}:{:0TS_WIDTH$}:", timestamp_ns.max(0))
}

pub fn node_key(node_id: &str) -> String {
    format!("{NODE_PREFIX}{node_id}")
}

pub fn alert_key(alert_id: &str) -> String {
    format!("{ALERT_PREFIX}{alert_id}")
}

#[derive(Debug, PartialEq, Eq)]
pub struct SampleKey {
    pub metric_name: String,
    pub timestamp_ns: i64,
    pub labels_hash: String,
}

/// Decodes a sample key. The metric name may itself contain `:`; the two
/// fixed-position fields are taken from the right.
pub fn parse_sample_key(key: &str) -> Result<SampleKey> {
    let malformed = || StorageError::MalformedKey {
        key: key.to_string(),
    };

    let rest = key.strip_prefix(SAMPLE_PREFIX).ok_or_else(malformed)?;
    let mut parts = rest.rsplitn(3, ':');
    let labels_hash = parts.next().ok_or_else(malformed)?;
    let ts_str = parts.next().ok_or_else(malformed)?;
    let metric_name = parts.next().ok_or_else(malformed)?;

    if metric_name.is_empty() || ts_str.len() != TS_WIDTH {
        return Err(malformed());
    }
    let timestamp_ns: i64 = ts_str.parse().map_err(|_| malformed())?;

    Ok(SampleKey {
        metric_name: metric_name.to_string(),
        timestamp_ns,
        labels_hash: labels_hash.to_string(),
    })
}
