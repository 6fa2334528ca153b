use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single numeric observation with metadata, as produced by a collector
/// and stored by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub metric_name: String,
    pub value: f64,
    /// Nanoseconds since the Unix epoch. Zero on submission means "stamp
    /// with receive time" at the ingest boundary.
    pub timestamp_ns: i64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Stamped by the server from the owning session; agents need not set it.
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
    Histogram,
    Summary,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Histogram => write!(f, "histogram"),
            MetricKind::Summary => write!(f, "summary"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            "histogram" => Ok(MetricKind::Histogram),
            "summary" => Ok(MetricKind::Summary),
            _ => Err(format!("unknown metric kind: {s}")),
        }
    }
}

impl MetricKind {
    /// Maps the wire enum; unknown values fall back to gauge, matching the
    /// tolerant decoding of the stored form.
    pub fn from_wire(v: i32) -> Self {
        match v {
            1 => MetricKind::Counter,
            2 => MetricKind::Histogram,
            3 => MetricKind::Summary,
            _ => MetricKind::Gauge,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            MetricKind::Gauge => 0,
            MetricKind::Counter => 1,
            MetricKind::Histogram => 2,
            MetricKind::Summary => 3,
        }
    }
}

/// A registered host. Created on first successful registration and only
/// removed by explicit administrative request; retention never touches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub agent_version: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub status: NodeStatus,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Unknown => write!(f, "unknown"),
            NodeStatus::Healthy => write!(f, "healthy"),
            NodeStatus::Degraded => write!(f, "degraded"),
            NodeStatus::Unhealthy => write!(f, "unhealthy"),
            NodeStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A materialized occurrence of an alert rule against a specific node.
///
/// At most one alert in a non-terminal state (pending or firing) exists per
/// `(node_id, rule_name)` pair at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_name: String,
    pub node_id: String,
    pub state: AlertState,
    /// Latest value that triggered (or resolved) the condition.
    pub value: f64,
    /// When the rule condition first held.
    pub active_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Inactive,
    Pending,
    Firing,
    Resolved,
}

impl AlertState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertState::Inactive | AlertState::Resolved)
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Inactive => write!(f, "inactive"),
            AlertState::Pending => write!(f, "pending"),
            AlertState::Firing => write!(f, "firing"),
            AlertState::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(AlertState::Inactive),
            "pending" => Ok(AlertState::Pending),
            "firing" => Ok(AlertState::Firing),
            "resolved" => Ok(AlertState::Resolved),
            _ => Err(format!("unknown alert state: {s}")),
        }
    }
}

/// One downsampled query result group: the samples sharing a canonical
/// label set, ordered by bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: HashMap<String, String>,
    pub samples: Vec<SamplePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub timestamp_ns: i64,
    pub value: f64,
}
