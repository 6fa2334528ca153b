use crate::engine::TimeSeriesStore;
use crate::{AlertFilter, SampleQuery, Storage};
use chrono::Utc;
use std::collections::HashMap;
use tempfile::TempDir;
use vigil_common::types::{
    Alert, AlertState, MetricKind, NodeRecord, NodeStatus, Sample, Severity,
};

fn setup() -> (TempDir, TimeSeriesStore) {
    let dir = TempDir::new().unwrap();
    let store = TimeSeriesStore::open(dir.path()).unwrap();
    (dir, store)
}

fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn sample(metric: &str, value: f64, ts_ns: i64, lbls: &[(&str, &str)]) -> Sample {
    Sample {
        metric_name: metric.to_string(),
        value,
        timestamp_ns: ts_ns,
        labels: labels(lbls),
        node_id: "n1".to_string(),
        kind: MetricKind::Gauge,
        help: String::new(),
        unit: String::new(),
    }
}

fn query(metric: &str, lbls: &[(&str, &str)], start: i64, end: i64, step: i64) -> SampleQuery {
    SampleQuery {
        metric_name: metric.to_string(),
        labels: labels(lbls),
        start_ns: start,
        end_ns: end,
        step_ns: step,
    }
}

#[test]
fn point_write_point_query() {
    let (_dir, store) = setup();
    let ts = 1_700_000_000_000_000_000;
    store
        .write_samples(&[sample("cpu", 42.0, ts, &[("collector", "system")])])
        .unwrap();

    let series = store
        .query(&query("cpu", &[("collector", "system")], ts, ts, 1))
        .unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples.len(), 1);
    assert_eq!(series[0].samples[0].timestamp_ns, ts);
    assert_eq!(series[0].samples[0].value, 42.0);
}

#[test]
fn bucket_mean_downsampling() {
    let (_dir, store) = setup();
    // Four samples inside one 10s bucket, one in the next.
    let base = 1_000_000_000_000;
    let step = 10_000_000_000i64;
    store
        .write_samples(&[
            sample("mem", 10.0, base + 1, &[]),
            sample("mem", 20.0, base + 2, &[]),
            sample("mem", 30.0, base + 3, &[]),
            sample("mem", 40.0, base + 4, &[]),
            sample("mem", 99.0, base + step, &[]),
        ])
        .unwrap();

    let series = store
        .query(&query("mem", &[], base, base + step, step))
        .unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples.len(), 2);
    assert_eq!(series[0].samples[0].value, 25.0);
    assert_eq!(series[0].samples[1].value, 99.0);
    assert!(series[0].samples[0].timestamp_ns < series[0].samples[1].timestamp_ns);
}

#[test]
fn all_label_filters_apply() {
    let (_dir, store) = setup();
    let ts = 5_000_000_000;
    store
        .write_samples(&[
            sample("net", 1.0, ts, &[("iface", "eth0"), ("dir", "rx")]),
            sample("net", 2.0, ts, &[("iface", "eth0"), ("dir", "tx")]),
            sample("net", 3.0, ts, &[("iface", "eth1"), ("dir", "rx")]),
        ])
        .unwrap();

    // Both filters must hold, not just the first.
    let series = store
        .query(&query(
            "net",
            &[("iface", "eth0"), ("dir", "rx")],
            0,
            ts * 2,
            1,
        ))
        .unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples[0].value, 1.0);

    // A single filter matches two series.
    let series = store
        .query(&query("net", &[("iface", "eth0")], 0, ts * 2, 1))
        .unwrap();
    assert_eq!(series.len(), 2);
}

#[test]
fn series_group_by_canonical_labels() {
    let (_dir, store) = setup();
    let ts = 7_000_000_000;
    store
        .write_samples(&[
            sample("disk", 1.0, ts, &[("mount", "/")]),
            sample("disk", 2.0, ts + 1, &[("mount", "/")]),
            sample("disk", 9.0, ts, &[("mount", "/data")]),
        ])
        .unwrap();

    let series = store.query(&query("disk", &[], 0, ts * 2, 1)).unwrap();
    assert_eq!(series.len(), 2);
    let root = series
        .iter()
        .find(|s| s.labels.get("mount").map(String::as_str) == Some("/"))
        .unwrap();
    assert_eq!(root.samples.len(), 2);
}

#[test]
fn time_range_is_inclusive_and_bounded() {
    let (_dir, store) = setup();
    store
        .write_samples(&[
            sample("m", 1.0, 100, &[]),
            sample("m", 2.0, 200, &[]),
            sample("m", 3.0, 300, &[]),
        ])
        .unwrap();

    let series = store.query(&query("m", &[], 100, 200, 1)).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples.len(), 2);
}

#[test]
fn prefix_sharing_metric_names_stay_separate() {
    let (_dir, store) = setup();
    store
        .write_samples(&[
            sample("app:requests", 1.0, 100, &[]),
            sample("app:requests:errors", 7.0, 100, &[]),
        ])
        .unwrap();

    let series = store.query(&query("app:requests", &[], 0, 200, 1)).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples[0].value, 1.0);
}

#[test]
fn unstamped_samples_are_not_stored() {
    let (_dir, store) = setup();
    let mut bad_ts = sample("m", 1.0, 0, &[]);
    bad_ts.timestamp_ns = 0;
    let mut bad_node = sample("m", 2.0, 100, &[]);
    bad_node.node_id = String::new();
    store
        .write_samples(&[bad_ts, bad_node, sample("m", 3.0, 100, &[])])
        .unwrap();

    let series = store.query(&query("m", &[], 0, 1_000, 1)).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples.len(), 1);
    assert_eq!(series[0].samples[0].value, 3.0);
}

#[test]
fn retention_sweep_removes_only_expired_samples() {
    let (_dir, store) = setup();
    let old_ts = 1_000;
    let new_ts = 2_000_000;
    store
        .write_samples(&[
            sample("cpu", 1.0, old_ts, &[]),
            sample("cpu", 2.0, new_ts, &[]),
        ])
        .unwrap();

    let node = NodeRecord {
        id: "n1".to_string(),
        hostname: "host".to_string(),
        os: "linux".to_string(),
        arch: "x86_64".to_string(),
        agent_version: "0.3.0".to_string(),
        labels: HashMap::new(),
        status: NodeStatus::Healthy,
        last_seen: Utc::now(),
        created_at: Utc::now(),
    };
    store.save_node(&node).unwrap();

    let removed = store.sweep_expired(old_ts + 1).unwrap();
    assert_eq!(removed, 1);

    // The expired sample is gone and never observable again.
    let series = store.query(&query("cpu", &[], 0, new_ts, 1)).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].samples.len(), 1);
    assert_eq!(series[0].samples[0].value, 2.0);

    // Retention never touches node records.
    assert!(store.get_node("n1").unwrap().is_some());

    // A second sweep finds nothing.
    assert_eq!(store.sweep_expired(old_ts + 1).unwrap(), 0);
}

#[test]
fn node_records_roundtrip() {
    let (_dir, store) = setup();
    let mut node = NodeRecord {
        id: "web-01".to_string(),
        hostname: "web-01.internal".to_string(),
        os: "linux".to_string(),
        arch: "aarch64".to_string(),
        agent_version: "0.3.0".to_string(),
        labels: labels(&[("zone", "eu")]),
        status: NodeStatus::Healthy,
        last_seen: Utc::now(),
        created_at: Utc::now(),
    };
    store.save_node(&node).unwrap();

    let loaded = store.get_node("web-01").unwrap().unwrap();
    assert_eq!(loaded.hostname, "web-01.internal");
    assert_eq!(loaded.status, NodeStatus::Healthy);

    node.status = NodeStatus::Offline;
    store.save_node(&node).unwrap();
    assert_eq!(
        store.get_node("web-01").unwrap().unwrap().status,
        NodeStatus::Offline
    );

    assert_eq!(store.list_nodes().unwrap().len(), 1);
    assert!(store.delete_node("web-01").unwrap());
    assert!(store.get_node("web-01").unwrap().is_none());
}

#[test]
fn alert_listing_filters_by_state_and_node() {
    let (_dir, store) = setup();
    let now = Utc::now();
    let mk = |id: &str, node: &str, state: AlertState| Alert {
        id: id.to_string(),
        rule_name: "HighCPUUsage".to_string(),
        node_id: node.to_string(),
        state,
        value: 91.0,
        active_at: now,
        resolved_at: None,
        labels: HashMap::new(),
        annotations: HashMap::new(),
        severity: Severity::Warning,
    };
    store.save_alert(&mk("a1", "n1", AlertState::Firing)).unwrap();
    store.save_alert(&mk("a2", "n1", AlertState::Resolved)).unwrap();
    store.save_alert(&mk("a3", "n2", AlertState::Pending)).unwrap();

    let all = store.list_alerts(&AlertFilter::default()).unwrap();
    assert_eq!(all.len(), 3);

    let active = store
        .list_alerts(&AlertFilter {
            states: vec![AlertState::Pending, AlertState::Firing],
            node_id: None,
        })
        .unwrap();
    assert_eq!(active.len(), 2);

    let n1 = store
        .list_alerts(&AlertFilter {
            states: vec![],
            node_id: Some("n1".to_string()),
        })
        .unwrap();
    assert_eq!(n1.len(), 2);
}
