use crate::engine::{AlertEngine, AlertSignal};
use crate::{AlertRule, CompareOp};
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use vigil_common::types::{AlertState, MetricKind, Sample, Severity};

fn rule(name: &str, metric: &str, threshold: f64, for_seconds: u64) -> AlertRule {
    AlertRule {
        name: name.to_string(),
        metric_name: metric.to_string(),
        operator: CompareOp::Gt,
        threshold,
        for_seconds,
        labels: HashMap::new(),
        annotations: HashMap::new(),
        severity: Severity::Warning,
        enabled: true,
    }
}

fn sample(node: &str, metric: &str, value: f64) -> Sample {
    Sample {
        metric_name: metric.to_string(),
        value,
        timestamp_ns: 1,
        labels: HashMap::new(),
        node_id: node.to_string(),
        kind: MetricKind::Gauge,
        help: String::new(),
        unit: String::new(),
    }
}

#[test]
fn zero_duration_fires_on_first_breach() {
    let mut engine = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 0)]);
    let now = Utc::now();

    let updates = engine.ingest(&sample("n1", "cpu", 91.0), now);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].alert.state, AlertState::Firing);
    assert_eq!(updates[0].signal, AlertSignal::Fired);
    assert_eq!(updates[0].alert.labels.get("node").unwrap(), "n1");
    assert_eq!(updates[0].alert.labels.get("metric").unwrap(), "cpu");
}

#[test]
fn pending_qualifies_after_for_duration() {
    let mut engine = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 2)]);
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    // t=0: below threshold, nothing happens.
    assert!(engine.ingest(&sample("n1", "cpu", 50.0), t0).is_empty());

    // t=1: first breach opens a pending alert, no notification.
    let updates = engine.ingest(&sample("n1", "cpu", 90.0), t0 + Duration::seconds(1));
    assert_eq!(updates[0].alert.state, AlertState::Pending);
    assert_eq!(updates[0].signal, AlertSignal::None);

    // t=2: still pending, one second held out of two.
    let updates = engine.ingest(&sample("n1", "cpu", 92.0), t0 + Duration::seconds(2));
    assert_eq!(updates[0].alert.state, AlertState::Pending);
    assert_eq!(updates[0].signal, AlertSignal::None);

    // t=3: condition held for >= 2s, fires exactly once.
    let updates = engine.ingest(&sample("n1", "cpu", 93.0), t0 + Duration::seconds(3));
    assert_eq!(updates[0].alert.state, AlertState::Firing);
    assert_eq!(updates[0].signal, AlertSignal::Fired);
    assert_eq!(updates[0].alert.value, 93.0);

    // t=4: back below threshold, resolves with a resolution notification.
    let updates = engine.ingest(&sample("n1", "cpu", 10.0), t0 + Duration::seconds(4));
    assert_eq!(updates[0].alert.state, AlertState::Resolved);
    assert_eq!(updates[0].signal, AlertSignal::Resolved);
    assert!(updates[0].alert.resolved_at.is_some());

    assert!(engine.active_alerts().is_empty());
}

#[test]
fn pending_break_sends_no_notification() {
    let mut engine = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 60)]);
    let t0 = Utc::now();

    engine.ingest(&sample("n1", "cpu", 90.0), t0);
    assert_eq!(engine.active_alerts().len(), 1);

    // Breaks before qualifying: entry retired, signal stays silent.
    let updates = engine.ingest(&sample("n1", "cpu", 10.0), t0 + Duration::seconds(5));
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].alert.state, AlertState::Inactive);
    assert_eq!(updates[0].signal, AlertSignal::None);
    assert!(engine.active_alerts().is_empty());
}

#[test]
fn firing_updates_value_without_renotifying() {
    let mut engine = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 0)]);
    let t0 = Utc::now();

    let first = engine.ingest(&sample("n1", "cpu", 85.0), t0);
    assert_eq!(first[0].signal, AlertSignal::Fired);
    let id = first[0].alert.id.clone();

    let second = engine.ingest(&sample("n1", "cpu", 95.0), t0 + Duration::seconds(1));
    assert_eq!(second[0].signal, AlertSignal::None);
    assert_eq!(second[0].alert.id, id);
    assert_eq!(second[0].alert.value, 95.0);
}

#[test]
fn at_most_one_active_alert_per_node_and_rule() {
    let mut engine = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 0)]);
    let t0 = Utc::now();

    for i in 0..5 {
        engine.ingest(&sample("n1", "cpu", 90.0), t0 + Duration::seconds(i));
        engine.ingest(&sample("n2", "cpu", 90.0), t0 + Duration::seconds(i));
    }
    // One per node, not one per breaching sample.
    assert_eq!(engine.active_alerts().len(), 2);
}

#[test]
fn disabled_rules_are_skipped() {
    let mut disabled = rule("HighCPU", "cpu", 80.0, 0);
    disabled.enabled = false;
    let mut engine = AlertEngine::new(vec![disabled]);

    assert!(engine.ingest(&sample("n1", "cpu", 99.0), Utc::now()).is_empty());
}

#[test]
fn rules_match_on_metric_name() {
    let mut engine = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 0)]);
    assert!(engine.ingest(&sample("n1", "memory", 99.0), Utc::now()).is_empty());
}

#[test]
fn rehydration_preserves_firing_state() {
    let mut engine = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 0)]);
    let t0 = Utc::now();
    let fired = engine.ingest(&sample("n1", "cpu", 90.0), t0);

    // Simulate a restart: a fresh engine rehydrated from storage.
    let mut restarted = AlertEngine::new(vec![rule("HighCPU", "cpu", 80.0, 0)]);
    restarted.rehydrate(vec![fired[0].alert.clone()]);
    assert_eq!(restarted.active_alerts().len(), 1);

    // The rehydrated alert resolves instead of re-firing.
    let updates = restarted.ingest(&sample("n1", "cpu", 10.0), t0 + Duration::seconds(1));
    assert_eq!(updates[0].signal, AlertSignal::Resolved);
    assert_eq!(updates[0].alert.id, fired[0].alert.id);
}

#[test]
fn comparison_operators() {
    assert!(CompareOp::Gt.check(2.0, 1.0));
    assert!(!CompareOp::Gt.check(1.0, 1.0));
    assert!(CompareOp::Ge.check(1.0, 1.0));
    assert!(CompareOp::Lt.check(0.5, 1.0));
    assert!(CompareOp::Le.check(1.0, 1.0));
    assert!(CompareOp::Eq.check(1.0, 1.0));
    assert!(CompareOp::Ne.check(2.0, 1.0));

    let parsed: CompareOp = ">=".parse().unwrap();
    assert_eq!(parsed, CompareOp::Ge);
    assert_eq!(CompareOp::Ne.to_string(), "!=");
}
