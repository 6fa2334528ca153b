use crate::AlertRule;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use vigil_common::types::{Alert, AlertState, Sample};

/// An alert is keyed by the node it concerns and the rule that produced it.
type AlertKey = (String, String);

/// What the ingest path should do with a transitioned alert. Every update
/// must be persisted; `Fired` and `Resolved` additionally dispatch a
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSignal {
    None,
    Fired,
    Resolved,
}

#[derive(Debug, Clone)]
pub struct AlertUpdate {
    pub alert: Alert,
    pub signal: AlertSignal,
}

pub struct AlertEngine {
    rules: HashMap<String, AlertRule>,
    /// Non-terminal alerts. Invariant: at most one entry per key, so at
    /// most one pending/firing alert exists per (node, rule).
    active: HashMap<AlertKey, Alert>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.name.clone(), r)).collect(),
            active: HashMap::new(),
        }
    }

    /// Restores non-terminal alerts persisted before a restart, preserving
    /// the pending/firing distinction.
    pub fn rehydrate(&mut self, alerts: Vec<Alert>) {
        for alert in alerts {
            if alert.state.is_terminal() {
                continue;
            }
            let key = (alert.node_id.clone(), alert.rule_name.clone());
            self.active.insert(key, alert);
        }
        if !self.active.is_empty() {
            tracing::info!(count = self.active.len(), "Rehydrated active alerts");
        }
    }

    pub fn rules(&self) -> Vec<&AlertRule> {
        self.rules.values().collect()
    }

    pub fn upsert_rule(&mut self, rule: AlertRule) {
        self.rules.insert(rule.name.clone(), rule);
    }

    /// Returns true if the rule existed. Active alerts for the rule are
    /// left to resolve through normal evaluation or restart.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        self.rules.remove(name).is_some()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.values().cloned().collect()
    }

    /// Evaluates one sample against every enabled rule for its metric and
    /// applies the lifecycle transitions. Returned updates carry the alert
    /// snapshot to persist and whether to notify.
    pub fn ingest(&mut self, sample: &Sample, now: DateTime<Utc>) -> Vec<AlertUpdate> {
        let mut updates = Vec::new();

        let matching: Vec<AlertRule> = self
            .rules
            .values()
            .filter(|r| r.enabled && r.metric_name == sample.metric_name)
            .cloned()
            .collect();

        for rule in matching {
            let holds = rule.operator.check(sample.value, rule.threshold);
            let key = (sample.node_id.clone(), rule.name.clone());
            let current = self.active.get(&key).map(|a| a.state);

            match (current, holds) {
                (None, false) => {}
                (None, true) => {
                    let state = if rule.for_seconds > 0 {
                        AlertState::Pending
                    } else {
                        AlertState::Firing
                    };
                    let alert = new_alert(&rule, sample, state, now);
                    self.active.insert(key, alert.clone());
                    let signal = if state == AlertState::Firing {
                        tracing::warn!(
                            rule = %rule.name,
                            node = %sample.node_id,
                            value = sample.value,
                            "Alert firing"
                        );
                        AlertSignal::Fired
                    } else {
                        tracing::debug!(
                            rule = %rule.name,
                            node = %sample.node_id,
                            for_seconds = rule.for_seconds,
                            "Alert pending"
                        );
                        AlertSignal::None
                    };
                    updates.push(AlertUpdate { alert, signal });
                }
                (Some(AlertState::Pending), true) => {
                    let Some(alert) = self.active.get_mut(&key) else {
                        continue;
                    };
                    alert.value = sample.value;
                    let qualified = now - alert.active_at
                        >= Duration::seconds(rule.for_seconds as i64);
                    let signal = if qualified {
                        alert.state = AlertState::Firing;
                        tracing::warn!(
                            rule = %rule.name,
                            node = %sample.node_id,
                            value = sample.value,
                            "Alert firing"
                        );
                        AlertSignal::Fired
                    } else {
                        AlertSignal::None
                    };
                    updates.push(AlertUpdate {
                        alert: alert.clone(),
                        signal,
                    });
                }
                (Some(_), true) => {
                    // Already firing; track the latest value, no re-notify.
                    let Some(alert) = self.active.get_mut(&key) else {
                        continue;
                    };
                    alert.value = sample.value;
                    updates.push(AlertUpdate {
                        alert: alert.clone(),
                        signal: AlertSignal::None,
                    });
                }
                (Some(AlertState::Pending), false) => {
                    // Condition broke before qualifying; the entry is
                    // retired without a notification.
                    let Some(mut alert) = self.active.remove(&key) else {
                        continue;
                    };
                    alert.state = AlertState::Inactive;
                    alert.value = sample.value;
                    updates.push(AlertUpdate {
                        alert,
                        signal: AlertSignal::None,
                    });
                }
                (Some(_), false) => {
                    let Some(mut alert) = self.active.remove(&key) else {
                        continue;
                    };
                    alert.state = AlertState::Resolved;
                    alert.resolved_at = Some(now);
                    alert.value = sample.value;
                    tracing::info!(
                        rule = %rule.name,
                        node = %sample.node_id,
                        "Alert resolved"
                    );
                    updates.push(AlertUpdate {
                        alert,
                        signal: AlertSignal::Resolved,
                    });
                }
            }
        }

        updates
    }
}

fn new_alert(rule: &AlertRule, sample: &Sample, state: AlertState, now: DateTime<Utc>) -> Alert {
    let mut labels = rule.labels.clone();
    labels.insert("node".to_string(), sample.node_id.clone());
    labels.insert("metric".to_string(), sample.metric_name.clone());

    Alert {
        id: vigil_common::id::alert_id(),
        rule_name: rule.name.clone(),
        node_id: sample.node_id.clone(),
        state,
        value: sample.value,
        active_at: now,
        resolved_at: None,
        labels,
        annotations: rule.annotations.clone(),
        severity: rule.severity,
    }
}
