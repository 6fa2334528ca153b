use crate::{AlertRule, CompareOp};
use std::collections::HashMap;
use vigil_common::types::Severity;

fn annotations(summary: &str, description: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("summary".to_string(), summary.to_string());
    map.insert("description".to_string(), description.to_string());
    map
}

fn system_labels() -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("category".to_string(), "system".to_string());
    map
}

/// Built-in rule set loaded when no rules are configured, so the system
/// alerts meaningfully out of the box.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            name: "HighCPUUsage".to_string(),
            metric_name: "cpu.usage".to_string(),
            operator: CompareOp::Gt,
            threshold: 80.0,
            for_seconds: 120,
            labels: system_labels(),
            annotations: annotations("High CPU usage detected", "CPU usage is above 80%"),
            severity: Severity::Warning,
            enabled: true,
        },
        AlertRule {
            name: "HighMemoryUsage".to_string(),
            metric_name: "memory.used_percent".to_string(),
            operator: CompareOp::Gt,
            threshold: 90.0,
            for_seconds: 120,
            labels: system_labels(),
            annotations: annotations("High memory usage detected", "Memory usage is above 90%"),
            severity: Severity::Warning,
            enabled: true,
        },
        AlertRule {
            name: "LowDiskSpace".to_string(),
            metric_name: "disk.used_percent".to_string(),
            operator: CompareOp::Gt,
            threshold: 85.0,
            for_seconds: 300,
            labels: system_labels(),
            annotations: annotations("Low disk space", "Disk usage is above 85%"),
            severity: Severity::Warning,
            enabled: true,
        },
    ]
}
