//! Threshold alerting over incoming samples.
//!
//! The engine keeps the declarative rule set and an in-memory table of
//! non-terminal alerts keyed by `(node_id, rule_name)`, and drives the
//! pending/firing/resolved lifecycle edge-triggered by each sample.

pub mod defaults;
pub mod engine;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vigil_common::types::Severity;

/// A declarative alert trigger. `name` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    /// Seconds the condition must hold before the alert fires; zero fires
    /// on the first breaching sample.
    #[serde(default)]
    pub for_seconds: u64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub severity: Severity,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    pub fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Ge => value >= threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Le => value <= threshold,
            CompareOp::Eq => value == threshold,
            CompareOp::Ne => value != threshold,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}
