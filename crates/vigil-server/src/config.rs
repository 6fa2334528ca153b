use serde::Deserialize;
use vigil_alert::{AlertRule, CompareOp};
use vigil_common::types::Severity;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Samples older than this are removed by the hourly retention sweep.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// A healthy node with no heartbeat for this long turns unhealthy; at
    /// three times this it goes offline.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default)]
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertConfig {
    /// Extra rules on top of the built-in defaults.
    #[serde(default)]
    pub rules: Vec<AlertRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertRuleConfig {
    pub name: String,
    pub metric: String,
    pub operator: String,
    pub threshold: f64,
    #[serde(default)]
    pub for_seconds: u64,
    pub severity: String,
    #[serde(default = "default_rule_enabled")]
    pub enabled: bool,
}

impl AlertRuleConfig {
    pub fn to_rule(&self) -> anyhow::Result<AlertRule> {
        let operator: CompareOp = self
            .operator
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let severity: Severity = self
            .severity
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        Ok(AlertRule {
            name: self.name.clone(),
            metric_name: self.metric.clone(),
            operator,
            threshold: self.threshold,
            for_seconds: self.for_seconds,
            labels: Default::default(),
            annotations: Default::default(),
            severity,
            enabled: self.enabled,
        })
    }
}

fn default_grpc_port() -> u16 {
    9090
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_retention_hours() -> u64 {
    720
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn default_rule_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_port: default_grpc_port(),
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            retention_hours: default_retention_hours(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            alert: AlertConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: ServerConfig = toml::from_str("grpc_port = 7070").unwrap();
        assert_eq!(config.grpc_port, 7070);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.retention_hours, 720);
        assert_eq!(config.heartbeat_timeout_secs, 90);
    }

    #[test]
    fn alert_rules_parse_operators() {
        let config: ServerConfig = toml::from_str(
            r#"
            [[alert.rules]]
            name = "HighLoad"
            metric = "system.load_1"
            operator = ">="
            threshold = 8.0
            for_seconds = 60
            severity = "critical"
            "#,
        )
        .unwrap();
        let rule = config.alert.rules[0].to_rule().unwrap();
        assert_eq!(rule.operator, CompareOp::Ge);
        assert_eq!(rule.severity, Severity::Critical);
        assert!(rule.enabled);
    }

    #[test]
    fn bad_operator_is_rejected() {
        let rule = AlertRuleConfig {
            name: "x".into(),
            metric: "m".into(),
            operator: "~>".into(),
            threshold: 1.0,
            for_seconds: 0,
            severity: "warning".into(),
            enabled: true,
        };
        assert!(rule.to_rule().is_err());
    }
}
