use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node identity; empty means "use the host's hostname".
    #[serde(default)]
    pub node_id: String,
    pub server_endpoint: String,
    /// Enable TLS for the gRPC connection.
    #[serde(default)]
    pub tls: bool,
    /// Flush when this many samples are buffered.
    #[serde(default = "default_batch_size_max")]
    pub batch_size_max: usize,
    /// ... or when the oldest buffered sample is this old.
    #[serde(default = "default_max_batch_latency_ms")]
    pub max_batch_latency_ms: u64,
    /// Collector-to-uplink queue bound, in batches. Overflow drops the
    /// incoming batch.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Uplink-side sample buffer bound; overflow drops oldest-first while
    /// disconnected.
    #[serde(default = "default_buffer_max_samples")]
    pub buffer_max_samples: usize,
    /// Extra labels advertised at registration (e.g. `runtime = "docker"`).
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

fn default_batch_size_max() -> usize {
    1000
}

fn default_max_batch_latency_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_buffer_max_samples() -> usize {
    10_000
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        if config.server_endpoint.trim().is_empty() {
            anyhow::bail!("server_endpoint is required");
        }
        Ok(config)
    }

    /// Build the gRPC endpoint URI from server_endpoint and tls config.
    pub fn grpc_endpoint(&self) -> String {
        let addr = self.server_endpoint.trim();
        if addr.contains("://") {
            return addr.to_string();
        }
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{addr}")
    }

    /// The configured node id, falling back to the canonical hostname.
    pub fn resolve_node_id(&self) -> String {
        if !self.node_id.is_empty() {
            return self.node_id.clone();
        }
        sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_follows_tls_flag() {
        let mut config: AgentConfig =
            toml::from_str(r#"server_endpoint = "127.0.0.1:9090""#).unwrap();
        assert_eq!(config.grpc_endpoint(), "http://127.0.0.1:9090");
        config.tls = true;
        assert_eq!(config.grpc_endpoint(), "https://127.0.0.1:9090");
        config.server_endpoint = "https://mon.example.com".to_string();
        assert_eq!(config.grpc_endpoint(), "https://mon.example.com");
    }

    #[test]
    fn missing_node_id_falls_back_to_hostname() {
        let config: AgentConfig =
            toml::from_str(r#"server_endpoint = "127.0.0.1:9090""#).unwrap();
        assert!(!config.resolve_node_id().is_empty());

        let config: AgentConfig = toml::from_str(
            r#"
            node_id = "web-01"
            server_endpoint = "127.0.0.1:9090"
            "#,
        )
        .unwrap();
        assert_eq!(config.resolve_node_id(), "web-01");
    }

    #[test]
    fn defaults_are_applied() {
        let config: AgentConfig =
            toml::from_str(r#"server_endpoint = "127.0.0.1:9090""#).unwrap();
        assert_eq!(config.batch_size_max, 1000);
        assert_eq!(config.max_batch_latency_ms, 1000);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.buffer_max_samples, 10_000);
    }
}
