mod config;
mod runtime;
mod uplink;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;
use vigil_collector::container;

use config::AgentConfig;
use uplink::{HostFacts, Uplink};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let config = AgentConfig::load(&config_path)?;

    let node_id = config.resolve_node_id();
    tracing::info!(node_id = %node_id, server = %config.server_endpoint, "vigil-agent starting");

    let mut labels = config.labels.clone();
    if container::runtime_available() {
        labels
            .entry("runtime".to_string())
            .or_insert_with(|| "docker".to_string());
    }
    let facts = HostFacts {
        node_id: node_id.clone(),
        hostname: sysinfo::System::host_name().unwrap_or_else(|| node_id.clone()),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        labels,
    };

    // Shutdown fan-out: ctrl-c flips every task.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
            let _ = shutdown_tx.send(());
        });
    }

    // Register (retrying until the server is reachable) to obtain the
    // session and the collector plan.
    let mut shutdown_rx = shutdown_tx.subscribe();
    let Some((uplink, registration)) = Uplink::connect(
        config.grpc_endpoint(),
        facts,
        config.batch_size_max,
        Duration::from_millis(config.max_batch_latency_ms),
        config.buffer_max_samples,
        &mut shutdown_rx,
    )
    .await
    else {
        // Interrupted before ever connecting: clean exit.
        return Ok(());
    };

    // Collector tasks feed the uplink queue; overflow drops with a counter.
    let (sample_tx, sample_rx) = mpsc::channel(config.queue_capacity.max(1));
    let stats = Arc::new(runtime::DriverStats::default());
    let collector_handles = runtime::spawn_collectors(
        &registration.collectors,
        &node_id,
        sample_tx,
        &shutdown_tx,
        stats.clone(),
    );
    if collector_handles.is_empty() {
        tracing::warn!("Server plan enabled no collectors on this host");
    }

    uplink.run(sample_rx, shutdown_tx.subscribe()).await;

    for handle in collector_handles {
        handle.await.ok();
    }
    tracing::info!(
        queue_drops = stats.queue_drops.load(std::sync::atomic::Ordering::Relaxed),
        "Agent stopped"
    );

    Ok(())
}
