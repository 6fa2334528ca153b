use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio::time::{interval, Duration};
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;
use vigil_alert::engine::AlertEngine;
use vigil_common::proto::monitor_service_server::MonitorServiceServer;
use vigil_notify::{Dispatcher, LogSink};
use vigil_storage::engine::TimeSeriesStore;
use vigil_storage::{AlertFilter, Storage};

use vigil_server::bus::LiveBus;
use vigil_server::config::ServerConfig;
use vigil_server::pipeline;
use vigil_server::session::{NodeLivenessSweeper, SessionRegistry};
use vigil_server::state::AppState;
use vigil_server::{api, grpc};

#[tokio::main]
async fn main() -> Result<()> {
    vigil_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;

    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!(
        grpc_port = config.grpc_port,
        http_port = config.http_port,
        data_dir = %config.data_dir,
        retention_hours = config.retention_hours,
        "vigil-server starting"
    );

    let storage: Arc<dyn Storage> =
        Arc::new(TimeSeriesStore::open(Path::new(&config.data_dir))?);

    let (bus, _bus_worker) = LiveBus::start();

    // Alert rules: built-in defaults plus any configured extras; bad config
    // rules are a startup failure, not a silent skip.
    let mut rules = vigil_alert::defaults::default_rules();
    for rule in &config.alert.rules {
        rules.push(rule.to_rule()?);
    }
    let mut engine = AlertEngine::new(rules);
    let active = storage.list_alerts(&AlertFilter {
        states: vec![
            vigil_common::types::AlertState::Pending,
            vigil_common::types::AlertState::Firing,
        ],
        node_id: None,
    })?;
    engine.rehydrate(active);
    let alert_engine = Arc::new(Mutex::new(engine));

    let (dispatcher, _dispatch_worker) = Dispatcher::spawn(vec![Arc::new(LogSink)]);

    let (ingest, _ingest_worker) = pipeline::spawn(
        storage.clone(),
        alert_engine.clone(),
        dispatcher.clone(),
        bus.clone(),
    );

    let sessions = Arc::new(SessionRegistry::new(config.heartbeat_timeout_secs));
    let config = Arc::new(config);

    let state = AppState {
        storage: storage.clone(),
        sessions: sessions.clone(),
        alert_engine,
        dispatcher,
        bus: bus.clone(),
        ingest_tx: ingest.tx.clone(),
        ingest_stats: ingest.stats.clone(),
        config: config.clone(),
        start_time: Utc::now(),
    };

    // Hourly retention sweep.
    let retention_storage = storage.clone();
    let retention_hours = config.retention_hours;
    let retention_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            let cutoff = Utc::now() - chrono::Duration::hours(retention_hours as i64);
            let cutoff_ns = cutoff.timestamp_nanos_opt().unwrap_or_default();
            match retention_storage.sweep_expired(cutoff_ns) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Retention sweep removed expired samples")
                }
                Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                _ => {}
            }
        }
    });

    // Node liveness sweep.
    let sweeper = NodeLivenessSweeper::new(
        sessions.clone(),
        storage.clone(),
        bus.clone(),
        config.heartbeat_timeout_secs,
    );
    let liveness_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(30));
        loop {
            tick.tick().await;
            if let Err(e) = sweeper.sweep_once(Utc::now()) {
                tracing::error!(error = %e, "Node liveness sweep failed");
            }
        }
    });

    // gRPC ingest surface. Keepalive bounds dead connections server-side
    // without cutting long-lived metric streams.
    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", config.grpc_port).parse()?;
    let grpc_service = MonitorServiceServer::new(grpc::MonitorServiceImpl::new(state.clone()));
    let grpc_server = TonicServer::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(10)))
        .add_service(grpc_service)
        .serve(grpc_addr);

    // HTTP read path + live subscriptions.
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, api::build_router(state.clone()));

    tracing::info!(grpc = %grpc_addr, http = %http_addr, "Server started");

    tokio::select! {
        result = grpc_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server error");
            }
        }
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    retention_handle.abort();
    liveness_handle.abort();
    tracing::info!("Server stopped");

    Ok(())
}
