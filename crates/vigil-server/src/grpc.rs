use crate::pipeline::{stamp_samples, IngestBatch};
use crate::session;
use crate::state::AppState;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tonic::{Request, Response, Status, Streaming};
use vigil_common::proto::monitor_service_server::MonitorService;
use vigil_common::proto::{
    CollectorConfig, ConfigAck, ConfigUpdate, HeartbeatRequest, HeartbeatResponse, MetricBatch,
    RegisterRequest, RegisterResponse, StreamSummary,
};
use vigil_common::types::{NodeRecord, NodeStatus};

/// How long a stream handler waits for a slot in the ingest queue before
/// failing the RPC instead of pinning the stream on a backlogged pipeline.
const INGEST_ENQUEUE_DEADLINE: Duration = Duration::from_secs(10);

pub struct MonitorServiceImpl {
    state: AppState,
}

impl MonitorServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// The collector plan handed to an agent at registration, derived from
    /// server defaults and the host properties the agent advertises.
    fn collector_plan(&self, req: &RegisterRequest) -> Vec<CollectorConfig> {
        let mut plan = vec![
            CollectorConfig {
                name: "system".to_string(),
                enabled: true,
                interval_ms: 1000,
                params: HashMap::from([
                    ("include_cpu".to_string(), "true".to_string()),
                    ("include_memory".to_string(), "true".to_string()),
                    ("include_disk".to_string(), "true".to_string()),
                ]),
            },
            CollectorConfig {
                name: "process".to_string(),
                enabled: true,
                interval_ms: 5000,
                params: HashMap::from([("max_processes".to_string(), "100".to_string())]),
            },
        ];

        if req.labels.get("runtime").map(String::as_str) == Some("docker") {
            plan.push(CollectorConfig {
                name: "container".to_string(),
                enabled: true,
                interval_ms: 2000,
                params: HashMap::from([("runtime".to_string(), "docker".to_string())]),
            });
        }

        plan
    }
}

#[tonic::async_trait]
impl MonitorService for MonitorServiceImpl {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        if req.node_id.is_empty() {
            return Err(Status::invalid_argument("node_id is required"));
        }

        tracing::info!(
            node_id = %req.node_id,
            hostname = %req.hostname,
            os = %req.os,
            "Node registration"
        );

        let now = Utc::now();
        let created_at = match self.state.storage.get_node(&req.node_id) {
            Ok(Some(existing)) => existing.created_at,
            Ok(None) => now,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load node record");
                now
            }
        };

        let node = NodeRecord {
            id: req.node_id.clone(),
            hostname: req.hostname.clone(),
            os: req.os.clone(),
            arch: req.arch.clone(),
            agent_version: req.agent_version.clone(),
            labels: req.labels.clone(),
            status: NodeStatus::Healthy,
            last_seen: now,
            created_at,
        };
        if let Err(e) = self.state.storage.save_node(&node) {
            tracing::error!(node_id = %req.node_id, error = %e, "Failed to save node");
        } else {
            self.state.bus.publish_node_status(&node);
        }

        let collectors = self.collector_plan(&req);
        let session = self.state.sessions.register(&req.node_id, collectors.clone());

        Ok(Response::new(RegisterResponse {
            success: true,
            message: "registration successful".to_string(),
            session_id: session.session_id,
            heartbeat_interval_seconds: self.state.config.heartbeat_interval_secs as i64,
            collectors,
        }))
    }

    async fn stream_metrics(
        &self,
        request: Request<Streaming<MetricBatch>>,
    ) -> Result<Response<StreamSummary>, Status> {
        let mut stream = request.into_inner();

        // The first frame authenticates the stream. An unknown session
        // produces no side effect of any kind.
        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("stream closed before first batch"))?;
        if first.session_id.is_empty() {
            return Err(Status::invalid_argument("session_id is required"));
        }
        let session = self
            .state
            .sessions
            .get(&first.session_id)
            .ok_or_else(|| Status::unauthenticated("invalid session"))?;

        let session_id = session.session_id.clone();
        let node_id = session.node_id.clone();
        tracing::info!(node_id = %node_id, session_id = %session_id, "Metric stream opened");

        let mut accepted: u64 = 0;
        let mut pending = Some(first);
        loop {
            let batch = match pending.take() {
                Some(batch) => batch,
                None => match stream.message().await {
                    Ok(Some(batch)) => batch,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::info!(
                            node_id = %node_id,
                            error = %e,
                            "Metric stream closed"
                        );
                        break;
                    }
                },
            };

            self.state.sessions.touch(&session_id);
            let samples = stamp_samples(&node_id, batch.samples, &self.state.ingest_stats);
            if samples.is_empty() {
                continue;
            }
            accepted += samples.len() as u64;

            // Bounded hand-off to the shared ingest worker; per-stream
            // frames stay sequential, so per-session order is preserved.
            let enqueue = self.state.ingest_tx.send(IngestBatch {
                node_id: node_id.clone(),
                samples,
            });
            match timeout(INGEST_ENQUEUE_DEADLINE, enqueue).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(Status::unavailable("ingest pipeline stopped"));
                }
                Err(_) => {
                    return Err(Status::deadline_exceeded("ingest pipeline backlogged"));
                }
            }
        }

        self.state.sessions.remove(&session_id);
        tracing::info!(node_id = %node_id, session_id = %session_id, accepted, "Metric stream done");
        Ok(Response::new(StreamSummary { accepted }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let Some(node_id) = self.state.sessions.touch(&req.session_id) else {
            return Err(Status::unauthenticated("invalid session"));
        };

        let now = Utc::now();
        if let Err(e) =
            session::mark_node_healthy(self.state.storage.as_ref(), &self.state.bus, &node_id, now)
        {
            tracing::error!(node_id = %node_id, error = %e, "Failed to update node on heartbeat");
        }

        let next = now + chrono::Duration::seconds(self.state.config.heartbeat_interval_secs as i64);
        Ok(Response::new(HeartbeatResponse {
            alive: true,
            next_heartbeat_epoch_seconds: next.timestamp(),
        }))
    }

    async fn update_config(
        &self,
        request: Request<ConfigUpdate>,
    ) -> Result<Response<ConfigAck>, Status> {
        let req = request.into_inner();
        if req.node_id.is_empty() {
            return Err(Status::invalid_argument("node_id is required"));
        }

        let updated = self
            .state
            .sessions
            .update_collectors(&req.node_id, &req.collectors);
        tracing::info!(
            node_id = %req.node_id,
            sessions = updated,
            restart_required = req.restart_required,
            "Config update received"
        );

        Ok(Response::new(ConfigAck {
            success: true,
            message: "configuration update acknowledged".to_string(),
        }))
    }
}
