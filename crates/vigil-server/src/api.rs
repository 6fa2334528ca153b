//! Thin REST read path over the storage interface, consumed by the
//! dashboard and CLI.

use crate::state::AppState;
use crate::ws;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};
use vigil_common::types::AlertState;
use vigil_storage::{AlertFilter, SampleQuery};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/nodes", get(list_nodes))
        .route("/v1/nodes/summary", get(node_summary))
        .route("/v1/nodes/:id", get(get_node).delete(delete_node))
        .route("/v1/alerts", get(list_alerts))
        .route("/v1/query", get(query_samples))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "Request failed");
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    node_count: usize,
    session_count: usize,
    ingest_storage_failures: u64,
    bus_dropped: u64,
}

async fn health(State(state): State<AppState>) -> Response {
    let node_count = match state.storage.list_nodes() {
        Ok(nodes) => nodes.len(),
        Err(e) => return internal(e),
    };
    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        node_count,
        session_count: state.sessions.session_count(),
        ingest_storage_failures: state
            .ingest_stats
            .storage_failures
            .load(std::sync::atomic::Ordering::Relaxed),
        bus_dropped: state.bus.dropped_count(),
    })
    .into_response()
}

async fn list_nodes(State(state): State<AppState>) -> Response {
    match state.storage.list_nodes() {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Default, Serialize)]
struct NodeSummary {
    total: usize,
    healthy: usize,
    unhealthy: usize,
    offline: usize,
    unknown: usize,
}

async fn node_summary(State(state): State<AppState>) -> Response {
    let nodes = match state.storage.list_nodes() {
        Ok(nodes) => nodes,
        Err(e) => return internal(e),
    };
    let mut summary = NodeSummary {
        total: nodes.len(),
        ..Default::default()
    };
    for node in &nodes {
        match node.status {
            vigil_common::types::NodeStatus::Healthy => summary.healthy += 1,
            vigil_common::types::NodeStatus::Unhealthy
            | vigil_common::types::NodeStatus::Degraded => summary.unhealthy += 1,
            vigil_common::types::NodeStatus::Offline => summary.offline += 1,
            vigil_common::types::NodeStatus::Unknown => summary.unknown += 1,
        }
    }
    Json(summary).into_response()
}

async fn get_node(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.storage.get_node(&id) {
        Ok(Some(node)) => Json(node).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, "node not found"),
        Err(e) => internal(e),
    }
}

async fn delete_node(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.storage.delete_node(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error(StatusCode::NOT_FOUND, "node not found"),
        Err(e) => internal(e),
    }
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut filter = AlertFilter::default();
    if let Some(raw) = params.get("state") {
        match raw.parse::<AlertState>() {
            Ok(state) => filter.states.push(state),
            Err(_) => return error(StatusCode::BAD_REQUEST, "unknown alert state"),
        }
    }
    filter.node_id = params.get("node_id").cloned();

    match state.storage.list_alerts(&filter) {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => internal(e),
    }
}

/// `GET /v1/query?metric=cpu.usage&start_ns=..&end_ns=..&step_ns=..` with
/// any number of `label.<key>=<value>` equality filters.
async fn query_samples(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(metric) = params.get("metric").filter(|m| !m.is_empty()) else {
        return error(StatusCode::BAD_REQUEST, "metric is required");
    };
    let parse_ns = |key: &str, default: i64| -> Result<i64, Response> {
        match params.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| error(StatusCode::BAD_REQUEST, "malformed timestamp")),
            None => Ok(default),
        }
    };
    let start_ns = match parse_ns("start_ns", 0) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_ns = match parse_ns("end_ns", i64::MAX) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let step_ns = match parse_ns("step_ns", 1) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let labels: HashMap<String, String> = params
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix("label.")
                .map(|key| (key.to_string(), v.clone()))
        })
        .collect();

    let query = SampleQuery {
        metric_name: metric.clone(),
        labels,
        start_ns,
        end_ns,
        step_ns,
    };
    match state.storage.query(&query) {
        Ok(series) => Json(series).into_response(),
        Err(e) => internal(e),
    }
}
