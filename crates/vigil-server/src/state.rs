use crate::bus::LiveBus;
use crate::config::ServerConfig;
use crate::pipeline::{IngestBatch, IngestStats};
use crate::session::SessionRegistry;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use vigil_alert::engine::AlertEngine;
use vigil_notify::Dispatcher;
use vigil_storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub sessions: Arc<SessionRegistry>,
    pub alert_engine: Arc<Mutex<AlertEngine>>,
    pub dispatcher: Dispatcher,
    pub bus: Arc<LiveBus>,
    pub ingest_tx: mpsc::Sender<IngestBatch>,
    pub ingest_stats: Arc<IngestStats>,
    pub config: Arc<ServerConfig>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
