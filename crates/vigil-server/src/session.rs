//! Session registry and node liveness.
//!
//! A session is minted at registration, authenticated by its token on the
//! ingest stream, kept alive by heartbeats and batches, and removed when
//! the stream ends or the heartbeat expires. Node health derives from the
//! registry's last-heartbeat view:
//!
//! healthy --(no heartbeat > timeout)--> unhealthy
//! unhealthy --(no heartbeat > 3x timeout)--> offline
//! any --(register / heartbeat)--> healthy

use crate::bus::LiveBus;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use vigil_common::proto::CollectorConfig;
use vigil_common::types::NodeStatus;
use vigil_storage::Storage;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub node_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// Collector plan handed back at registration.
    pub collectors: Vec<CollectorConfig>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    /// Last heartbeat per node, surviving session removal so the liveness
    /// sweep can keep grading nodes whose stream already dropped.
    node_last: RwLock<HashMap<String, DateTime<Utc>>>,
    heartbeat_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(heartbeat_timeout_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            node_last: RwLock::new(HashMap::new()),
            heartbeat_timeout: Duration::seconds(heartbeat_timeout_secs as i64),
        }
    }

    pub fn register(&self, node_id: &str, collectors: Vec<CollectorConfig>) -> Session {
        let now = Utc::now();
        let session = Session {
            session_id: vigil_common::id::session_id(),
            node_id: node_id.to_string(),
            connected_at: now,
            last_heartbeat: now,
            collectors,
        };
        self.sessions
            .write()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        self.node_last
            .write()
            .unwrap()
            .insert(node_id.to_string(), now);
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Refreshes the session's heartbeat; returns the owning node id, or
    /// None for an unknown session.
    pub fn touch(&self, session_id: &str) -> Option<String> {
        let now = Utc::now();
        let node_id = {
            let mut sessions = self.sessions.write().unwrap();
            let session = sessions.get_mut(session_id)?;
            session.last_heartbeat = now;
            session.node_id.clone()
        };
        self.node_last
            .write()
            .unwrap()
            .insert(node_id.clone(), now);
        Some(node_id)
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.write().unwrap().remove(session_id)
    }

    /// Updates the stored collector plan for every live session of a node.
    pub fn update_collectors(&self, node_id: &str, collectors: &[CollectorConfig]) -> usize {
        let mut sessions = self.sessions.write().unwrap();
        let mut updated = 0;
        for session in sessions.values_mut() {
            if session.node_id == node_id {
                session.collectors = collectors.to_vec();
                updated += 1;
            }
        }
        updated
    }

    /// Removes sessions whose heartbeat is older than the timeout.
    pub fn expire_sessions(&self, now: DateTime<Utc>) -> Vec<Session> {
        let mut sessions = self.sessions.write().unwrap();
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| now - s.last_heartbeat > self.heartbeat_timeout)
            .map(|s| s.session_id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }

    /// The registry's last-heartbeat view of a node, if it has ever had a
    /// session this process lifetime.
    pub fn last_heartbeat(&self, node_id: &str) -> Option<DateTime<Utc>> {
        self.node_last.read().unwrap().get(node_id).copied()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

/// Background sweep grading node health from heartbeat age. Runs every
/// ~30s from the server main loop; `sweep_once` is separate for tests.
pub struct NodeLivenessSweeper {
    registry: Arc<SessionRegistry>,
    storage: Arc<dyn Storage>,
    bus: Arc<LiveBus>,
    timeout: Duration,
}

impl NodeLivenessSweeper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        storage: Arc<dyn Storage>,
        bus: Arc<LiveBus>,
        heartbeat_timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            storage,
            bus,
            timeout: Duration::seconds(heartbeat_timeout_secs as i64),
        }
    }

    pub fn sweep_once(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let expired = self.registry.expire_sessions(now);
        for session in &expired {
            tracing::info!(
                session_id = %session.session_id,
                node_id = %session.node_id,
                "Session expired"
            );
        }

        for mut node in self.storage.list_nodes()? {
            let last = self
                .registry
                .last_heartbeat(&node.id)
                .unwrap_or(node.last_seen);
            let stale_for = now - last;

            let next = match node.status {
                NodeStatus::Healthy | NodeStatus::Degraded if stale_for > self.timeout * 3 => {
                    Some(NodeStatus::Offline)
                }
                NodeStatus::Healthy | NodeStatus::Degraded if stale_for > self.timeout => {
                    Some(NodeStatus::Unhealthy)
                }
                NodeStatus::Unhealthy if stale_for > self.timeout * 3 => {
                    Some(NodeStatus::Offline)
                }
                _ => None,
            };

            if let Some(status) = next {
                tracing::warn!(
                    node_id = %node.id,
                    from = %node.status,
                    to = %status,
                    stale_secs = stale_for.num_seconds(),
                    "Node status changed"
                );
                node.status = status;
                self.storage.save_node(&node)?;
                self.bus.publish_node_status(&node);
            }
        }
        Ok(())
    }
}

/// Marks a node healthy after a register or heartbeat, persisting and
/// announcing the transition only when the status actually changed.
pub fn mark_node_healthy(
    storage: &dyn Storage,
    bus: &LiveBus,
    node_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let Some(mut node) = storage.get_node(node_id)? else {
        return Ok(());
    };
    node.last_seen = now;
    let recovered = node.status != NodeStatus::Healthy;
    node.status = NodeStatus::Healthy;
    storage.save_node(&node)?;
    if recovered {
        tracing::info!(node_id = %node.id, "Node recovered");
        bus.publish_node_status(&node);
    }
    Ok(())
}
