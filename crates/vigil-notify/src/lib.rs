//! Notification dispatch.
//!
//! The alert engine emits [`Notification`] values; a dispatcher task drains
//! them and hands each to every registered [`NotificationSink`]. An alert
//! counts as fired when the engine decides so, never when a channel
//! acknowledges; sink failures are logged and go nowhere else. Concrete
//! transports (Slack, email, …) plug in behind the sink trait; the built-in
//! [`LogSink`] writes to the log.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vigil_common::types::Alert;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Fired,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub alert: Alert,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Default adapter: structured log lines only.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        match notification.kind {
            NotificationKind::Fired => tracing::warn!(
                rule = %notification.alert.rule_name,
                node = %notification.alert.node_id,
                value = notification.alert.value,
                severity = %notification.alert.severity,
                "ALERT"
            ),
            NotificationKind::Resolved => tracing::info!(
                rule = %notification.alert.rule_name,
                node = %notification.alert.node_id,
                "RESOLVED"
            ),
        }
        Ok(())
    }
}

/// Capacity of the engine -> dispatcher channel. Overflow drops the
/// notification with a warning; the alert state itself is unaffected.
pub const DISPATCH_QUEUE: usize = 256;

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Notification>,
}

impl Dispatcher {
    /// Spawns the dispatcher task and returns the send handle plus the task
    /// handle (held by the caller for shutdown).
    pub fn spawn(sinks: Vec<Arc<dyn NotificationSink>>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(DISPATCH_QUEUE);
        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                for sink in &sinks {
                    if let Err(e) = sink.send(&notification).await {
                        tracing::error!(
                            sink = sink.name(),
                            rule = %notification.alert.rule_name,
                            error = %e,
                            "Notification delivery failed"
                        );
                    }
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Non-blocking enqueue; the engine is never held up by a slow channel.
    pub fn dispatch(&self, notification: Notification) {
        if self.tx.try_send(notification).is_err() {
            tracing::warn!("Notification queue full, dropping notification");
        }
    }
}
