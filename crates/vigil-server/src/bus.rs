//! Process-local publish/subscribe hub feeding dashboard subscribers.
//!
//! Publishers push onto one bounded channel and are never blocked: overflow
//! drops the message and bumps a counter. A single broadcast worker drains
//! the channel, serializes each message once, and offers it to every
//! subscriber whose topic set matches. A subscriber whose own bounded queue
//! is full is evicted, which keeps memory bounded under slow consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vigil_common::types::{Alert, NodeRecord, Sample};

/// Internal publish channel capacity.
const BROADCAST_QUEUE: usize = 1000;
/// Per-subscriber frame queue capacity.
const SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Metrics,
    Alert,
    NodeStatus,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Metrics => "metrics",
            Topic::Alert => "alert",
            Topic::NodeStatus => "node_status",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip)]
    topic: Topic,
}

impl BusMessage {
    pub fn new(topic: Topic, data: serde_json::Value, node_id: Option<String>) -> Self {
        Self {
            kind: topic.as_str(),
            timestamp: Utc::now(),
            data,
            node_id,
            topic,
        }
    }
}

/// Per-subscriber state shared between the broadcast worker and the
/// WebSocket handler that mutates the topic set.
pub struct Subscriber {
    id: u64,
    tx: mpsc::Sender<String>,
    topics: RwLock<HashSet<String>>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subscribe(&self, topics: &[String]) {
        let mut set = self.topics.write().unwrap();
        for topic in topics {
            set.insert(topic.clone());
        }
    }

    pub fn unsubscribe(&self, topics: &[String]) {
        let mut set = self.topics.write().unwrap();
        for topic in topics {
            set.remove(topic);
        }
    }

    fn matches(&self, topic: Topic) -> bool {
        let set = self.topics.read().unwrap();
        set.contains(topic.as_str()) || set.contains("all")
    }
}

pub struct LiveBus {
    tx: mpsc::Sender<BusMessage>,
    subscribers: Arc<RwLock<HashMap<u64, Arc<Subscriber>>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl LiveBus {
    /// Builds the bus and spawns its broadcast worker.
    pub fn start() -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(BROADCAST_QUEUE);
        let subscribers: Arc<RwLock<HashMap<u64, Arc<Subscriber>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let evicted = AtomicU64::new(0);

        let bus = Arc::new(Self {
            tx,
            subscribers,
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            evicted,
        });
        let worker = tokio::spawn(broadcast_worker(rx, Arc::clone(&bus)));
        (bus, worker)
    }

    /// Non-blocking publish; a full channel drops the message.
    pub fn publish(&self, message: BusMessage) {
        if self.tx.try_send(message).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "Broadcast channel full, dropping message");
        }
    }

    pub fn publish_metrics(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        match serde_json::to_value(samples) {
            Ok(data) => self.publish(BusMessage::new(Topic::Metrics, data, None)),
            Err(e) => tracing::error!(error = %e, "Failed to encode metrics event"),
        }
    }

    pub fn publish_alert(&self, alert: &Alert) {
        match serde_json::to_value(alert) {
            Ok(data) => self.publish(BusMessage::new(
                Topic::Alert,
                data,
                Some(alert.node_id.clone()),
            )),
            Err(e) => tracing::error!(error = %e, "Failed to encode alert event"),
        }
    }

    pub fn publish_node_status(&self, node: &NodeRecord) {
        match serde_json::to_value(node) {
            Ok(data) => self.publish(BusMessage::new(
                Topic::NodeStatus,
                data,
                Some(node.id.clone()),
            )),
            Err(e) => tracing::error!(error = %e, "Failed to encode node status event"),
        }
    }

    /// Registers a subscriber with an empty topic set and returns its
    /// handle plus the frame receiver to drain.
    pub fn add_subscriber(&self) -> (Arc<Subscriber>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            tx,
            topics: RwLock::new(HashSet::new()),
        });
        self.subscribers
            .write()
            .unwrap()
            .insert(id, Arc::clone(&subscriber));
        tracing::debug!(id, "Subscriber registered");
        (subscriber, rx)
    }

    pub fn remove_subscriber(&self, id: u64) {
        if self.subscribers.write().unwrap().remove(&id).is_some() {
            tracing::debug!(id, "Subscriber unregistered");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

async fn broadcast_worker(mut rx: mpsc::Receiver<BusMessage>, bus: Arc<LiveBus>) {
    while let Some(message) = rx.recv().await {
        let frame = match serde_json::to_string(&message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize bus message");
                continue;
            }
        };

        // Snapshot so subscribe/unsubscribe never contend with delivery.
        let snapshot: Vec<Arc<Subscriber>> = {
            let subs = bus.subscribers.read().unwrap();
            subs.values().cloned().collect()
        };

        for subscriber in snapshot {
            if !subscriber.matches(message.topic) {
                continue;
            }
            if subscriber.tx.try_send(frame.clone()).is_err() {
                // Queue full or receiver gone: evict. Dropping the sender
                // closes the receiver, which ends the client connection.
                bus.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = subscriber.id, "Evicting slow subscriber");
                bus.remove_subscriber(subscriber.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn message(topic: Topic) -> BusMessage {
        BusMessage::new(topic, serde_json::json!({"x": 1}), None)
    }

    #[tokio::test]
    async fn delivers_to_matching_topics_only() {
        let (bus, _worker) = LiveBus::start();
        let (sub, mut rx) = bus.add_subscriber();
        sub.subscribe(&["alert".to_string()]);

        bus.publish(message(Topic::Metrics));
        bus.publish(message(Topic::Alert));

        let frame = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("\"type\":\"alert\""));

        // Nothing else arrives: the metrics message was filtered out.
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn wildcard_receives_everything() {
        let (bus, _worker) = LiveBus::start();
        let (sub, mut rx) = bus.add_subscriber();
        sub.subscribe(&["all".to_string()]);

        bus.publish(message(Topic::Metrics));
        bus.publish(message(Topic::NodeStatus));

        for _ in 0..2 {
            timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn unsubscribed_client_receives_nothing() {
        let (bus, _worker) = LiveBus::start();
        let (_sub, mut rx) = bus.add_subscriber();

        bus.publish(message(Topic::Metrics));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_without_blocking_others() {
        let (bus, _worker) = LiveBus::start();

        // Slow consumer: never reads its queue.
        let (slow, _slow_rx) = bus.add_subscriber();
        slow.subscribe(&["all".to_string()]);

        let (healthy, mut healthy_rx) = bus.add_subscriber();
        healthy.subscribe(&["all".to_string()]);

        // Overrun the slow subscriber's queue while the healthy one drains.
        let publisher = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for _ in 0..(SUBSCRIBER_QUEUE + 64) {
                    bus.publish(message(Topic::Metrics));
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut received = 0;
        while received < SUBSCRIBER_QUEUE + 32 {
            match timeout(Duration::from_secs(2), healthy_rx.recv()).await {
                Ok(Some(_)) => received += 1,
                _ => break,
            }
        }
        publisher.await.unwrap();

        assert!(received >= SUBSCRIBER_QUEUE, "healthy subscriber starved");
        assert!(bus.evicted_count() >= 1, "slow subscriber was not evicted");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (bus, _worker) = LiveBus::start();
        let (sub, mut rx) = bus.add_subscriber();
        sub.subscribe(&["metrics".to_string()]);

        bus.publish(message(Topic::Metrics));
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        sub.unsubscribe(&["metrics".to_string()]);
        bus.publish(message(Topic::Metrics));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }
}
