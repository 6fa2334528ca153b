//! Uplink: buffering, batching, sending, reconnecting, heartbeating.
//!
//! One long-lived client stream carries sample batches; the first frame
//! authenticates with the session id. Flushes trigger on batch size or on
//! the age of the oldest buffered sample. Any transport or heartbeat
//! failure tears the stream down and re-registers under a new session after
//! capped exponential backoff with jitter. While disconnected, samples
//! accumulate in the bounded buffer and the oldest are dropped first.

use rand::Rng;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::Request;
use vigil_common::proto::monitor_service_client::MonitorServiceClient;
use vigil_common::proto::{
    HeartbeatRequest, Metric, MetricBatch, RegisterRequest, RegisterResponse,
};
use vigil_common::types::Sample;

const SEND_DEADLINE: Duration = Duration::from_secs(10);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Host properties advertised at registration.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub node_id: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub agent_version: String,
    pub labels: HashMap<String, String>,
}

impl HostFacts {
    fn to_request(&self) -> RegisterRequest {
        RegisterRequest {
            node_id: self.node_id.clone(),
            hostname: self.hostname.clone(),
            os: self.os.clone(),
            arch: self.arch.clone(),
            agent_version: self.agent_version.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// Bounded sample buffer between the collector queue and the wire. When
/// full, the oldest samples give way and the drop counter grows.
pub struct SampleBuffer {
    buffer: VecDeque<Metric>,
    max_size: usize,
    since: Option<Instant>,
    dropped: u64,
}

impl SampleBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_size.min(4096)),
            max_size,
            since: None,
            dropped: 0,
        }
    }

    pub fn push_batch(&mut self, samples: Vec<Metric>) {
        if self.buffer.is_empty() && !samples.is_empty() {
            self.since = Some(Instant::now());
        }
        for sample in samples {
            if self.buffer.len() >= self.max_size {
                self.buffer.pop_front();
                self.dropped += 1;
            }
            self.buffer.push_back(sample);
        }
    }

    pub fn drain(&mut self, max: usize) -> Vec<Metric> {
        let take = self.buffer.len().min(max);
        let out: Vec<Metric> = self.buffer.drain(..take).collect();
        self.since = if self.buffer.is_empty() {
            None
        } else {
            Some(Instant::now())
        };
        out
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// When the oldest currently-buffered sample arrived.
    pub fn oldest_since(&self) -> Option<Instant> {
        self.since
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Exponential backoff with full jitter, capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = base_backoff(attempt);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(jitter)
}

fn base_backoff(attempt: u32) -> Duration {
    let exp = attempt.min(16);
    (BACKOFF_BASE * 2u32.saturating_pow(exp)).min(BACKOFF_CAP)
}

fn to_wire(samples: Vec<Sample>) -> Vec<Metric> {
    samples
        .into_iter()
        .map(|s| Metric {
            name: s.metric_name,
            value: s.value,
            timestamp_ns: s.timestamp_ns,
            labels: s.labels,
            kind: s.kind.to_wire(),
            help: s.help,
            unit: s.unit,
        })
        .collect()
}

pub struct Uplink {
    endpoint: String,
    facts: HostFacts,
    batch_size_max: usize,
    max_batch_latency: Duration,
    client: MonitorServiceClient<Channel>,
    session_id: String,
    heartbeat_interval: Duration,
    buffer: SampleBuffer,
}

impl Uplink {
    /// Connects and registers, retrying with backoff until it succeeds or
    /// shutdown fires. Returns the uplink plus the registration response
    /// (which carries the collector plan).
    pub async fn connect(
        endpoint: String,
        facts: HostFacts,
        batch_size_max: usize,
        max_batch_latency: Duration,
        buffer_max_samples: usize,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<(Self, RegisterResponse)> {
        let mut attempt: u32 = 0;
        loop {
            match try_register(&endpoint, &facts).await {
                Ok((client, response)) => {
                    tracing::info!(
                        node_id = %facts.node_id,
                        session_id = %response.session_id,
                        collectors = response.collectors.len(),
                        "Registered with server"
                    );
                    let uplink = Self {
                        endpoint,
                        facts,
                        batch_size_max,
                        max_batch_latency,
                        client,
                        session_id: response.session_id.clone(),
                        heartbeat_interval: Duration::from_secs(
                            response.heartbeat_interval_seconds.max(1) as u64,
                        ),
                        buffer: SampleBuffer::new(buffer_max_samples),
                    };
                    return Some((uplink, response));
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to connect to server"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Drives the stream until shutdown. Collector batches arrive on `rx`;
    /// heartbeats ride their own timer. Never returns while the process is
    /// meant to run: all failures funnel into reconnect.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Vec<Sample>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        'session: loop {
            // Open the stream for this session and send the identifying
            // first frame (which may carry zero samples).
            let (batch_tx, batch_rx) = mpsc::channel::<MetricBatch>(8);
            let mut stream_done = {
                let mut client = self.client.clone();
                tokio::spawn(async move {
                    client.stream_metrics(ReceiverStream::new(batch_rx)).await
                })
            };
            let hello = MetricBatch {
                session_id: self.session_id.clone(),
                samples: Vec::new(),
            };
            if batch_tx.send(hello).await.is_err() {
                if !self.reconnect(&mut shutdown).await {
                    return;
                }
                continue 'session;
            }

            let mut hb_tick = tokio::time::interval(self.heartbeat_interval);
            hb_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; that doubles as a liveness
            // probe right after (re)connecting.

            loop {
                let latency_deadline = self
                    .buffer
                    .oldest_since()
                    .map(|since| since + self.max_batch_latency);

                tokio::select! {
                    _ = shutdown.recv() => {
                        self.final_flush(&batch_tx).await;
                        drop(batch_tx);
                        let _ = timeout(Duration::from_secs(5), &mut stream_done).await;
                        tracing::info!("Uplink stopped");
                        return;
                    }
                    maybe_batch = rx.recv() => {
                        let Some(samples) = maybe_batch else {
                            self.final_flush(&batch_tx).await;
                            return;
                        };
                        self.buffer.push_batch(to_wire(samples));
                        while self.buffer.len() >= self.batch_size_max {
                            if !self.flush(&batch_tx).await {
                                if !self.reconnect(&mut shutdown).await {
                                    return;
                                }
                                continue 'session;
                            }
                        }
                    }
                    _ = sleep_until_or_never(latency_deadline) => {
                        if !self.flush(&batch_tx).await {
                            if !self.reconnect(&mut shutdown).await {
                                return;
                            }
                            continue 'session;
                        }
                    }
                    _ = hb_tick.tick() => {
                        if let Err(e) = self.heartbeat().await {
                            tracing::warn!(error = %e, "Heartbeat failed, reconnecting");
                            if !self.reconnect(&mut shutdown).await {
                                return;
                            }
                            continue 'session;
                        }
                    }
                    result = &mut stream_done => {
                        match result {
                            Ok(Ok(summary)) => tracing::info!(
                                accepted = summary.into_inner().accepted,
                                "Server closed the metric stream"
                            ),
                            Ok(Err(status)) => tracing::warn!(
                                status = %status,
                                "Metric stream failed"
                            ),
                            Err(e) => tracing::warn!(error = %e, "Stream task failed"),
                        }
                        if !self.reconnect(&mut shutdown).await {
                            return;
                        }
                        continue 'session;
                    }
                }
            }
        }
    }

    /// Sends one batch within the send deadline. Returns false on transport
    /// failure; the drained samples are lost (best-effort delivery).
    async fn flush(&mut self, batch_tx: &mpsc::Sender<MetricBatch>) -> bool {
        let samples = self.buffer.drain(self.batch_size_max);
        if samples.is_empty() {
            return true;
        }
        let count = samples.len();
        let frame = MetricBatch {
            session_id: self.session_id.clone(),
            samples,
        };
        match timeout(SEND_DEADLINE, batch_tx.send(frame)).await {
            Ok(Ok(())) => {
                tracing::debug!(count, "Batch sent");
                true
            }
            _ => {
                tracing::warn!(count, "Batch send failed, marking session stale");
                false
            }
        }
    }

    async fn final_flush(&mut self, batch_tx: &mpsc::Sender<MetricBatch>) {
        while !self.buffer.is_empty() {
            if !self.flush(batch_tx).await {
                break;
            }
        }
    }

    async fn heartbeat(&mut self) -> anyhow::Result<()> {
        let mut request = Request::new(HeartbeatRequest {
            session_id: self.session_id.clone(),
        });
        request.set_timeout(RPC_TIMEOUT.min(self.heartbeat_interval));
        let response = self.client.heartbeat(request).await?.into_inner();
        if !response.alive {
            anyhow::bail!("server reports session dead");
        }
        Ok(())
    }

    /// Re-registers under a fresh session, with backoff. Returns false if
    /// shutdown fired while waiting.
    async fn reconnect(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let mut attempt: u32 = 0;
        loop {
            match try_register(&self.endpoint, &self.facts).await {
                Ok((client, response)) => {
                    tracing::info!(
                        session_id = %response.session_id,
                        buffered = self.buffer.len(),
                        "Reconnected under a new session"
                    );
                    self.client = client;
                    self.session_id = response.session_id;
                    self.heartbeat_interval =
                        Duration::from_secs(response.heartbeat_interval_seconds.max(1) as u64);
                    return true;
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Reconnect failed"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

async fn try_register(
    endpoint: &str,
    facts: &HostFacts,
) -> anyhow::Result<(MonitorServiceClient<Channel>, RegisterResponse)> {
    let mut client = MonitorServiceClient::connect(endpoint.to_string()).await?;
    let mut request = Request::new(facts.to_request());
    request.set_timeout(RPC_TIMEOUT);
    let response = client.register(request).await?.into_inner();
    if !response.success {
        anyhow::bail!("registration rejected: {}", response.message);
    }
    if response.session_id.is_empty() {
        anyhow::bail!("registration returned no session id");
    }
    Ok((client, response))
}

async fn sleep_until_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
