use crate::codec::{decode_sample, encode_sample};
use crate::error::Result;
use crate::keys::{self, parse_sample_key};
use crate::kv::KvStore;
use crate::{AlertFilter, SampleQuery, Storage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use vigil_common::labels;
use vigil_common::types::{Alert, NodeRecord, Sample, SamplePoint, TimeSeries};

/// Retention deletes run in chunks of this many keys per transaction.
const SWEEP_CHUNK: usize = 512;

pub struct TimeSeriesStore {
    kv: KvStore,
    /// Read-through cache over `node:` records; writes go through.
    node_cache: RwLock<HashMap<String, NodeRecord>>,
}

impl TimeSeriesStore {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            kv: KvStore::open(dir)?,
            node_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn close(self) -> Result<()> {
        self.kv.close()
    }
}

impl Storage for TimeSeriesStore {
    fn write_samples(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.kv.transaction(|batch| {
            for sample in samples {
                if sample.timestamp_ns <= 0 || sample.node_id.is_empty() {
                    tracing::warn!(
                        metric = %sample.metric_name,
                        timestamp_ns = sample.timestamp_ns,
                        "Skipping sample without ingress stamping"
                    );
                    continue;
                }
                let key = keys::sample_key(
                    &sample.metric_name,
                    sample.timestamp_ns,
                    &labels::hash(&sample.labels),
                );
                batch.put(&key, &encode_sample(sample)?)?;
            }
            Ok(())
        })
    }

    fn query(&self, query: &SampleQuery) -> Result<Vec<TimeSeries>> {
        let step = query.step_ns.max(1);
        let prefix = keys::sample_prefix(&query.metric_name);
        let seek = keys::sample_seek(&query.metric_name, query.start_ns);

        // group canonical labels -> (labels, bucket -> (sum, count))
        struct Group {
            labels: HashMap<String, String>,
            buckets: HashMap<i64, (f64, u64)>,
        }
        let mut groups: HashMap<String, Group> = HashMap::new();

        self.kv.scan_from(&seek, |key, value| {
            if !key.starts_with(&prefix) {
                return Ok(false);
            }
            let parsed = parse_sample_key(key)?;
            // A metric whose name extends ours past a `:` shares the key
            // prefix; its samples are not part of this series.
            if parsed.metric_name != query.metric_name {
                return Ok(true);
            }
            // Keys under one metric are in time order; past the range we
            // are done.
            if parsed.timestamp_ns > query.end_ns {
                return Ok(false);
            }
            if parsed.timestamp_ns < query.start_ns {
                return Ok(true);
            }

            let sample = match decode_sample(&parsed, value) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Skipping undecodable sample");
                    return Ok(true);
                }
            };

            for (k, v) in &query.labels {
                if sample.labels.get(k) != Some(v) {
                    return Ok(true);
                }
            }

            let bucket = (sample.timestamp_ns / step) * step;
            let group_key = labels::canonical(&sample.labels);
            let group = groups.entry(group_key).or_insert_with(|| Group {
                labels: sample.labels.clone(),
                buckets: HashMap::new(),
            });
            let slot = group.buckets.entry(bucket).or_insert((0.0, 0));
            slot.0 += sample.value;
            slot.1 += 1;
            Ok(true)
        })?;

        let mut series: Vec<TimeSeries> = groups
            .into_values()
            .map(|group| {
                let mut samples: Vec<SamplePoint> = group
                    .buckets
                    .into_iter()
                    .map(|(bucket, (sum, count))| SamplePoint {
                        timestamp_ns: bucket,
                        value: sum / count as f64,
                    })
                    .collect();
                samples.sort_by_key(|p| p.timestamp_ns);
                TimeSeries {
                    labels: group.labels,
                    samples,
                }
            })
            .collect();
        series.sort_by(|a, b| labels::canonical(&a.labels).cmp(&labels::canonical(&b.labels)));
        Ok(series)
    }

    fn save_node(&self, node: &NodeRecord) -> Result<()> {
        self.kv
            .put(&keys::node_key(&node.id), &serde_json::to_vec(node)?)?;
        self.node_cache
            .write()
            .unwrap()
            .insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        if let Some(node) = self.node_cache.read().unwrap().get(node_id) {
            return Ok(Some(node.clone()));
        }
        let Some(bytes) = self.kv.get(&keys::node_key(node_id))? else {
            return Ok(None);
        };
        let node: NodeRecord = serde_json::from_slice(&bytes)?;
        self.node_cache
            .write()
            .unwrap()
            .insert(node.id.clone(), node.clone());
        Ok(Some(node))
    }

    fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let mut nodes = Vec::new();
        self.kv.scan_prefix(keys::NODE_PREFIX, |_, value| {
            nodes.push(serde_json::from_slice::<NodeRecord>(value)?);
            Ok(true)
        })?;
        Ok(nodes)
    }

    fn delete_node(&self, node_id: &str) -> Result<bool> {
        self.node_cache.write().unwrap().remove(node_id);
        self.kv.delete(&keys::node_key(node_id))
    }

    fn save_alert(&self, alert: &Alert) -> Result<()> {
        self.kv
            .put(&keys::alert_key(&alert.id), &serde_json::to_vec(alert)?)
    }

    fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut alerts = Vec::new();
        self.kv.scan_prefix(keys::ALERT_PREFIX, |_, value| {
            let alert: Alert = serde_json::from_slice(value)?;
            if !filter.states.is_empty() && !filter.states.contains(&alert.state) {
                return Ok(true);
            }
            if let Some(node_id) = &filter.node_id {
                if &alert.node_id != node_id {
                    return Ok(true);
                }
            }
            alerts.push(alert);
            Ok(true)
        })?;
        Ok(alerts)
    }

    fn sweep_expired(&self, cutoff_ns: i64) -> Result<u64> {
        let mut expired = Vec::new();
        self.kv.scan_prefix(keys::SAMPLE_PREFIX, |key, _| {
            match parse_sample_key(key) {
                Ok(parsed) if parsed.timestamp_ns < cutoff_ns => {
                    expired.push(key.to_string());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(key, error = %e, "Skipping unparseable sample key"),
            }
            Ok(true)
        })?;

        for chunk in expired.chunks(SWEEP_CHUNK) {
            self.kv.transaction(|batch| {
                for key in chunk {
                    batch.delete(key)?;
                }
                Ok(())
            })?;
        }
        Ok(expired.len() as u64)
    }
}
