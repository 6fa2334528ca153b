//! Stored value record for samples.
//!
//! The key carries the metric name and timestamp; the value carries the
//! rest. Short field names keep the record compact. Decoding a value
//! together with its parsed key recovers the full [`Sample`]. Per-batch
//! compression would wrap the encoded bytes here if it is ever enabled.

use crate::error::Result;
use crate::keys::SampleKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vigil_common::types::{MetricKind, Sample};

#[derive(Serialize, Deserialize)]
struct StoredSample {
    v: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    l: HashMap<String, String>,
    n: String,
    t: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    h: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    u: String,
}

pub fn encode_sample(sample: &Sample) -> Result<Vec<u8>> {
    let record = StoredSample {
        v: sample.value,
        l: sample.labels.clone(),
        n: sample.node_id.clone(),
        t: sample.kind.to_string(),
        h: sample.help.clone(),
        u: sample.unit.clone(),
    };
    Ok(serde_json::to_vec(&record)?)
}

pub fn decode_sample(key: &SampleKey, value: &[u8]) -> Result<Sample> {
    let record: StoredSample = serde_json::from_slice(value)?;
    Ok(Sample {
        metric_name: key.metric_name.clone(),
        value: record.v,
        timestamp_ns: key.timestamp_ns,
        labels: record.l,
        node_id: record.n,
        kind: record.t.parse().unwrap_or(MetricKind::Gauge),
        help: record.h,
        unit: record.u,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{parse_sample_key, sample_key};

    #[test]
    fn sample_survives_encode_decode() {
        let mut labels = HashMap::new();
        labels.insert("collector".to_string(), "system".to_string());

        let sample = Sample {
            metric_name: "cpu.usage".to_string(),
            value: 42.5,
            timestamp_ns: 1_700_000_000_000_000_000,
            labels: labels.clone(),
            node_id: "web-01".to_string(),
            kind: MetricKind::Counter,
            help: "total cpu time".to_string(),
            unit: "seconds".to_string(),
        };

        let key_str = sample_key(
            &sample.metric_name,
            sample.timestamp_ns,
            &vigil_common::labels::hash(&sample.labels),
        );
        let key = parse_sample_key(&key_str).unwrap();
        let bytes = encode_sample(&sample).unwrap();
        let decoded = decode_sample(&key, &bytes).unwrap();

        assert_eq!(decoded.metric_name, sample.metric_name);
        assert_eq!(decoded.value, sample.value);
        assert_eq!(decoded.timestamp_ns, sample.timestamp_ns);
        assert_eq!(decoded.labels, labels);
        assert_eq!(decoded.node_id, "web-01");
        assert_eq!(decoded.kind, MetricKind::Counter);
    }

    #[test]
    fn unknown_kind_degrades_to_gauge() {
        let key = parse_sample_key(&sample_key("m", 1, "")).unwrap();
        let decoded = decode_sample(&key, br#"{"v":1.0,"n":"a","t":"exotic"}"#).unwrap();
        assert_eq!(decoded.kind, MetricKind::Gauge);
    }
}
