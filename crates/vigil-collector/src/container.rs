use crate::rate::RateTracker;
use crate::{now_ns, Collector};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_common::types::{MetricKind, Sample};

/// Per-container CPU and memory read from the cgroup v2 hierarchy.
///
/// Only enabled when a docker socket is present on the host; on hosts
/// without a runtime (or without cgroup v2) it yields no samples.
pub struct ContainerCollector {
    interval: Duration,
    rates: RateTracker,
}

impl ContainerCollector {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            rates: RateTracker::new(),
        }
    }
}

/// Simplified runtime detection: the docker socket exists.
pub fn runtime_available() -> bool {
    Path::new("/var/run/docker.sock").exists()
}

impl Collector for ContainerCollector {
    fn name(&self) -> &str {
        "container"
    }

    fn enabled(&self) -> bool {
        runtime_available()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, _deadline: Duration) -> Result<Vec<Sample>> {
        let now = now_ns();
        let mut points = Vec::new();
        let mut seen = HashSet::new();

        for (id, dir) in container_cgroups() {
            seen.insert(id.clone());
            let mut labels = HashMap::new();
            labels.insert("container".to_string(), id.clone());

            if let Some(mem) = read_u64(&dir.join("memory.current")) {
                points.push(Sample {
                    metric_name: "container.memory_bytes".to_string(),
                    value: mem as f64,
                    timestamp_ns: now,
                    labels: labels.clone(),
                    node_id: String::new(),
                    kind: MetricKind::Gauge,
                    help: String::new(),
                    unit: String::new(),
                });
            }

            if let Some(usec) = read_cpu_usage_usec(&dir.join("cpu.stat")) {
                points.push(Sample {
                    metric_name: "container.cpu_usec_total".to_string(),
                    value: usec as f64,
                    timestamp_ns: now,
                    labels: labels.clone(),
                    node_id: String::new(),
                    kind: MetricKind::Counter,
                    help: String::new(),
                    unit: String::new(),
                });
                let source = format!("container.cpu:{id}");
                if let Some(rate) = self.rates.observe(&source, usec as f64, now) {
                    // usec of CPU per second -> percent of one core.
                    points.push(Sample {
                        metric_name: "container.cpu_percent".to_string(),
                        value: rate / 1e6 * 100.0,
                        timestamp_ns: now,
                        labels,
                        node_id: String::new(),
                        kind: MetricKind::Gauge,
                        help: String::new(),
                        unit: String::new(),
                    });
                }
            }
        }

        // Stopped containers start fresh if they come back.
        self.rates
            .retain(|source| match source.rsplit_once(':') {
                Some((_, id)) => seen.contains(id),
                None => false,
            });

        Ok(points)
    }
}

/// Enumerates container cgroup directories for the systemd and cgroupfs
/// drivers. Returns (short id, cgroup dir) pairs.
fn container_cgroups() -> Vec<(String, PathBuf)> {
    let mut out = Vec::new();

    // systemd driver: /sys/fs/cgroup/system.slice/docker-<id>.scope
    if let Ok(entries) = std::fs::read_dir("/sys/fs/cgroup/system.slice") {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name
                .strip_prefix("docker-")
                .and_then(|n| n.strip_suffix(".scope"))
            {
                out.push((short_id(id), entry.path()));
            }
        }
    }

    // cgroupfs driver: /sys/fs/cgroup/docker/<id>
    if let Ok(entries) = std::fs::read_dir("/sys/fs/cgroup/docker") {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                let id = entry.file_name().to_string_lossy().to_string();
                out.push((short_id(&id), entry.path()));
            }
        }
    }

    out
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

fn read_u64(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn read_cpu_usage_usec(path: &Path) -> Option<u64> {
    let content = std::fs::read_to_string(path).ok()?;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("usage_usec ") {
            return value.trim().parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_to_twelve() {
        assert_eq!(
            short_id("0123456789abcdef0123456789abcdef"),
            "0123456789ab"
        );
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn cpu_stat_parsing() {
        let dir = std::env::temp_dir().join("vigil-cgroup-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cpu.stat");
        std::fs::write(&path, "usage_usec 123456\nuser_usec 100000\nsystem_usec 23456\n")
            .unwrap();
        assert_eq!(read_cpu_usage_usec(&path), Some(123456));
        std::fs::remove_dir_all(&dir).ok();
    }
}
