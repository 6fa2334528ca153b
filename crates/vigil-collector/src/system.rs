use crate::rate::RateTracker;
use crate::{now_ns, Collector};
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{Disks, Networks, System};
use vigil_common::types::{MetricKind, Sample};

/// Host-level metrics: CPU, memory, load, disk space and I/O, network.
///
/// Cumulative sources (CPU time shares per core, NIC counters, block device
/// counters) are emitted twice: the absolute counter and a per-second rate
/// derived through [`RateTracker`]. On the first tick, and after a counter
/// reset, only the absolutes appear.
pub struct SystemCollector {
    interval: Duration,
    sys: System,
    networks: Networks,
    disks: Disks,
    rates: RateTracker,
    cpu_prev: HashMap<String, CpuTimes>,
}

impl SystemCollector {
    pub fn new(interval: Duration) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        Self {
            interval,
            sys,
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            rates: RateTracker::new(),
            cpu_prev: HashMap::new(),
        }
    }
}

fn gauge(name: &str, value: f64, ts: i64, labels: HashMap<String, String>) -> Sample {
    Sample {
        metric_name: name.to_string(),
        value,
        timestamp_ns: ts,
        labels,
        node_id: String::new(),
        kind: MetricKind::Gauge,
        help: String::new(),
        unit: String::new(),
    }
}

fn counter(name: &str, value: f64, ts: i64, labels: HashMap<String, String>) -> Sample {
    Sample {
        kind: MetricKind::Counter,
        ..gauge(name, value, ts, labels)
    }
}

fn label(key: &str, value: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(key.to_string(), value.to_string());
    map
}

impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn collect(&mut self, _deadline: Duration) -> Result<Vec<Sample>> {
        let now = now_ns();
        let mut points = Vec::with_capacity(64);

        // CPU usage.
        self.sys.refresh_cpu_all();
        points.push(gauge(
            "cpu.cores",
            self.sys.cpus().len() as f64,
            now,
            HashMap::new(),
        ));
        points.push(gauge(
            "cpu.usage",
            self.sys.global_cpu_usage() as f64,
            now,
            HashMap::new(),
        ));
        for (i, cpu) in self.sys.cpus().iter().enumerate() {
            points.push(gauge(
                "cpu.core_usage",
                cpu.cpu_usage() as f64,
                now,
                label("core", &i.to_string()),
            ));
        }

        // CPU time shares by mode, from per-core time deltas.
        for (core, times) in read_cpu_times() {
            if let Some(prev) = self.cpu_prev.get(&core) {
                let total_delta = times.total().saturating_sub(prev.total()) as f64;
                if total_delta > 0.0 {
                    let pct = |cur: u64, last: u64| {
                        100.0 * cur.saturating_sub(last) as f64 / total_delta
                    };
                    let lbl = label("cpu", &core);
                    points.push(gauge("cpu.user_percent", pct(times.user, prev.user), now, lbl.clone()));
                    points.push(gauge("cpu.system_percent", pct(times.system, prev.system), now, lbl.clone()));
                    points.push(gauge("cpu.idle_percent", pct(times.idle, prev.idle), now, lbl.clone()));
                    points.push(gauge("cpu.iowait_percent", pct(times.iowait, prev.iowait), now, lbl));
                }
            }
            self.cpu_prev.insert(core, times);
        }

        // Memory and swap.
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        let used = self.sys.used_memory();
        let used_pct = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        points.push(gauge("memory.total", total as f64, now, HashMap::new()));
        points.push(gauge("memory.used", used as f64, now, HashMap::new()));
        points.push(gauge(
            "memory.available",
            self.sys.available_memory() as f64,
            now,
            HashMap::new(),
        ));
        points.push(gauge("memory.used_percent", used_pct, now, HashMap::new()));

        let swap_total = self.sys.total_swap();
        let swap_used = self.sys.used_swap();
        let swap_pct = if swap_total > 0 {
            swap_used as f64 / swap_total as f64 * 100.0
        } else {
            0.0
        };
        points.push(gauge("memory.swap_total", swap_total as f64, now, HashMap::new()));
        points.push(gauge("memory.swap_used", swap_used as f64, now, HashMap::new()));
        points.push(gauge("memory.swap_percent", swap_pct, now, HashMap::new()));

        // Load averages and uptime.
        let load = System::load_average();
        points.push(gauge("system.load_1", load.one, now, HashMap::new()));
        points.push(gauge("system.load_5", load.five, now, HashMap::new()));
        points.push(gauge("system.load_15", load.fifteen, now, HashMap::new()));
        points.push(gauge(
            "system.uptime",
            System::uptime() as f64,
            now,
            HashMap::new(),
        ));

        // Filesystem usage.
        self.disks.refresh(true);
        for disk in self.disks.iter() {
            let mount = disk.mount_point().to_string_lossy().to_string();
            // Skip virtual/pseudo filesystems (snap, tmpfs, overlay, etc.)
            if mount.starts_with("/snap/")
                || mount.starts_with("/sys/")
                || mount.starts_with("/proc/")
                || mount.starts_with("/dev/")
                || mount.starts_with("/run/")
            {
                continue;
            }
            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            let available = disk.available_space();
            let used = total.saturating_sub(available);
            let lbl = label("mount", &mount);
            points.push(gauge("disk.total", total as f64, now, lbl.clone()));
            points.push(gauge("disk.used", used as f64, now, lbl.clone()));
            points.push(gauge("disk.available", available as f64, now, lbl.clone()));
            points.push(gauge(
                "disk.used_percent",
                used as f64 / total as f64 * 100.0,
                now,
                lbl,
            ));
        }

        // Block device I/O counters and rates.
        for io in read_disk_io() {
            let lbl = label("device", &io.device);
            let pairs = [
                ("disk.read_bytes", io.read_bytes),
                ("disk.write_bytes", io.write_bytes),
                ("disk.read_ops", io.reads),
                ("disk.write_ops", io.writes),
            ];
            for (name, value) in pairs {
                let value = value as f64;
                points.push(counter(
                    &format!("{name}_total"),
                    value,
                    now,
                    lbl.clone(),
                ));
                let source = format!("{name}:{}", io.device);
                if let Some(rate) = self.rates.observe(&source, value, now) {
                    points.push(gauge(&format!("{name}_per_sec"), rate, now, lbl.clone()));
                }
            }
        }

        // Network interface counters and rates.
        self.networks.refresh(true);
        for (iface, data) in self.networks.iter() {
            let lbl = label("interface", iface);
            let pairs = [
                ("network.bytes_recv", data.total_received()),
                ("network.bytes_sent", data.total_transmitted()),
                ("network.packets_recv", data.total_packets_received()),
                ("network.packets_sent", data.total_packets_transmitted()),
                ("network.errors_recv", data.total_errors_on_received()),
                ("network.errors_sent", data.total_errors_on_transmitted()),
            ];
            for (name, value) in pairs {
                let value = value as f64;
                points.push(counter(
                    &format!("{name}_total"),
                    value,
                    now,
                    lbl.clone(),
                ));
                let source = format!("{name}:{iface}");
                if let Some(rate) = self.rates.observe(&source, value, now) {
                    points.push(gauge(&format!("{name}_per_sec"), rate, now, lbl.clone()));
                }
            }
        }

        // Interface drop counters only exist in /proc/net/dev.
        for (iface, rx_dropped, tx_dropped) in read_net_drops() {
            let lbl = label("interface", &iface);
            let pairs = [
                ("network.drops_recv", rx_dropped),
                ("network.drops_sent", tx_dropped),
            ];
            for (name, value) in pairs {
                let value = value as f64;
                points.push(counter(&format!("{name}_total"), value, now, lbl.clone()));
                let source = format!("{name}:{iface}");
                if let Some(rate) = self.rates.observe(&source, value, now) {
                    points.push(gauge(&format!("{name}_per_sec"), rate, now, lbl.clone()));
                }
            }
        }

        Ok(points)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_times() -> Vec<(String, CpuTimes)> {
    let Ok(content) = std::fs::read_to_string("/proc/stat") else {
        return Vec::new();
    };
    parse_cpu_times(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_times() -> Vec<(String, CpuTimes)> {
    Vec::new()
}

fn parse_cpu_times(content: &str) -> Vec<(String, CpuTimes)> {
    let mut out = Vec::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(core) = fields.next() else { continue };
        // Per-core rows are "cpu0".."cpuN"; the aggregate "cpu" row is
        // covered by cpu.usage already.
        if !core.starts_with("cpu") || core == "cpu" {
            continue;
        }
        let mut next = || fields.next().and_then(|f| f.parse::<u64>().ok()).unwrap_or(0);
        let times = CpuTimes {
            user: next(),
            nice: next(),
            system: next(),
            idle: next(),
            iowait: next(),
            irq: next(),
            softirq: next(),
            steal: next(),
        };
        out.push((core.to_string(), times));
    }
    out
}

#[derive(Debug)]
struct DiskIo {
    device: String,
    reads: u64,
    read_bytes: u64,
    writes: u64,
    write_bytes: u64,
}

const SECTOR_SIZE: u64 = 512;

#[cfg(target_os = "linux")]
fn read_disk_io() -> Vec<DiskIo> {
    let Ok(content) = std::fs::read_to_string("/proc/diskstats") else {
        return Vec::new();
    };
    parse_disk_io(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_disk_io() -> Vec<DiskIo> {
    Vec::new()
}

fn parse_disk_io(content: &str) -> Vec<DiskIo> {
    let mut out = Vec::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let device = fields[2];
        if device.starts_with("loop") || device.starts_with("ram") {
            continue;
        }
        let parse = |s: &str| s.parse::<u64>().unwrap_or(0);
        out.push(DiskIo {
            device: device.to_string(),
            reads: parse(fields[3]),
            read_bytes: parse(fields[5]) * SECTOR_SIZE,
            writes: parse(fields[7]),
            write_bytes: parse(fields[9]) * SECTOR_SIZE,
        });
    }
    out
}

#[cfg(target_os = "linux")]
fn read_net_drops() -> Vec<(String, u64, u64)> {
    let Ok(content) = std::fs::read_to_string("/proc/net/dev") else {
        return Vec::new();
    };
    parse_net_drops(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_net_drops() -> Vec<(String, u64, u64)> {
    Vec::new()
}

fn parse_net_drops(content: &str) -> Vec<(String, u64, u64)> {
    let mut out = Vec::new();
    for line in content.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // rx: bytes packets errs drop ...; tx starts at field 8.
        if fields.len() < 12 {
            continue;
        }
        let parse = |s: &str| s.parse::<u64>().unwrap_or(0);
        out.push((iface.trim().to_string(), parse(fields[3]), parse(fields[11])));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proc_stat_per_core_rows() {
        let content = "\
cpu  100 5 50 1000 20 0 5 0 0 0
cpu0 60 3 30 500 10 0 3 0 0 0
cpu1 40 2 20 500 10 0 2 0 0 0
intr 12345
";
        let times = parse_cpu_times(content);
        assert_eq!(times.len(), 2);
        assert_eq!(times[0].0, "cpu0");
        assert_eq!(times[0].1.user, 60);
        assert_eq!(times[0].1.iowait, 10);
        assert_eq!(times[1].1.total(), 40 + 2 + 20 + 500 + 10 + 2);
    }

    #[test]
    fn parses_diskstats_and_skips_pseudo_devices() {
        let content = "\
   8       0 sda 1000 0 20480 100 500 0 10240 50 0 0 0
   7       0 loop0 5 0 40 0 0 0 0 0 0 0 0
";
        let io = parse_disk_io(content);
        assert_eq!(io.len(), 1);
        assert_eq!(io[0].device, "sda");
        assert_eq!(io[0].reads, 1000);
        assert_eq!(io[0].read_bytes, 20480 * SECTOR_SIZE);
        assert_eq!(io[0].writes, 500);
        assert_eq!(io[0].write_bytes, 10240 * SECTOR_SIZE);
    }

    #[test]
    fn parses_net_dev_drop_columns() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
  eth0: 1000     10    0    3    0     0          0         0      2000     20    0    7    0     0       0          0
";
        let drops = parse_net_drops(content);
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0], ("eth0".to_string(), 3, 7));
    }

    #[test]
    fn emits_counter_and_rate_pairs_on_second_tick() {
        let mut tracker = RateTracker::new();
        let first = tracker.observe("network.bytes_recv:eth0", 1000.0, 1_000_000_000);
        assert!(first.is_none());
        let second = tracker
            .observe("network.bytes_recv:eth0", 3000.0, 2_000_000_000)
            .unwrap();
        assert_eq!(second, 2000.0);
    }
}
