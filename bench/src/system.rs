//! Host resource sampling from `/proc`.
//!
//! Two snapshots (run start and run end) are diffed into averages. On hosts
//! without `/proc` every figure stays at zero.

use std::time::Instant;

use crate::metrics::SystemReport;

const SECTOR_BYTES: f64 = 512.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const KB_PER_GB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DiskSectors {
    read: u64,
    written: u64,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    at: Instant,
    cpu: Option<CpuTimes>,
    disk: Option<DiskSectors>,
}

impl Snapshot {
    fn take() -> Self {
        Self {
            at: Instant::now(),
            cpu: std::fs::read_to_string("/proc/stat")
                .ok()
                .and_then(|s| parse_cpu(&s)),
            disk: std::fs::read_to_string("/proc/diskstats")
                .ok()
                .map(|s| parse_diskstats(&s, is_whole_disk)),
        }
    }
}

/// Start-to-end resource usage of the run
pub struct SystemMonitor {
    start: Snapshot,
}

impl SystemMonitor {
    pub fn start() -> Self {
        Self {
            start: Snapshot::take(),
        }
    }

    pub fn finish(&self) -> SystemReport {
        let end = Snapshot::take();
        let secs = end.at.duration_since(self.start.at).as_secs_f64();

        let cpu_percent = match (self.start.cpu, end.cpu) {
            (Some(a), Some(b)) => cpu_busy_percent(a, b),
            _ => 0.0,
        };
        let (disk_read_mb_per_sec, disk_write_mb_per_sec) = match (self.start.disk, end.disk) {
            (Some(a), Some(b)) if secs > 0.0 => (
                b.read.saturating_sub(a.read) as f64 * SECTOR_BYTES / BYTES_PER_MB / secs,
                b.written.saturating_sub(a.written) as f64 * SECTOR_BYTES / BYTES_PER_MB / secs,
            ),
            _ => (0.0, 0.0),
        };
        let memory_used_gb = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| parse_memory_used_kb(&s))
            .map_or(0.0, |kb| kb as f64 / KB_PER_GB);

        SystemReport {
            cpu_percent,
            memory_used_gb,
            disk_read_mb_per_sec,
            disk_write_mb_per_sec,
        }
    }
}

fn parse_cpu(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        total: fields.iter().sum(),
        idle,
    })
}

fn cpu_busy_percent(start: CpuTimes, end: CpuTimes) -> f64 {
    let total = end.total.saturating_sub(start.total);
    if total == 0 {
        return 0.0;
    }
    let idle = end.idle.saturating_sub(start.idle);
    (total.saturating_sub(idle)) as f64 / total as f64 * 100.0
}

fn parse_diskstats(stats: &str, include: impl Fn(&str) -> bool) -> DiskSectors {
    let mut sectors = DiskSectors::default();
    for line in stats.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 || !include(fields[2]) {
            continue;
        }
        sectors.read += fields[5].parse::<u64>().unwrap_or(0);
        sectors.written += fields[9].parse::<u64>().unwrap_or(0);
    }
    sectors
}

/// Partitions and virtual devices would double count.
fn is_whole_disk(name: &str) -> bool {
    !name.starts_with("loop")
        && !name.starts_with("ram")
        && std::path::Path::new("/sys/block").join(name).exists()
}

fn parse_memory_used_kb(meminfo: &str) -> Option<u64> {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in meminfo.lines() {
        let value = || line.split_whitespace().nth(1).and_then(|v| v.parse::<u64>().ok());
        if line.starts_with("MemTotal:") {
            total_kb = value();
        } else if line.starts_with("MemAvailable:") {
            available_kb = value();
        }
    }
    Some(total_kb?.saturating_sub(available_kb?))
}
