//! The run's single output artifact.
//!
//! Every top-level key is always present: phases that did not run are
//! reported with status `skipped` (and a `null` latency block) rather than
//! omitted, so comparison tooling can rely on the shape.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

use super::{LatencySummary, Phase};
use crate::error::BenchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    /// Ran to completion with an error rate above the threshold.
    Degraded,
    /// Stopped early by an external interrupt.
    Interrupted,
    /// Never started.
    Skipped,
    /// Aborted by a fatal error.
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Completed => "completed",
            PhaseStatus::Degraded => "degraded",
            PhaseStatus::Interrupted => "interrupted",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "failed",
        }
    }

    /// Anything but a clean completion taints the phase's numbers.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, PhaseStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub tool: String,
    pub version: String,
    pub size: String,
    pub schema: String,
    pub daily_buckets: bool,
    pub aggregates: bool,
    pub store: String,
    pub accounts: u64,
    pub transactions: u64,
    pub batch_size: usize,
    pub concurrency: usize,
    pub seed: u64,
    pub skew: f64,
    pub window_start: String,
    pub window_end: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_secs: f64,
    pub degraded: bool,
    pub error: Option<String>,
    pub exit_code: i32,
}

/// Import phase throughput
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub status: PhaseStatus,
    pub degraded: bool,
    /// The store may hold an incomplete dataset.
    pub partial_data: bool,
    pub accounts: u64,
    pub transactions: u64,
    pub relationships: u64,
    pub batches: u64,
    pub retries: u64,
    pub duration_secs: f64,
    pub accounts_per_sec: f64,
    /// Write TPS
    pub transactions_per_sec: f64,
    pub nodes_per_sec: f64,
    pub relationships_per_sec: f64,
    pub aggregate_refresh_secs: Option<f64>,
    pub error: Option<String>,
    /// Write TPS and latency of appends to the already loaded graph
    pub post_load: PhaseReport,
}

impl ImportReport {
    pub fn skipped() -> Self {
        Self {
            status: PhaseStatus::Skipped,
            degraded: false,
            partial_data: false,
            accounts: 0,
            transactions: 0,
            relationships: 0,
            batches: 0,
            retries: 0,
            duration_secs: 0.0,
            accounts_per_sec: 0.0,
            transactions_per_sec: 0.0,
            nodes_per_sec: 0.0,
            relationships_per_sec: 0.0,
            aggregate_refresh_secs: None,
            error: None,
            post_load: PhaseReport::skipped(),
        }
    }

    pub fn set_status(&mut self, status: PhaseStatus) {
        self.status = status;
        self.degraded = status.is_degraded() && status != PhaseStatus::Skipped;
    }
}

/// Measurement phase results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub status: PhaseStatus,
    pub degraded: bool,
    /// Successful operations
    pub count: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub duration_secs: f64,
    pub ops_per_sec: f64,
    pub workers: usize,
    /// Rows returned across all successful operations
    pub rows: u64,
    pub latency: Option<LatencySummary>,
}

impl PhaseReport {
    pub fn skipped() -> Self {
        Self {
            status: PhaseStatus::Skipped,
            degraded: false,
            count: 0,
            errors: 0,
            error_rate: 0.0,
            duration_secs: 0.0,
            ops_per_sec: 0.0,
            workers: 0,
            rows: 0,
            latency: None,
        }
    }

    pub fn set_status(&mut self, status: PhaseStatus) {
        self.status = status;
        self.degraded = status.is_degraded() && status != PhaseStatus::Skipped;
    }

    pub fn attempted(&self) -> u64 {
        self.count + self.errors
    }
}

/// Host resource usage between run start and end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemReport {
    pub cpu_percent: f64,
    pub memory_used_gb: f64,
    pub disk_read_mb_per_sec: f64,
    pub disk_write_mb_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunMetadata,
    pub writes: ImportReport,
    pub reads: PhaseReport,
    pub traversal: PhaseReport,
    pub time_range: PhaseReport,
    pub supernode: PhaseReport,
    pub concurrency: PhaseReport,
    pub system_metrics: SystemReport,
}

impl RunReport {
    pub fn new(run: RunMetadata) -> Self {
        Self {
            run,
            writes: ImportReport::skipped(),
            reads: PhaseReport::skipped(),
            traversal: PhaseReport::skipped(),
            time_range: PhaseReport::skipped(),
            supernode: PhaseReport::skipped(),
            concurrency: PhaseReport::skipped(),
            system_metrics: SystemReport::default(),
        }
    }

    /// Measurement phase section; `None` for [`Phase::Writes`].
    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        match phase {
            Phase::Writes => None,
            Phase::PostLoad => Some(&self.writes.post_load),
            Phase::Reads => Some(&self.reads),
            Phase::Traversal => Some(&self.traversal),
            Phase::TimeRange => Some(&self.time_range),
            Phase::Supernode => Some(&self.supernode),
            Phase::Concurrency => Some(&self.concurrency),
        }
    }

    pub fn phase_mut(&mut self, phase: Phase) -> Option<&mut PhaseReport> {
        match phase {
            Phase::Writes => None,
            Phase::PostLoad => Some(&mut self.writes.post_load),
            Phase::Reads => Some(&mut self.reads),
            Phase::Traversal => Some(&mut self.traversal),
            Phase::TimeRange => Some(&mut self.time_range),
            Phase::Supernode => Some(&mut self.supernode),
            Phase::Concurrency => Some(&mut self.concurrency),
        }
    }

    /// Write the report as pretty JSON (atomic: write to temp, then rename).
    #[instrument(level = "debug", skip_all)]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BenchError> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self).map_err(|e| report_error(path, e.into()))?;
        write_atomic(path, &json)
    }

    /// One line per phase, for spreadsheets.
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<(), BenchError> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut rows = vec![CsvRow {
            phase: Phase::Writes.key(),
            status: self.writes.status.as_str(),
            count: self.writes.transactions,
            errors: 0,
            duration_secs: self.writes.duration_secs,
            ops_per_sec: self.writes.transactions_per_sec,
            mean_ms: None,
            p50_ms: None,
            p95_ms: None,
            p99_ms: None,
            max_ms: None,
        }];
        for phase in Phase::WORKLOAD {
            if let Some(report) = self.phase(phase) {
                let latency = report.latency.as_ref();
                rows.push(CsvRow {
                    phase: phase.key(),
                    status: report.status.as_str(),
                    count: report.count,
                    errors: report.errors,
                    duration_secs: report.duration_secs,
                    ops_per_sec: report.ops_per_sec,
                    mean_ms: latency.map(|l| l.mean_ms),
                    p50_ms: latency.map(|l| l.p50_ms),
                    p95_ms: latency.map(|l| l.p95_ms),
                    p99_ms: latency.map(|l| l.p99_ms),
                    max_ms: latency.map(|l| l.max_ms),
                });
            }
        }
        for row in &rows {
            writer
                .serialize(row)
                .map_err(|e| report_error(path, std::io::Error::other(e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| report_error(path, std::io::Error::other(e.to_string())))?;
        write_atomic(path, &bytes)
    }
}

#[derive(Serialize)]
struct CsvRow {
    phase: &'static str,
    status: &'static str,
    count: u64,
    errors: u64,
    duration_secs: f64,
    ops_per_sec: f64,
    mean_ms: Option<f64>,
    p50_ms: Option<f64>,
    p95_ms: Option<f64>,
    p99_ms: Option<f64>,
    max_ms: Option<f64>,
}

fn report_error(path: &Path, source: std::io::Error) -> BenchError {
    BenchError::Report {
        path: path.to_path_buf(),
        source,
    }
}

/// Readers of `path` see either the previous content or the complete new one.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BenchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| report_error(path, e))?;
    }
    let temp_path = temp_path_for(path);

    let result = (|| -> std::io::Result<()> {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        std::fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(report_error(path, e));
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Operations per second over `elapsed`, 0 for an empty interval.
pub fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RunMetadata {
        RunMetadata {
            tool: "txgraph-bench".into(),
            version: "test".into(),
            size: "xs".into(),
            schema: "direct".into(),
            daily_buckets: false,
            aggregates: false,
            store: "memory".into(),
            accounts: 10,
            transactions: 100,
            batch_size: 5,
            concurrency: 2,
            seed: 42,
            skew: 1.2,
            window_start: "2024-01-01".into(),
            window_end: "2024-12-31".into(),
            started_at: "2024-12-31T00:00:00Z".into(),
            finished_at: None,
            duration_secs: 0.0,
            degraded: false,
            error: None,
            exit_code: 0,
        }
    }

    #[test]
    fn skipped_report_has_every_top_level_key() {
        let report = RunReport::new(metadata());
        let value = serde_json::to_value(&report).unwrap();
        for key in [
            "run",
            "writes",
            "reads",
            "traversal",
            "time_range",
            "supernode",
            "concurrency",
            "system_metrics",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["reads"]["status"], "skipped");
        assert!(value["reads"]["latency"].is_null());
        assert_eq!(value["reads"]["degraded"], false);
        assert_eq!(value["writes"]["post_load"]["status"], "skipped");
    }

    #[test]
    fn save_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.json");
        let mut report = RunReport::new(metadata());
        report.save(&path).unwrap();

        report.reads.count = 100;
        report.save(&path).unwrap();

        let parsed: RunReport = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.reads.count, 100);
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn csv_has_one_row_per_phase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        RunReport::new(metadata()).save_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1 + 7);
        assert!(text.starts_with("phase,status,count"));
    }

    #[test]
    fn degraded_flag_follows_status() {
        let mut phase = PhaseReport::skipped();
        phase.set_status(PhaseStatus::Interrupted);
        assert!(phase.degraded);
        phase.set_status(PhaseStatus::Completed);
        assert!(!phase.degraded);
    }
}
