// bench/src/config.rs
//
// Configuration Management Module
//
// Priority order (highest to lowest):
// 1. Command-line arguments (applied by the binary via clap after load())
// 2. Environment variables (TXGRAPH__* prefix)
// 3. Config file (YAML/TOML)
// 4. Built-in defaults
//
// The resolved value is immutable for the duration of a run and is threaded
// explicitly through every component.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::workload::{OperationMix, PhasePlan};

// ============================================================================
// Main Configuration Structure
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Dataset size and shape
    pub dataset: DatasetConfig,

    /// Schema strategy used for the whole run
    pub schema: SchemaConfig,

    /// Backing store endpoint
    pub store: StoreConfig,

    /// Import phase tuning
    pub load: LoadConfig,

    /// Workload phase tuning
    pub workload: WorkloadConfig,

    /// Output artifacts
    pub report: ReportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Dataset Configuration
// ============================================================================

/// Named dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SizeTier {
    #[default]
    Xs,
    Sm,
    Md,
    Lg,
    Full,
}

impl SizeTier {
    /// `(accounts, transactions)` for the tier.
    pub fn counts(&self) -> (u64, u64) {
        match self {
            SizeTier::Xs => (100_000, 1_000_000),
            SizeTier::Sm => (1_000_000, 10_000_000),
            SizeTier::Md => (5_000_000, 50_000_000),
            SizeTier::Lg => (10_000_000, 200_000_000),
            SizeTier::Full => (30_000_000, 1_200_000_000),
        }
    }

    /// Default operation counts per workload phase. Smaller tiers run fewer
    /// operations to keep wall-clock bounded.
    pub fn phase_plan(&self) -> PhasePlan {
        let (writes, reads, traversals, time_ranges, supernodes, secs) = match self {
            SizeTier::Xs => (1_000, 500, 50, 5, 5, 5),
            SizeTier::Sm => (2_000, 1_000, 100, 10, 10, 10),
            SizeTier::Md => (5_000, 2_000, 200, 20, 20, 15),
            SizeTier::Lg => (10_000, 5_000, 300, 20, 20, 20),
            SizeTier::Full => (10_000, 10_000, 500, 30, 30, 30),
        };
        PhasePlan {
            reads,
            traversals,
            time_ranges,
            supernodes,
            post_load_writes: writes,
            concurrency_duration: Duration::from_secs(secs),
            concurrency_ops: None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeTier::Xs => "xs",
            SizeTier::Sm => "sm",
            SizeTier::Md => "md",
            SizeTier::Lg => "lg",
            SizeTier::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// Size tier; fixes account/transaction counts unless overridden
    pub size: SizeTier,

    /// Override of the tier's account count
    pub accounts: Option<u64>,

    /// Override of the tier's transaction count
    pub transactions: Option<u64>,

    /// Last day (inclusive, UTC) of the transaction window. Defaults to today.
    pub end_date: Option<NaiveDate>,

    /// Length of the transaction window in days
    pub window_days: u32,

    /// Seed for every pseudo-random stream of the run
    pub seed: u64,

    /// Zipf exponent for account selection (0 = uniform)
    pub skew: f64,

    /// Log-normal location of transfer amounts
    pub amount_mu: f64,

    /// Log-normal scale of transfer amounts
    pub amount_sigma: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            size: SizeTier::Xs,
            accounts: None,
            transactions: None,
            end_date: None,
            window_days: 365,
            seed: 42,
            skew: 1.2,
            amount_mu: 4.0,
            amount_sigma: 1.2,
        }
    }
}

impl DatasetConfig {
    pub fn account_count(&self) -> u64 {
        self.accounts.unwrap_or(self.size.counts().0)
    }

    pub fn transaction_count(&self) -> u64 {
        self.transactions.unwrap_or(self.size.counts().1)
    }

    /// `end_date` or today (UTC).
    pub fn resolved_end_date(&self) -> NaiveDate {
        self.end_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Fixes an open `end_date` to today so every later reader of the window
    /// sees the same day, even when the run crosses midnight.
    pub fn pin_end_date(&mut self) -> NaiveDate {
        *self.end_date.get_or_insert_with(|| Utc::now().date_naive())
    }

    pub fn resolved_start_date(&self) -> NaiveDate {
        let days = i64::from(self.window_days.max(1)) - 1;
        self.resolved_end_date() - ChronoDuration::days(days)
    }
}

// ============================================================================
// Schema Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    /// Transaction -FROM/TO-> Account only
    #[default]
    Direct,
    /// Adds Year -> Month -> Day -> Transaction partitioning
    Partitioned,
}

impl SchemaVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVariant::Direct => "direct",
            SchemaVariant::Partitioned => "partitioned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    pub variant: SchemaVariant,

    /// Partitioned only: per-account DailyBucket fan-out reduction
    pub daily_buckets: bool,

    /// Partitioned only: denormalized velocity/risk fields on Account
    pub aggregates: bool,
}

// ============================================================================
// Store Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Neo4j/Memgraph over Bolt
    #[default]
    Bolt,
    /// In-process property graph
    Memory,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Bolt => "bolt",
            StoreKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub kind: StoreKind,

    /// Bolt URI (bolt://host:7687 or neo4j://host:7687)
    pub uri: String,

    pub user: String,

    pub password: String,

    /// Target database; server default when omitted
    pub database: Option<String>,

    /// Connection pool size; defaults to the largest worker count + 2
    pub pool_size: Option<usize>,

    /// Rows fetched per PULL
    pub fetch_size: usize,

    /// Delete every node before importing
    pub reset_before_load: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Bolt,
            uri: "bolt://127.0.0.1:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: None,
            pool_size: None,
            fetch_size: 1_000,
            reset_before_load: false,
        }
    }
}

// ============================================================================
// Load Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    /// Records per write transaction
    pub batch_size: usize,

    /// Parallel loader workers; also the concurrency phase worker count
    pub concurrency: usize,

    /// Retries per batch after the first attempt
    pub max_retries: u32,

    /// Base backoff between retries (doubled per attempt)
    pub retry_backoff_ms: u64,

    /// Per-batch timeout
    pub batch_timeout_secs: u64,

    /// Log import progress every N records
    pub progress_every: u64,

    /// Reuse data already in the store
    pub skip_import: bool,

    /// Validate and ping only; every phase is reported as skipped
    pub dry_run: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: 5_000,
            concurrency: 10,
            max_retries: 3,
            retry_backoff_ms: 2_000,
            batch_timeout_secs: 300,
            progress_every: 100_000,
            skip_import: false,
            dry_run: false,
        }
    }
}

// ============================================================================
// Workload Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Point reads (tier default when omitted)
    pub reads: Option<u64>,

    /// Multi-hop traversals (tier default when omitted)
    pub traversals: Option<u64>,

    /// "Last N days" range queries (tier default when omitted)
    pub time_ranges: Option<u64>,

    /// Supernode queries (tier default when omitted)
    pub supernodes: Option<u64>,

    /// Concurrency phase duration (tier default when omitted)
    pub concurrency_secs: Option<u64>,

    /// Fixed operation count for the concurrency phase; overrides the duration
    pub concurrency_ops: Option<u64>,

    /// Concurrency phase workers; defaults to `load.concurrency`
    pub concurrency_workers: Option<usize>,

    /// Workers for the sequential measurement phases
    pub phase_workers: usize,

    pub traversal_hops: u32,

    /// Cap on accounts returned by one traversal
    pub traversal_limit: usize,

    pub supernode_limit: usize,

    /// Number of highest-degree accounts the supernode phase cycles through.
    ///
    /// With `dataset.skew > 0` on a large dataset these are the top Zipf
    /// ranks (accounts `0..n`). Uniform or small datasets pick them by
    /// counting degrees over the generated transaction stream.
    pub supernode_accounts: u64,

    /// Single-transaction appends after the import (tier default when omitted)
    pub post_load_writes: Option<u64>,

    /// Width of the time-range query window
    pub range_days: u32,

    pub op_timeout_ms: u64,

    /// Grace period for in-flight operations after an interrupt
    pub drain_timeout_ms: u64,

    /// A phase whose error rate exceeds this is marked degraded
    pub max_error_rate: f64,

    /// Latency samples retained per phase
    pub max_samples: usize,

    /// Operation weights for the concurrency phase
    pub mix: OperationMix,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            reads: None,
            traversals: None,
            time_ranges: None,
            supernodes: None,
            concurrency_secs: None,
            concurrency_ops: None,
            concurrency_workers: None,
            phase_workers: 1,
            traversal_hops: 2,
            traversal_limit: 1_000,
            supernode_limit: 5_000,
            supernode_accounts: 1,
            post_load_writes: None,
            range_days: 30,
            op_timeout_ms: 30_000,
            drain_timeout_ms: 2_000,
            max_error_rate: 0.05,
            max_samples: 1_000_000,
            mix: OperationMix::default(),
        }
    }
}

// ============================================================================
// Report Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// JSON report path
    pub out: PathBuf,

    /// Optional per-phase CSV summary
    pub csv: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            out: PathBuf::from("results.json"),
            csv: None,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: LogLevel,

    /// Log format (json or text)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl BenchConfig {
    /// Load configuration with priority chain:
    /// 1. Environment variables (TXGRAPH__*)
    /// 2. Config file (if provided)
    /// 3. Built-in defaults
    ///
    /// The result is not validated; callers apply CLI overrides first and then
    /// call [`BenchConfig::validate`].
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let defaults = Self::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize defaults")?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TXGRAPH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("Failed to build config")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize config")
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.load.batch_size > 0,
            "load.batch_size must be > 0, got {}",
            self.load.batch_size
        );
        anyhow::ensure!(
            self.load.concurrency > 0,
            "load.concurrency must be > 0, got {}",
            self.load.concurrency
        );
        anyhow::ensure!(
            self.load.batch_timeout_secs > 0,
            "load.batch_timeout_secs must be > 0"
        );
        anyhow::ensure!(
            self.load.progress_every > 0,
            "load.progress_every must be > 0"
        );

        if let Some(workers) = self.workload.concurrency_workers {
            anyhow::ensure!(workers > 0, "workload.concurrency_workers must be > 0");
        }
        anyhow::ensure!(
            self.workload.phase_workers > 0,
            "workload.phase_workers must be > 0"
        );
        anyhow::ensure!(
            self.workload.traversal_hops > 0,
            "workload.traversal_hops must be > 0"
        );
        anyhow::ensure!(
            self.workload.traversal_limit > 0 && self.workload.supernode_limit > 0,
            "workload traversal_limit and supernode_limit must be > 0"
        );
        anyhow::ensure!(
            self.workload.supernode_accounts > 0,
            "workload.supernode_accounts must be > 0"
        );
        anyhow::ensure!(
            self.workload.range_days > 0,
            "workload.range_days must be > 0"
        );
        anyhow::ensure!(
            self.workload.op_timeout_ms > 0,
            "workload.op_timeout_ms must be > 0"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.workload.max_error_rate),
            "workload.max_error_rate must be within [0, 1], got {}",
            self.workload.max_error_rate
        );
        anyhow::ensure!(
            self.workload.max_samples > 0,
            "workload.max_samples must be > 0"
        );
        anyhow::ensure!(
            self.workload.mix.total() > 0,
            "workload.mix must have at least one non-zero weight"
        );

        if self.schema.variant == SchemaVariant::Direct {
            anyhow::ensure!(
                !self.schema.daily_buckets && !self.schema.aggregates,
                "schema.daily_buckets and schema.aggregates require the partitioned schema"
            );
        }

        if self.store.kind == StoreKind::Bolt {
            anyhow::ensure!(
                !self.store.uri.trim().is_empty(),
                "store.uri cannot be empty"
            );
        }
        if let Some(pool) = self.store.pool_size {
            anyhow::ensure!(
                pool >= self.concurrency_workers(),
                "store.pool_size ({}) must be >= worker count ({}) to avoid client-side queueing",
                pool,
                self.concurrency_workers()
            );
        }

        anyhow::ensure!(
            !self.report.out.as_os_str().is_empty(),
            "report.out cannot be empty"
        );

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived values
    // ------------------------------------------------------------------------

    pub fn concurrency_workers(&self) -> usize {
        self.workload
            .concurrency_workers
            .unwrap_or(self.load.concurrency)
    }

    /// Pool size large enough for the busiest phase.
    pub fn pool_size(&self) -> usize {
        self.store.pool_size.unwrap_or_else(|| {
            self.load
                .concurrency
                .max(self.concurrency_workers())
                .max(self.workload.phase_workers)
                + 2
        })
    }

    /// Tier plan with per-phase overrides applied.
    pub fn phase_plan(&self) -> PhasePlan {
        let mut plan = self.dataset.size.phase_plan();
        if let Some(n) = self.workload.reads {
            plan.reads = n;
        }
        if let Some(n) = self.workload.traversals {
            plan.traversals = n;
        }
        if let Some(n) = self.workload.time_ranges {
            plan.time_ranges = n;
        }
        if let Some(n) = self.workload.supernodes {
            plan.supernodes = n;
        }
        if let Some(n) = self.workload.post_load_writes {
            plan.post_load_writes = n;
        }
        if let Some(secs) = self.workload.concurrency_secs {
            plan.concurrency_duration = Duration::from_secs(secs);
        }
        plan.concurrency_ops = self.workload.concurrency_ops;
        plan
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.workload.op_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.workload.drain_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.load.retry_backoff_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.load.batch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = BenchConfig::default();
        config.validate().expect("Default config should be valid");
    }

    #[test]
    fn test_tier_counts() {
        assert_eq!(SizeTier::Xs.counts(), (100_000, 1_000_000));
        assert_eq!(SizeTier::Full.counts(), (30_000_000, 1_200_000_000));
    }

    #[test]
    fn test_smaller_tiers_run_fewer_operations() {
        let xs = SizeTier::Xs.phase_plan();
        let full = SizeTier::Full.phase_plan();
        assert!(xs.reads < full.reads);
        assert!(xs.traversals < full.traversals);
        assert!(xs.concurrency_duration < full.concurrency_duration);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = BenchConfig::default();
        config.dataset.accounts = Some(1_000);
        config.dataset.transactions = Some(10_000);
        config.workload.reads = Some(100);
        config.workload.post_load_writes = Some(7);
        config.workload.concurrency_ops = Some(50);

        assert_eq!(config.dataset.account_count(), 1_000);
        assert_eq!(config.dataset.transaction_count(), 10_000);
        let plan = config.phase_plan();
        assert_eq!(plan.reads, 100);
        assert_eq!(plan.post_load_writes, 7);
        assert_eq!(plan.traversals, 50);
        assert_eq!(plan.concurrency_ops, Some(50));
    }

    #[test]
    fn test_invalid_batch_size() {
        let mut config = BenchConfig::default();
        config.load.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buckets_require_partitioned_schema() {
        let mut config = BenchConfig::default();
        config.schema.daily_buckets = true;
        assert!(config.validate().is_err());
        config.schema.variant = SchemaVariant::Partitioned;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_must_cover_workers() {
        let mut config = BenchConfig::default();
        config.load.concurrency = 16;
        config.store.pool_size = Some(8);
        assert!(config.validate().is_err());

        config.store.pool_size = None;
        assert!(config.pool_size() >= 16);
    }

    #[test]
    fn test_window_dates() {
        let mut config = BenchConfig::default();
        config.dataset.end_date = NaiveDate::from_ymd_opt(2024, 12, 31);
        config.dataset.window_days = 365;
        assert_eq!(
            config.dataset.resolved_start_date(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }

    #[test]
    fn test_pinned_end_date_stays_fixed() {
        let mut config = BenchConfig::default();
        assert!(config.dataset.end_date.is_none());
        let pinned = config.dataset.pin_end_date();
        assert_eq!(config.dataset.end_date, Some(pinned));
        assert_eq!(config.dataset.resolved_end_date(), pinned);

        let explicit = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        config.dataset.end_date = Some(explicit);
        assert_eq!(config.dataset.pin_end_date(), explicit);
    }

    #[test]
    fn test_load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(
            &path,
            r#"
[dataset]
size = "sm"
seed = 7

[schema]
variant = "partitioned"
daily_buckets = true

[load]
batch_size = 250
"#,
        )
        .unwrap();

        let config = BenchConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.dataset.size, SizeTier::Sm);
        assert_eq!(config.dataset.seed, 7);
        assert_eq!(config.schema.variant, SchemaVariant::Partitioned);
        assert!(config.schema.daily_buckets);
        assert_eq!(config.load.batch_size, 250);
        assert_eq!(config.load.concurrency, 10);
        config.validate().unwrap();
    }
}
