//! Benchmark orchestration.
//!
//! ```text
//! ping -> [reset] -> indexes -> import -> post_load -> reads -> traversal
//!      -> time_range -> supernode -> concurrency
//! ```
//!
//! Phases run strictly in sequence; a phase starts only after every worker of
//! the previous one has finished. The runner never returns early without a
//! report: a fatal error marks the failing phase, every later phase is
//! reported as skipped and degraded, and the error travels alongside the
//! report in [`RunOutcome`].

use chrono::{SecondsFormat, Utc};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub mod executor;
pub mod loader;

pub use executor::{Budget, ExecutorSettings, PhaseOutcome, WorkloadExecutor};
pub use loader::{BulkLoader, LoadAborted, LoadSettings, LoadStats};

use crate::client::GraphClient;
use crate::config::BenchConfig;
use crate::error::{BenchError, StoreError};
use crate::metrics::report::rate;
use crate::metrics::{ImportReport, Phase, PhaseReport, PhaseStatus, RunMetadata, RunReport};
use crate::model::{AggregateWindows, SECS_PER_DAY};
use crate::schema::{create_schema, SchemaStrategy};
use crate::system::SystemMonitor;
use crate::workload::{
    DatasetGenerator, DatasetSpec, OperationKind, PhasePlan, WorkloadContext, WorkloadKind,
};

/// Lowest id of transactions appended after the import; clear of every tier.
const POST_LOAD_FIRST_ID: u64 = 2_000_000_000;

/// Datasets up to this many transactions get exact supernode degrees.
const DEGREE_SCAN_LIMIT: u64 = 10_000_000;

/// The report of a run and the fatal error that ended it, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<BenchError>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, BenchError::exit_code)
    }
}

/// Benchmark runner orchestrates benchmark execution
pub struct BenchmarkRunner {
    config: BenchConfig,
    client: Arc<dyn GraphClient>,
}

impl BenchmarkRunner {
    /// An open `dataset.end_date` is pinned here, once per run.
    pub fn new(mut config: BenchConfig, client: Arc<dyn GraphClient>) -> Self {
        config.dataset.pin_end_date();
        Self { config, client }
    }

    #[instrument(level = "info", skip_all, fields(store = self.client.name(), schema = self.config.schema.variant.as_str()))]
    pub async fn run(&self, cancel: &CancellationToken) -> RunOutcome {
        let monitor = SystemMonitor::start();
        let started = Instant::now();
        let spec = DatasetSpec::from_config(&self.config.dataset);
        let mut report = RunReport::new(run_metadata(&self.config, &spec));

        let result = match DatasetGenerator::new(spec) {
            Ok(generator) => self.run_phases(&generator, &mut report, cancel).await,
            Err(e) => Err(e),
        };
        let error = result.err();
        finalize(&mut report, error.as_ref(), started);
        report.system_metrics = monitor.finish();
        RunOutcome { report, error }
    }

    async fn run_phases(
        &self,
        generator: &DatasetGenerator,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<(), BenchError> {
        let spec = generator.spec();
        let windows = AggregateWindows {
            as_of: spec.window_end(),
        };
        let schema = create_schema(&self.config.schema, windows, Arc::clone(&self.client));

        self.client.ping().await.map_err(fatal_store_error)?;
        info!(store = self.client.name(), "Store reachable");

        if self.config.load.dry_run {
            info!("Dry run: configuration valid and store reachable; no phase executed");
            return Ok(());
        }

        if self.config.load.skip_import {
            info!("Skipping import; measuring against existing data");
        } else {
            self.import(generator, &schema, windows, report, cancel).await?;
        }

        let plan = self.config.phase_plan();
        let stored = self.client.counts().await.map_err(fatal_store_error)?;
        let ctx = self.workload_context(generator, stored.transactions)?;
        for phase in Phase::WORKLOAD {
            if cancel.is_cancelled() {
                return Err(BenchError::Interrupted);
            }
            self.measure(phase, &plan, &ctx, &schema, report, cancel).await?;
        }
        Ok(())
    }

    async fn import(
        &self,
        generator: &DatasetGenerator,
        schema: &Arc<dyn SchemaStrategy>,
        windows: AggregateWindows,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<(), BenchError> {
        if self.config.store.reset_before_load {
            warn!("Clearing the graph before import");
            self.client.reset().await.map_err(fatal_store_error)?;
        }
        self.client
            .ensure_indexes(&schema.index_specs())
            .await
            .map_err(fatal_store_error)?;

        let loader = BulkLoader::new(Arc::clone(schema), self.load_settings());
        match loader.load(generator, windows, cancel).await {
            Ok(stats) => {
                report.writes = import_report(&stats);
                report.writes.set_status(PhaseStatus::Completed);
                info!(
                    transactions = stats.transactions,
                    tps = report.writes.transactions_per_sec,
                    secs = stats.elapsed.as_secs_f64(),
                    "Import complete"
                );
                Ok(())
            }
            Err(LoadAborted { error, stats }) => {
                report.writes = import_report(&stats);
                report.writes.set_status(status_for(&error));
                // Everything up to the abort point may already be committed.
                report.writes.partial_data = stats.batches > 0 || error.leaves_partial_data();
                report.writes.error = Some(error.to_string());
                Err(error)
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(%phase))]
    async fn measure(
        &self,
        phase: Phase,
        plan: &PhasePlan,
        ctx: &WorkloadContext,
        schema: &Arc<dyn SchemaStrategy>,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<(), BenchError> {
        let workload = &self.config.workload;
        let (kind, budget, workers) = match phase {
            Phase::PostLoad => (
                WorkloadKind::Only(OperationKind::Write),
                Budget::Operations(plan.post_load_writes),
                workload.phase_workers,
            ),
            Phase::Reads => (
                WorkloadKind::Only(OperationKind::PointRead),
                Budget::Operations(plan.reads),
                workload.phase_workers,
            ),
            Phase::Traversal => (
                WorkloadKind::Only(OperationKind::Traversal),
                Budget::Operations(plan.traversals),
                workload.phase_workers,
            ),
            Phase::TimeRange => (
                WorkloadKind::Only(OperationKind::TimeRange),
                Budget::Operations(plan.time_ranges),
                workload.phase_workers,
            ),
            Phase::Supernode => (
                WorkloadKind::Only(OperationKind::Supernode),
                Budget::Operations(plan.supernodes),
                workload.phase_workers,
            ),
            Phase::Concurrency => (
                WorkloadKind::Mixed,
                plan.concurrency_ops
                    .map_or(Budget::Duration(plan.concurrency_duration), Budget::Operations),
                self.config.concurrency_workers(),
            ),
            Phase::Writes => return Ok(()),
        };

        info!(?budget, workers, "Starting phase");
        let executor = WorkloadExecutor::new(
            Arc::clone(schema),
            ExecutorSettings {
                workers,
                op_timeout: self.config.op_timeout(),
                drain_timeout: self.config.drain_timeout(),
                max_samples: workload.max_samples,
                seed: self.config.dataset.seed,
            },
        );

        let outcome = match executor.execute(phase, kind, ctx, budget, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(section) = report.phase_mut(phase) {
                    section.set_status(PhaseStatus::Failed);
                }
                return Err(e);
            }
        };

        let section = phase_report(phase, &outcome, workload.max_error_rate);
        info!(
            status = section.status.as_str(),
            count = section.count,
            errors = section.errors,
            ops_per_sec = section.ops_per_sec,
            p99_ms = section.latency.as_ref().map(|l| l.p99_ms),
            "Phase finished"
        );
        if section.status == PhaseStatus::Degraded {
            warn!(
                error_rate = section.error_rate,
                threshold = workload.max_error_rate,
                "Phase error rate above threshold"
            );
        }
        if let Some(slot) = report.phase_mut(phase) {
            *slot = section;
        }

        if let Some(lost) = outcome.connection_lost {
            return Err(BenchError::ConnectionLost(lost));
        }
        if outcome.interrupted {
            return Err(BenchError::Interrupted);
        }
        Ok(())
    }

    fn load_settings(&self) -> LoadSettings {
        LoadSettings {
            batch_size: self.config.load.batch_size,
            concurrency: self.config.load.concurrency,
            max_retries: self.config.load.max_retries,
            retry_backoff: self.config.retry_backoff(),
            batch_timeout: self.config.batch_timeout(),
            progress_every: self.config.load.progress_every,
        }
    }

    /// Appended ids start after the imported range and after whatever earlier
    /// runs appended, so repeated `--skip-import` runs never reuse an id.
    fn workload_context(
        &self,
        generator: &DatasetGenerator,
        stored_transactions: u64,
    ) -> Result<WorkloadContext, BenchError> {
        let workload = &self.config.workload;
        let spec = generator.spec();
        Ok(WorkloadContext {
            account_count: spec.account_count,
            traversal_hops: workload.traversal_hops,
            traversal_limit: workload.traversal_limit,
            supernode_limit: workload.supernode_limit,
            supernodes: supernode_accounts(generator, workload.supernode_accounts)?,
            range_since: spec.window_end() - i64::from(workload.range_days) * SECS_PER_DAY,
            mix: workload.mix,
            skew: spec.skew,
            amount_mu: spec.amount_mu,
            amount_sigma: spec.amount_sigma,
            write_day_start: spec.window_end() - SECS_PER_DAY,
            next_write_id: Arc::new(AtomicU64::new(
                spec.transaction_count.max(POST_LOAD_FIRST_ID) + stored_transactions,
            )),
        })
    }
}

/// Supernode targets, busiest first.
///
/// Under a skewed distribution account `r` is Zipf rank `r + 1`, so the
/// leading ids are the expected hubs. Uniform datasets have no such ordering,
/// and small ones are cheap to count exactly, so both replay the transaction
/// stream instead.
fn supernode_accounts(generator: &DatasetGenerator, wanted: u64) -> Result<Vec<u64>, BenchError> {
    let spec = generator.spec();
    let k = wanted.clamp(1, spec.account_count);
    if spec.skew > 0.0 && spec.transaction_count > DEGREE_SCAN_LIMIT {
        return Ok((0..k).collect());
    }
    let started = Instant::now();
    let top = generator.top_degree_accounts(k as usize)?;
    info!(
        accounts = top.len(),
        secs = started.elapsed().as_secs_f64(),
        "Supernodes picked by degree"
    );
    Ok(top)
}

/// Outcome of a run that failed before the store was reached.
pub fn aborted(config: &BenchConfig, error: BenchError) -> RunOutcome {
    let spec = DatasetSpec::from_config(&config.dataset);
    let mut report = RunReport::new(run_metadata(config, &spec));
    finalize(&mut report, Some(&error), Instant::now());
    RunOutcome {
        report,
        error: Some(error),
    }
}

fn run_metadata(config: &BenchConfig, spec: &DatasetSpec) -> RunMetadata {
    RunMetadata {
        tool: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        size: config.dataset.size.as_str().to_string(),
        schema: config.schema.variant.as_str().to_string(),
        daily_buckets: config.schema.daily_buckets,
        aggregates: config.schema.aggregates,
        store: config.store.kind.as_str().to_string(),
        accounts: spec.account_count,
        transactions: spec.transaction_count,
        batch_size: config.load.batch_size,
        concurrency: config.concurrency_workers(),
        seed: spec.seed,
        skew: spec.skew,
        window_start: spec.start_date.to_string(),
        window_end: spec.end_date.to_string(),
        started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        finished_at: None,
        duration_secs: 0.0,
        degraded: false,
        error: None,
        exit_code: 0,
    }
}

fn finalize(report: &mut RunReport, error: Option<&BenchError>, started: Instant) {
    if let Some(e) = error {
        error!(error = %e, exit_code = e.exit_code(), "Benchmark run aborted");
        mark_remaining_skipped(report);
    }
    let degraded = error.is_some() || any_phase_degraded(report);
    let run = &mut report.run;
    run.finished_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    run.duration_secs = started.elapsed().as_secs_f64();
    run.error = error.map(ToString::to_string);
    run.exit_code = error.map_or(0, BenchError::exit_code);
    run.degraded = degraded;
}

fn import_report(stats: &LoadStats) -> ImportReport {
    let elapsed = stats.elapsed;
    ImportReport {
        accounts: stats.accounts,
        transactions: stats.transactions,
        relationships: stats.relationships,
        batches: stats.batches,
        retries: stats.retries,
        duration_secs: elapsed.as_secs_f64(),
        accounts_per_sec: rate(stats.accounts, stats.accounts_elapsed),
        transactions_per_sec: rate(stats.transactions, stats.transactions_elapsed),
        nodes_per_sec: rate(stats.accounts + stats.transactions, elapsed),
        relationships_per_sec: rate(stats.relationships, elapsed),
        aggregate_refresh_secs: stats.aggregate_refresh.map(|d| d.as_secs_f64()),
        ..ImportReport::skipped()
    }
}

/// Turns raw measurements into a report section and decides its status.
pub fn phase_report(phase: Phase, outcome: &PhaseOutcome, max_error_rate: f64) -> PhaseReport {
    let count = outcome.recorder.count(phase);
    let errors = outcome.recorder.errors(phase);
    let attempted = count + errors;
    let error_rate = if attempted > 0 {
        errors as f64 / attempted as f64
    } else {
        0.0
    };

    let status = if outcome.connection_lost.is_some() {
        PhaseStatus::Failed
    } else if outcome.interrupted {
        PhaseStatus::Interrupted
    } else if error_rate > max_error_rate {
        PhaseStatus::Degraded
    } else {
        PhaseStatus::Completed
    };

    let mut report = PhaseReport {
        count,
        errors,
        error_rate,
        duration_secs: outcome.elapsed.as_secs_f64(),
        ops_per_sec: rate(count, outcome.elapsed),
        workers: outcome.workers,
        rows: outcome.rows,
        latency: outcome.recorder.summarize(phase),
        ..PhaseReport::skipped()
    };
    report.set_status(status);
    report
}

fn status_for(error: &BenchError) -> PhaseStatus {
    match error {
        BenchError::Interrupted => PhaseStatus::Interrupted,
        _ => PhaseStatus::Failed,
    }
}

fn fatal_store_error(error: StoreError) -> BenchError {
    if error.is_connection_loss() {
        BenchError::ConnectionLost(error)
    } else {
        BenchError::Operation(error)
    }
}

/// After an abort, phases that never ran still carry numbers nobody measured.
fn mark_remaining_skipped(report: &mut RunReport) {
    if report.writes.status == PhaseStatus::Skipped {
        report.writes.degraded = true;
    }
    for phase in Phase::WORKLOAD {
        if let Some(section) = report.phase_mut(phase) {
            if section.status == PhaseStatus::Skipped {
                section.degraded = true;
            }
        }
    }
}

fn any_phase_degraded(report: &RunReport) -> bool {
    report.writes.degraded
        || Phase::WORKLOAD
            .iter()
            .filter_map(|p| report.phase(*p))
            .any(|p| p.degraded)
}
