use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::WriteAck;
use crate::error::{BenchError, StoreError};
use crate::model::{Account, AggregateWindows, Transaction};
use crate::schema::SchemaStrategy;
use crate::workload::{batched, DatasetGenerator};

/// Upper bound for a single retry backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub batch_size: usize,
    /// Batches in flight at once
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub batch_timeout: Duration,
    pub progress_every: u64,
}

impl LoadSettings {
    /// Exponential backoff: base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// What the import wrote and how long it took
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    pub accounts: u64,
    pub transactions: u64,
    pub relationships: u64,
    pub batches: u64,
    pub retries: u64,
    pub accounts_elapsed: Duration,
    pub transactions_elapsed: Duration,
    pub elapsed: Duration,
    pub aggregate_refresh: Option<Duration>,
}

impl LoadStats {
    fn absorb(&mut self, ack: WriteAck) {
        self.accounts += ack.accounts;
        self.transactions += ack.transactions;
        self.relationships += ack.relationships;
        self.batches += 1;
    }
}

/// A failed import with whatever was written before the failure.
#[derive(Debug)]
pub struct LoadAborted {
    pub error: BenchError,
    pub stats: LoadStats,
}

enum Entities {
    Accounts(Vec<Account>),
    Transactions(Vec<Transaction>),
}

impl Entities {
    fn describe(&self) -> String {
        match self {
            Entities::Accounts(a) => match (a.first(), a.last()) {
                (Some(first), Some(last)) => format!("account batch {}..={}", first.id, last.id),
                _ => "empty account batch".to_string(),
            },
            Entities::Transactions(t) => match (t.first(), t.last()) {
                (Some(first), Some(last)) => format!("transaction batch {}..={}", first.id, last.id),
                _ => "empty transaction batch".to_string(),
            },
        }
    }

    fn len(&self) -> u64 {
        match self {
            Entities::Accounts(a) => a.len() as u64,
            Entities::Transactions(t) => t.len() as u64,
        }
    }

    async fn write(&self, schema: &dyn SchemaStrategy) -> Result<WriteAck, StoreError> {
        match self {
            Entities::Accounts(accounts) => schema.write_accounts(accounts).await,
            Entities::Transactions(txns) => schema.write_transactions(txns).await,
        }
    }
}

/// Streams the generator into the store through the active schema.
///
/// Accounts are fully written before the first transaction batch starts, so
/// every FROM/TO endpoint exists. Within a stage up to `concurrency` batches
/// run in parallel; workers share only the schema (and through it the
/// connection pool) plus atomic counters.
pub struct BulkLoader {
    schema: Arc<dyn SchemaStrategy>,
    settings: LoadSettings,
    progress: Arc<AtomicU64>,
    retries: Arc<AtomicU64>,
}

impl BulkLoader {
    pub fn new(schema: Arc<dyn SchemaStrategy>, settings: LoadSettings) -> Self {
        Self {
            schema,
            settings,
            progress: Arc::new(AtomicU64::new(0)),
            retries: Arc::new(AtomicU64::new(0)),
        }
    }

    #[instrument(level = "info", skip_all, fields(schema = self.schema.variant().as_str()))]
    pub async fn load(
        &self,
        generator: &DatasetGenerator,
        windows: AggregateWindows,
        cancel: &CancellationToken,
    ) -> Result<LoadStats, LoadAborted> {
        let mut stats = LoadStats::default();
        let started = Instant::now();
        let result = self.load_into(generator, windows, cancel, &mut stats).await;
        stats.retries = self.retries.load(Ordering::Relaxed);
        stats.elapsed = started.elapsed();
        match result {
            Ok(()) => Ok(stats),
            Err(error) => Err(LoadAborted { error, stats }),
        }
    }

    async fn load_into(
        &self,
        generator: &DatasetGenerator,
        windows: AggregateWindows,
        cancel: &CancellationToken,
        stats: &mut LoadStats,
    ) -> Result<(), BenchError> {
        let calendar = generator.calendar();
        self.with_retry("temporal hierarchy", cancel, || self.schema.prepare(&calendar))
            .await?;

        let spec = generator.spec();
        info!(
            accounts = spec.account_count,
            transactions = spec.transaction_count,
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            "Starting import"
        );

        let stage_start = Instant::now();
        let accounts = batched(generator.accounts(), self.settings.batch_size).map(Entities::Accounts);
        self.run_stage(accounts, spec.account_count, cancel, stats).await?;
        stats.accounts_elapsed = stage_start.elapsed();
        info!(
            accounts = stats.accounts,
            secs = stats.accounts_elapsed.as_secs_f64(),
            "Accounts imported"
        );

        self.progress.store(0, Ordering::Relaxed);
        let stage_start = Instant::now();
        let txns = generator.transactions()?;
        let txns = batched(txns, self.settings.batch_size).map(Entities::Transactions);
        self.run_stage(txns, spec.transaction_count, cancel, stats).await?;
        stats.transactions_elapsed = stage_start.elapsed();
        info!(
            transactions = stats.transactions,
            secs = stats.transactions_elapsed.as_secs_f64(),
            "Transactions imported"
        );

        let refresh_start = Instant::now();
        let refreshed = self
            .with_retry("aggregate refresh", cancel, || self.schema.finish_load(windows))
            .await?;
        if let Some(accounts) = refreshed {
            let took = refresh_start.elapsed();
            stats.aggregate_refresh = Some(took);
            info!(accounts, secs = took.as_secs_f64(), "Aggregates refreshed");
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        batches: impl Iterator<Item = Entities>,
        total: u64,
        cancel: &CancellationToken,
        stats: &mut LoadStats,
    ) -> Result<(), BenchError> {
        let mut in_flight: JoinSet<Result<WriteAck, BenchError>> = JoinSet::new();

        for entities in batches {
            if cancel.is_cancelled() {
                in_flight.shutdown().await;
                return Err(BenchError::Interrupted);
            }
            while in_flight.len() >= self.settings.concurrency.max(1) {
                if let Err(e) = self.join_one(&mut in_flight, total, stats).await {
                    in_flight.shutdown().await;
                    return Err(e);
                }
            }

            let schema = Arc::clone(&self.schema);
            let settings = self.settings.clone();
            let retries = Arc::clone(&self.retries);
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                write_with_retry(schema.as_ref(), &entities, &settings, &retries, &cancel).await
            });
        }

        while !in_flight.is_empty() {
            if let Err(e) = self.join_one(&mut in_flight, total, stats).await {
                in_flight.shutdown().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn join_one(
        &self,
        in_flight: &mut JoinSet<Result<WriteAck, BenchError>>,
        total: u64,
        stats: &mut LoadStats,
    ) -> Result<(), BenchError> {
        let Some(joined) = in_flight.join_next().await else {
            return Ok(());
        };
        let ack = joined.map_err(|e| {
            BenchError::Operation(StoreError::Protocol(format!("loader task failed: {e}")))
        })??;
        stats.absorb(ack);
        self.report_progress(ack.nodes(), total);
        Ok(())
    }

    fn report_progress(&self, written: u64, total: u64) {
        let every = self.settings.progress_every.max(1);
        let before = self.progress.fetch_add(written, Ordering::Relaxed);
        let after = before + written;
        if after / every > before / every {
            let pct = if total > 0 {
                after as f64 / total as f64 * 100.0
            } else {
                100.0
            };
            info!(written = after, total, "Import progress {pct:.1}%");
        }
    }

    /// Retry wrapper for the one-off schema steps around the stages.
    async fn with_retry<T, F, Fut>(&self, what: &str, cancel: &CancellationToken, mut step: F) -> Result<T, BenchError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match step().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.settings.max_retries => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    let backoff = self.settings.backoff(attempt);
                    warn!(what, attempt, ?backoff, error = %e, "Retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BenchError::Interrupted),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(fatal(what.to_string(), attempt, e)),
            }
        }
    }
}

async fn write_with_retry(
    schema: &dyn SchemaStrategy,
    entities: &Entities,
    settings: &LoadSettings,
    retries: &AtomicU64,
    cancel: &CancellationToken,
) -> Result<WriteAck, BenchError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(settings.batch_timeout, entities.write(schema)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(settings.batch_timeout)),
        };
        match result {
            Ok(ack) => return Ok(ack),
            Err(e) if e.is_retryable() && attempt <= settings.max_retries => {
                retries.fetch_add(1, Ordering::Relaxed);
                let backoff = settings.backoff(attempt);
                warn!(
                    batch = %entities.describe(),
                    records = entities.len(),
                    attempt,
                    ?backoff,
                    error = %e,
                    "Batch failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(BenchError::Interrupted),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(e) => return Err(fatal(entities.describe(), attempt, e)),
        }
    }
}

fn fatal(what: String, attempts: u32, error: StoreError) -> BenchError {
    if error.is_connection_loss() {
        BenchError::ConnectionLost(error)
    } else {
        BenchError::Load {
            what,
            attempts,
            source: error,
        }
    }
}
