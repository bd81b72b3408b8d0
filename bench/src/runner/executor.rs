use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BenchError, StoreError};
use crate::metrics::{LatencyRecorder, Phase};
use crate::schema::{execute, SchemaStrategy};
use crate::workload::{create_workload, WorkloadContext, WorkloadKind};

/// When a phase stops issuing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Exactly this many operations across all workers.
    Operations(u64),
    /// Until the wall-clock duration elapses.
    Duration(Duration),
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub op_timeout: Duration,
    /// Grace period for an in-flight operation once the phase is cancelled.
    pub drain_timeout: Duration,
    pub max_samples: usize,
    pub seed: u64,
}

/// Raw measurements of one phase
#[derive(Debug)]
pub struct PhaseOutcome {
    pub recorder: LatencyRecorder,
    pub elapsed: Duration,
    pub rows: u64,
    pub workers: usize,
    /// The run's cancellation token cut the phase short of its budget.
    pub interrupted: bool,
    pub connection_lost: Option<StoreError>,
}

struct WorkerResult {
    recorder: LatencyRecorder,
    rows: u64,
    /// Stopped with budget left, or abandoned an in-flight operation.
    cut_short: bool,
    connection_lost: Option<StoreError>,
}

/// Executes workloads with multiple concurrent workers
pub struct WorkloadExecutor {
    schema: Arc<dyn SchemaStrategy>,
    settings: ExecutorSettings,
}

impl WorkloadExecutor {
    pub fn new(schema: Arc<dyn SchemaStrategy>, settings: ExecutorSettings) -> Self {
        Self { schema, settings }
    }

    /// Run one phase to completion, interruption, or connection loss.
    ///
    /// Individual failures are counted on the recorder and excluded from the
    /// latency series; only a lost connection stops the other workers early.
    pub async fn execute(
        &self,
        phase: Phase,
        kind: WorkloadKind,
        ctx: &WorkloadContext,
        budget: Budget,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutcome, BenchError> {
        let workers = self.settings.workers.max(1);
        let stop = cancel.child_token();
        let issued = Arc::new(AtomicU64::new(0));
        let started = Instant::now();
        let deadline = match budget {
            Budget::Duration(d) => Some(started + d),
            Budget::Operations(_) => None,
        };

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let worker_seed = self
                .settings
                .seed
                .wrapping_add((phase as u64 + 1) << 32)
                .wrapping_add(worker_id as u64);
            let mut workload = create_workload(kind, ctx, worker_seed)?;
            let schema = Arc::clone(&self.schema);
            let stop = stop.clone();
            let issued = Arc::clone(&issued);
            let op_timeout = self.settings.op_timeout;
            let drain_timeout = self.settings.drain_timeout;
            let mut recorder = LatencyRecorder::with_seed(self.settings.max_samples, worker_seed);

            tasks.spawn(async move {
                let mut rows = 0u64;
                let mut cut_short = false;
                let mut connection_lost = None;

                loop {
                    let more = match (budget, deadline) {
                        (Budget::Operations(n), _) => issued.fetch_add(1, Ordering::Relaxed) < n,
                        (Budget::Duration(_), Some(end)) => Instant::now() < end,
                        (Budget::Duration(_), None) => false,
                    };
                    if !more {
                        break;
                    }
                    if stop.is_cancelled() {
                        cut_short = true;
                        break;
                    }

                    let op = workload.next_operation();
                    let op_start = Instant::now();
                    let fut = execute(schema.as_ref(), &op);
                    tokio::pin!(fut);

                    let outcome = tokio::select! {
                        res = tokio::time::timeout(op_timeout, &mut fut) => res,
                        _ = stop.cancelled() => {
                            let drained = tokio::time::timeout(drain_timeout, &mut fut).await;
                            cut_short |= drained.is_err();
                            drained
                        }
                    };
                    let elapsed = op_start.elapsed();

                    match outcome {
                        Ok(Ok(n)) => {
                            recorder.record(phase, elapsed);
                            rows += n;
                        }
                        Ok(Err(e)) if e.is_connection_loss() => {
                            recorder.record_error(phase);
                            warn!(%phase, error = %e, "Connection lost; stopping phase");
                            connection_lost = Some(e);
                            stop.cancel();
                            break;
                        }
                        Ok(Err(e)) => {
                            recorder.record_error(phase);
                            debug!(%phase, ?op, error = %e, "Operation failed");
                        }
                        Err(_) => {
                            recorder.record_error(phase);
                            debug!(%phase, ?op, ?elapsed, "Operation timed out");
                        }
                    }
                }

                WorkerResult {
                    recorder,
                    rows,
                    cut_short,
                    connection_lost,
                }
            });
        }

        // Collect results from all workers
        let mut recorder = LatencyRecorder::with_seed(self.settings.max_samples, self.settings.seed);
        let mut rows = 0;
        let mut cut_short = false;
        let mut connection_lost = None;
        while let Some(joined) = tasks.join_next().await {
            let worker = joined.map_err(|e| {
                BenchError::Operation(StoreError::Protocol(format!("{phase} worker failed: {e}")))
            })?;
            recorder.merge(&worker.recorder);
            rows += worker.rows;
            cut_short |= worker.cut_short;
            if connection_lost.is_none() {
                connection_lost = worker.connection_lost;
            }
        }

        Ok(PhaseOutcome {
            recorder,
            elapsed: started.elapsed(),
            rows,
            workers,
            // A connection loss also stops workers early but is reported on its own.
            interrupted: cut_short && cancel.is_cancelled(),
            connection_lost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FaultPlan, GraphClient, MemoryGraph, Mutation, WriteBatch};
    use crate::model::{Account, Transaction};
    use crate::schema::DirectSchema;
    use crate::workload::{OperationKind, OperationMix};

    async fn schema_with(faults: FaultPlan) -> Arc<dyn SchemaStrategy> {
        let graph = Arc::new(MemoryGraph::with_faults(faults));
        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::CreateAccounts {
                accounts: (0..10).map(|id| Account::new(id, 0)).collect(),
                with_aggregates: false,
            })
            .push(Mutation::CreateTransactions(
                (0..20)
                    .map(|id| Transaction {
                        id,
                        from_account: id % 10,
                        to_account: (id + 1) % 10,
                        amount: 1.0,
                        timestamp: id as i64,
                    })
                    .collect(),
            ));
        graph.apply(&batch).await.unwrap();
        Arc::new(DirectSchema::new(graph))
    }

    fn ctx() -> WorkloadContext {
        WorkloadContext {
            account_count: 10,
            traversal_hops: 2,
            traversal_limit: 100,
            supernode_limit: 50,
            supernodes: vec![0],
            range_since: 0,
            mix: OperationMix::default(),
            skew: 1.2,
            amount_mu: 4.0,
            amount_sigma: 1.2,
            write_day_start: 0,
            next_write_id: Arc::new(AtomicU64::new(1_000)),
        }
    }

    fn settings(workers: usize) -> ExecutorSettings {
        ExecutorSettings {
            workers,
            op_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_millis(200),
            max_samples: 10_000,
            seed: 42,
        }
    }

    #[tokio::test]
    async fn operation_budget_is_exact_across_workers() {
        let executor = WorkloadExecutor::new(schema_with(FaultPlan::default()).await, settings(4));
        let outcome = executor
            .execute(
                Phase::Reads,
                WorkloadKind::Only(OperationKind::PointRead),
                &ctx(),
                Budget::Operations(100),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.recorder.count(Phase::Reads), 100);
        assert_eq!(outcome.recorder.errors(Phase::Reads), 0);
        assert_eq!(outcome.rows, 100);
        assert!(!outcome.interrupted);
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let faults = FaultPlan {
            fail_every_nth_read: Some(10),
            ..FaultPlan::default()
        };
        let executor = WorkloadExecutor::new(schema_with(faults).await, settings(1));
        let outcome = executor
            .execute(
                Phase::Traversal,
                WorkloadKind::Only(OperationKind::Traversal),
                &ctx(),
                Budget::Operations(50),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.recorder.count(Phase::Traversal), 45);
        assert_eq!(outcome.recorder.errors(Phase::Traversal), 5);
        assert!(outcome.connection_lost.is_none());
    }

    #[tokio::test]
    async fn connection_loss_stops_every_worker() {
        let faults = FaultPlan {
            disconnect_after_reads: Some(20),
            ..FaultPlan::default()
        };
        let executor = WorkloadExecutor::new(schema_with(faults).await, settings(3));
        let outcome = executor
            .execute(
                Phase::Concurrency,
                WorkloadKind::Mixed,
                &ctx(),
                Budget::Duration(Duration::from_secs(30)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome.connection_lost, Some(StoreError::Connection(_))));
        assert_eq!(outcome.recorder.count(Phase::Concurrency), 20);
        assert!(outcome.elapsed < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn cancellation_ends_duration_phase() {
        let faults = FaultPlan {
            read_latency: Some(Duration::from_millis(5)),
            ..FaultPlan::default()
        };
        let executor = WorkloadExecutor::new(schema_with(faults).await, settings(2));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = executor
            .execute(
                Phase::Concurrency,
                WorkloadKind::Mixed,
                &ctx(),
                Budget::Duration(Duration::from_secs(60)),
                &cancel,
            )
            .await
            .unwrap();
        assert!(outcome.interrupted);
        assert!(outcome.recorder.count(Phase::Concurrency) > 0);
        assert!(outcome.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancel_after_budget_is_not_an_interruption() {
        let executor = WorkloadExecutor::new(schema_with(FaultPlan::default()).await, settings(2));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let done = executor
            .execute(
                Phase::Reads,
                WorkloadKind::Only(OperationKind::PointRead),
                &ctx(),
                Budget::Operations(0),
                &cancel,
            )
            .await
            .unwrap();
        assert!(!done.interrupted);

        let cut = executor
            .execute(
                Phase::Reads,
                WorkloadKind::Only(OperationKind::PointRead),
                &ctx(),
                Budget::Operations(10),
                &cancel,
            )
            .await
            .unwrap();
        assert!(cut.interrupted);
        assert_eq!(cut.recorder.count(Phase::Reads), 0);
    }

    #[tokio::test]
    async fn writes_append_new_transactions() {
        let graph = Arc::new(MemoryGraph::new());
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateAccounts {
            accounts: (0..10).map(|id| Account::new(id, 0)).collect(),
            with_aggregates: false,
        });
        graph.apply(&batch).await.unwrap();
        let executor = WorkloadExecutor::new(Arc::new(DirectSchema::new(graph.clone())), settings(3));

        let outcome = executor
            .execute(
                Phase::PostLoad,
                WorkloadKind::Only(OperationKind::Write),
                &ctx(),
                Budget::Operations(30),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.recorder.count(Phase::PostLoad), 30);
        assert_eq!(outcome.recorder.errors(Phase::PostLoad), 0);
        assert_eq!(graph.counts().await.unwrap().transactions, 30);
        assert!((1_000..1_030).all(|id| graph.transaction(id).is_some()));
    }
}
