mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use txgraph_bench::client::{FaultPlan, GraphClient, MemoryGraph};
use txgraph_bench::metrics::PhaseStatus;
use txgraph_bench::model::DayKey;
use txgraph_bench::{run_benchmark, run_benchmark_with_client, BenchError, RunReport};

const TOP_LEVEL_KEYS: [&str; 8] = [
    "run",
    "writes",
    "reads",
    "traversal",
    "time_range",
    "supernode",
    "concurrency",
    "system_metrics",
];

fn read_report(path: &std::path::Path) -> (serde_json::Value, RunReport) {
    let bytes = std::fs::read(path).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    for key in TOP_LEVEL_KEYS {
        assert!(value.get(key).is_some(), "missing {key}");
    }
    (value, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn direct_run_reports_every_phase() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 1_000, 10_000);
    config.report.csv = Some(dir.path().join("results.csv"));

    let outcome = run_benchmark(config, &CancellationToken::new()).await;
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(outcome.exit_code(), 0);

    let (value, report) = read_report(&dir.path().join("results.json"));
    assert_eq!(report.writes.transactions, 10_000);
    assert_eq!(report.writes.accounts, 1_000);
    assert!(report.writes.transactions_per_sec > 0.0);
    assert_eq!(report.reads.count, 100);
    assert_eq!(report.traversal.count, 20);
    assert_eq!(report.time_range.count, 5);
    assert_eq!(report.supernode.count, 5);
    assert_eq!(report.concurrency.count, 100);
    assert_eq!(report.writes.post_load.count, 20);
    assert_eq!(value["writes"]["post_load"]["status"], "completed");
    assert_eq!(value["run"]["schema"], "direct");
    assert_eq!(value["run"]["degraded"], false);

    let latency = report.reads.latency.unwrap();
    assert!(latency.p50_ms <= latency.p95_ms && latency.p95_ms <= latency.p99_ms);

    let csv = std::fs::read_to_string(dir.path().join("results.csv")).unwrap();
    assert_eq!(csv.lines().count(), 8);
}

#[tokio::test]
async fn post_load_writes_grow_the_graph_for_both_schemas() {
    for partitioned in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let mut config = common::config(dir.path(), 300, 3_000);
        if partitioned {
            common::partitioned(&mut config);
            config.schema.daily_buckets = true;
        }
        config.workload.post_load_writes = Some(40);
        config.workload.mix.write = 0;
        let graph = Arc::new(MemoryGraph::new());

        let outcome = run_benchmark_with_client(config, graph.clone(), &CancellationToken::new()).await;
        assert!(outcome.error.is_none(), "{:?}", outcome.error);
        let post_load = &outcome.report.writes.post_load;
        assert_eq!(post_load.status, PhaseStatus::Completed);
        assert_eq!(post_load.count, 40);
        assert!(post_load.ops_per_sec > 0.0);
        assert!(post_load.latency.is_some());

        let counts = graph.counts().await.unwrap();
        assert_eq!(counts.transactions, 3_000 + 40);

        // Appended ids start past everything already stored.
        let first = 2_000_000_000 + 3_000;
        for id in first..first + 40 {
            let txn = graph.transaction(id).unwrap();
            assert_eq!(DayKey::from_timestamp(txn.timestamp).day_key(), "2024_12_31");
            if partitioned {
                assert_eq!(graph.days_containing(id), vec!["2024_12_31".to_string()]);
            }
        }
    }
}

#[tokio::test]
async fn interrupted_concurrency_phase_still_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 200, 2_000);
    config.workload.reads = Some(10);
    config.workload.traversals = Some(5);
    config.workload.time_ranges = Some(2);
    config.workload.supernodes = Some(2);
    config.workload.concurrency_ops = None;
    config.workload.concurrency_secs = Some(120);
    config.workload.drain_timeout_ms = 100;

    let graph = Arc::new(MemoryGraph::with_faults(FaultPlan {
        read_latency: Some(Duration::from_millis(1)),
        ..FaultPlan::default()
    }));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        trigger.cancel();
    });

    let outcome = run_benchmark_with_client(config, graph, &cancel).await;
    assert!(matches!(outcome.error, Some(BenchError::Interrupted)));
    assert_eq!(outcome.exit_code(), 130);

    let (value, report) = read_report(&dir.path().join("results.json"));
    assert_eq!(report.reads.status, PhaseStatus::Completed);
    assert_eq!(report.concurrency.status, PhaseStatus::Interrupted);
    assert_eq!(value["concurrency"]["degraded"], true);
    assert_eq!(value["run"]["degraded"], true);
    assert!(report.concurrency.duration_secs < 60.0);
}

#[tokio::test]
async fn connection_loss_is_fatal_with_partial_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config(dir.path(), 200, 2_000);
    let graph = Arc::new(MemoryGraph::with_faults(FaultPlan {
        disconnect_after_reads: Some(30),
        ..FaultPlan::default()
    }));

    let outcome = run_benchmark_with_client(config, graph, &CancellationToken::new()).await;
    assert!(matches!(outcome.error, Some(BenchError::ConnectionLost(_))));
    assert_eq!(outcome.exit_code(), 4);

    let (value, report) = read_report(&dir.path().join("results.json"));
    assert_eq!(report.writes.status, PhaseStatus::Completed);
    assert_eq!(report.reads.status, PhaseStatus::Failed);
    assert_eq!(report.reads.count, 30);
    assert_eq!(report.traversal.status, PhaseStatus::Skipped);
    assert_eq!(value["traversal"]["degraded"], true);
    assert!(value["traversal"]["latency"].is_null());
    assert_eq!(report.run.exit_code, 4);
}

#[tokio::test]
async fn read_failures_degrade_but_do_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config(dir.path(), 200, 2_000);
    let graph = Arc::new(MemoryGraph::with_faults(FaultPlan {
        fail_every_nth_read: Some(5),
        ..FaultPlan::default()
    }));

    let outcome = run_benchmark_with_client(config, graph, &CancellationToken::new()).await;
    assert!(outcome.error.is_none(), "{:?}", outcome.error);

    let report = outcome.report;
    assert_eq!(report.reads.status, PhaseStatus::Degraded);
    assert_eq!(report.reads.count + report.reads.errors, 100);
    assert_eq!(report.reads.errors, 20);
    assert_eq!(report.concurrency.status, PhaseStatus::Degraded);
    assert!(report.run.degraded);
    assert_eq!(report.run.exit_code, 0);
}

#[tokio::test]
async fn exhausted_load_retries_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 200, 2_000);
    config.load.max_retries = 2;
    let graph = Arc::new(MemoryGraph::with_faults(FaultPlan {
        fail_first_writes: 1_000,
        ..FaultPlan::default()
    }));

    let outcome = run_benchmark_with_client(config, graph, &CancellationToken::new()).await;
    assert!(matches!(outcome.error, Some(BenchError::Load { attempts: 3, .. })));
    assert_eq!(outcome.exit_code(), 3);

    let (_, report) = read_report(&dir.path().join("results.json"));
    assert_eq!(report.writes.status, PhaseStatus::Failed);
    assert!(report.writes.partial_data);
    assert!(report.writes.error.is_some());
    assert_eq!(report.reads.status, PhaseStatus::Skipped);
    assert!(report.reads.degraded);
}

#[tokio::test]
async fn skip_import_measures_existing_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 200, 2_000);
    let (graph, _) = common::loaded(&config).await;
    config.load.skip_import = true;

    let outcome = run_benchmark_with_client(config, graph, &CancellationToken::new()).await;
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(outcome.report.writes.status, PhaseStatus::Skipped);
    assert!(!outcome.report.writes.degraded);
    assert_eq!(outcome.report.reads.count, 100);
    assert!(outcome.report.time_range.rows > 0);
}

#[tokio::test]
async fn invalid_dataset_exits_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 1, 10);
    // Would fail to connect if it were ever tried.
    config.store.kind = txgraph_bench::config::StoreKind::Bolt;
    config.store.uri = "bolt://127.0.0.1:1".to_string();

    let outcome = run_benchmark(config, &CancellationToken::new()).await;
    assert!(matches!(outcome.error, Some(BenchError::Generation(_))));
    assert_eq!(outcome.exit_code(), 2);
    read_report(&dir.path().join("results.json"));
}

#[tokio::test]
async fn unwritable_report_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let mut config = common::config(dir.path(), 50, 200);
    config.report.out = blocker.join("results.json");
    config.load.dry_run = true;

    let outcome = run_benchmark(config, &CancellationToken::new()).await;
    assert!(matches!(outcome.error, Some(BenchError::Report { .. })));
    assert_eq!(outcome.exit_code(), 5);
}
