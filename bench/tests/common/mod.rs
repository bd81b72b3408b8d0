#![allow(dead_code)]

use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;

use txgraph_bench::client::MemoryGraph;
use txgraph_bench::config::{BenchConfig, SchemaVariant, StoreKind};
use txgraph_bench::model::AggregateWindows;
use txgraph_bench::runner::{BulkLoader, LoadSettings};
use txgraph_bench::schema::{create_schema, SchemaStrategy};
use txgraph_bench::workload::{DatasetGenerator, DatasetSpec};

/// A small in-memory run writing its report under `dir`.
pub fn config(dir: &Path, accounts: u64, transactions: u64) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.store.kind = StoreKind::Memory;
    config.dataset.accounts = Some(accounts);
    config.dataset.transactions = Some(transactions);
    config.dataset.seed = 42;
    config.dataset.end_date = NaiveDate::from_ymd_opt(2024, 12, 31);
    config.load.batch_size = 500;
    config.load.concurrency = 4;
    config.load.retry_backoff_ms = 1;
    config.workload.reads = Some(100);
    config.workload.traversals = Some(20);
    config.workload.time_ranges = Some(5);
    config.workload.supernodes = Some(5);
    config.workload.post_load_writes = Some(20);
    config.workload.concurrency_ops = Some(100);
    config.report.out = dir.join("results.json");
    config
}

pub fn generator(config: &BenchConfig) -> DatasetGenerator {
    DatasetGenerator::new(DatasetSpec::from_config(&config.dataset)).unwrap()
}

pub fn windows(generator: &DatasetGenerator) -> AggregateWindows {
    AggregateWindows {
        as_of: generator.spec().window_end(),
    }
}

/// Imports the configured dataset into a fresh memory graph.
pub async fn loaded(config: &BenchConfig) -> (Arc<MemoryGraph>, Arc<dyn SchemaStrategy>) {
    let graph = Arc::new(MemoryGraph::new());
    let generator = generator(config);
    let windows = windows(&generator);
    let schema = create_schema(&config.schema, windows, graph.clone());
    let loader = BulkLoader::new(
        Arc::clone(&schema),
        LoadSettings {
            batch_size: config.load.batch_size,
            concurrency: config.load.concurrency,
            max_retries: 0,
            retry_backoff: config.retry_backoff(),
            batch_timeout: config.batch_timeout(),
            progress_every: config.load.progress_every,
        },
    );
    loader
        .load(&generator, windows, &tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    (graph, schema)
}

pub fn partitioned(config: &mut BenchConfig) {
    config.schema.variant = SchemaVariant::Partitioned;
}
