use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

use txgraph_bench::client::MemoryGraph;
use txgraph_bench::schema::{PartitionedSchema, SchemaStrategy};
use txgraph_bench::model::AggregateWindows;
use txgraph_bench::workload::{AccountSampler, DatasetGenerator, DatasetSpec, Distribution};

fn spec(accounts: u64, transactions: u64) -> DatasetSpec {
    DatasetSpec {
        account_count: accounts,
        transaction_count: transactions,
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        seed: 42,
        skew: 1.2,
        amount_mu: 4.0,
        amount_sigma: 1.2,
    }
}

fn bench_sampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("account_sampler");
    group.throughput(Throughput::Elements(1));

    let mut zipf = AccountSampler::new(Distribution::Zipf { skew: 1.2 }, 1_000_000, 42).unwrap();
    group.bench_function("zipf_pair_1m", |b| b.iter(|| black_box(zipf.next_pair())));

    let mut uniform = AccountSampler::new(Distribution::Uniform, 1_000_000, 42).unwrap();
    group.bench_function("uniform_account_1m", |b| {
        b.iter(|| black_box(uniform.next_account()))
    });
    group.finish();
}

fn bench_transaction_stream(c: &mut Criterion) {
    let generator = DatasetGenerator::new(spec(100_000, 10_000)).unwrap();
    let mut group = c.benchmark_group("dataset_generator");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("transactions_10k", |b| {
        b.iter(|| {
            let stream = generator.transactions().unwrap();
            black_box(stream.map(|t| t.amount).sum::<f64>())
        })
    });
    group.finish();
}

fn bench_partitioned_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let generator = DatasetGenerator::new(spec(10_000, 5_000)).unwrap();
    let windows = AggregateWindows {
        as_of: generator.spec().window_end(),
    };

    // One-time setup outside the timed loop
    let accounts: Vec<_> = generator.accounts().collect();
    let txns: Vec<_> = generator.transactions().unwrap().collect();
    let calendar = generator.calendar();

    let mut group = c.benchmark_group("memory_import");
    group.throughput(Throughput::Elements(txns.len() as u64));
    group.sample_size(10);
    group.bench_function("partitioned_buckets_5k", |b| {
        b.to_async(&rt).iter(|| async {
            let graph = Arc::new(MemoryGraph::new());
            let schema = PartitionedSchema::new(graph, true, true, windows);
            schema.prepare(&calendar).await.unwrap();
            schema.write_accounts(&accounts).await.unwrap();
            black_box(schema.write_transactions(&txns).await.unwrap())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_sampler, bench_transaction_stream, bench_partitioned_batch);
criterion_main!(benches);
