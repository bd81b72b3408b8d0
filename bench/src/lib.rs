//! Transaction Graph Benchmark Library
//!
//! Generates a synthetic account/transaction graph with skewed activity,
//! imports it into a property-graph store under one of two schema strategies,
//! and measures a fixed sequence of query phases:
//! - Import throughput (nodes, relationships, transactions per second)
//! - Point reads, multi-hop traversals, "last N days" range scans
//! - Supernode fan-out queries
//! - A mixed concurrent workload
//!
//! # Architecture
//!
//! ```text
//! bench
//! ├── client/       # GraphClient seam: Bolt (neo4rs) and in-memory stores
//! ├── schema/       # Direct vs time-partitioned population and queries
//! ├── workload/     # Dataset generator and operation streams
//! ├── metrics/      # Latency recording and the JSON/CSV report
//! └── runner/       # Bulk loader, phase executor, orchestration
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use txgraph_bench::{config::BenchConfig, run_benchmark};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BenchConfig::load(None)?;
//!     config.validate()?;
//!     let outcome = run_benchmark(config, &CancellationToken::new()).await;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod runner;
pub mod schema;
pub mod system;
pub mod workload;

pub use crate::client::{create_client, GraphClient, MemoryGraph};
pub use crate::config::BenchConfig;
pub use crate::error::{BenchError, StoreError};
pub use crate::metrics::{ResultsReporter, RunReport};
pub use crate::runner::{BenchmarkRunner, RunOutcome};

use crate::config::{LogFormat, LoggingConfig};
use crate::workload::{DatasetGenerator, DatasetSpec};

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let level = logging.level.as_str();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("txgraph_bench={level},warn").into());

    let registry = tracing_subscriber::registry().with(env_filter);
    match logging.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()?,
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()?,
    }
    Ok(())
}

/// Connect to the configured store and run every phase.
///
/// The report is always written, including after fatal errors and
/// interrupts. A dataset configuration that cannot be generated fails before
/// any connection attempt.
pub async fn run_benchmark(mut config: BenchConfig, cancel: &CancellationToken) -> RunOutcome {
    config.dataset.pin_end_date();
    if let Err(e) = DatasetGenerator::new(DatasetSpec::from_config(&config.dataset)) {
        return save_reports(&config, runner::aborted(&config, e));
    }
    match create_client(&config).await {
        Ok(client) => run_benchmark_with_client(config, client, cancel).await,
        Err(e) => save_reports(&config, runner::aborted(&config, e)),
    }
}

/// Same as [`run_benchmark`] against an already constructed client.
pub async fn run_benchmark_with_client(
    mut config: BenchConfig,
    client: Arc<dyn GraphClient>,
    cancel: &CancellationToken,
) -> RunOutcome {
    config.dataset.pin_end_date();
    let outcome = BenchmarkRunner::new(config.clone(), client).run(cancel).await;
    save_reports(&config, outcome)
}

fn save_reports(config: &BenchConfig, mut outcome: RunOutcome) -> RunOutcome {
    let mut saved = outcome.report.save(&config.report.out);
    if saved.is_ok() {
        if let Some(csv) = &config.report.csv {
            saved = outcome.report.save_csv(csv);
        }
    }

    match saved {
        Ok(()) => info!(path = %config.report.out.display(), "Report written"),
        Err(e) => {
            error!(error = %e, "Failed to write report");
            if outcome.error.is_none() {
                outcome.error = Some(e);
            }
        }
    }
    outcome
}
