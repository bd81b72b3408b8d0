use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use txgraph_bench::config::{
    BenchConfig, LogFormat, LogLevel, SchemaVariant, SizeTier, StoreKind,
};
use txgraph_bench::{init_tracing, run_benchmark, ResultsReporter};

/// Exit status for configuration errors detected before the run starts.
const EXIT_CONFIG: i32 = 2;

/// txgraph-bench - load and query benchmark for transaction graphs
#[derive(Parser, Debug)]
#[command(name = "txgraph-bench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark direct vs time-partitioned transaction graph schemas", long_about = None)]
struct CliArgs {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, env = "TXGRAPH_CONFIG")]
    config: Option<String>,

    /// Dataset size tier
    #[arg(long, value_enum)]
    size: Option<SizeTier>,

    /// Override the tier's account count
    #[arg(long)]
    accounts: Option<u64>,

    /// Override the tier's transaction count
    #[arg(long)]
    transactions: Option<u64>,

    /// Schema strategy
    #[arg(long, value_enum)]
    schema: Option<SchemaVariant>,

    /// Add per-account daily buckets (partitioned only)
    #[arg(long)]
    daily_buckets: bool,

    /// Maintain denormalized account aggregates (partitioned only)
    #[arg(long)]
    aggregates: bool,

    /// Backing store
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// Bolt URI
    #[arg(long, env = "TXGRAPH_URI")]
    uri: Option<String>,

    #[arg(long, env = "TXGRAPH_USER")]
    user: Option<String>,

    #[arg(long, env = "TXGRAPH_PASSWORD", hide_env_values = true)]
    pass: Option<String>,

    /// Records per write transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Loader workers and concurrency phase workers
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// JSON report path
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Also write a per-phase CSV summary
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Run workload phases against already imported data
    #[arg(long)]
    skip_import: bool,

    /// Validate configuration and ping the store only
    #[arg(long)]
    dry_run: bool,

    /// Delete every node before importing
    #[arg(long)]
    reset: bool,

    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl CliArgs {
    /// CLI flags have the highest priority.
    fn apply(self, config: &mut BenchConfig) {
        if let Some(size) = self.size {
            config.dataset.size = size;
        }
        if self.accounts.is_some() {
            config.dataset.accounts = self.accounts;
        }
        if self.transactions.is_some() {
            config.dataset.transactions = self.transactions;
        }
        if let Some(seed) = self.seed {
            config.dataset.seed = seed;
        }
        if let Some(variant) = self.schema {
            config.schema.variant = variant;
        }
        if self.daily_buckets {
            config.schema.daily_buckets = true;
        }
        if self.aggregates {
            config.schema.aggregates = true;
        }
        if let Some(kind) = self.store {
            config.store.kind = kind;
        }
        if let Some(uri) = self.uri {
            config.store.uri = uri;
        }
        if let Some(user) = self.user {
            config.store.user = user;
        }
        if let Some(pass) = self.pass {
            config.store.password = pass;
        }
        if self.reset {
            config.store.reset_before_load = true;
        }
        if let Some(batch_size) = self.batch_size {
            config.load.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.load.concurrency = concurrency;
        }
        if self.skip_import {
            config.load.skip_import = true;
        }
        if self.dry_run {
            config.load.dry_run = true;
        }
        if let Some(out) = self.out {
            config.report.out = out;
        }
        if self.csv.is_some() {
            config.report.csv = self.csv;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), draining in-flight operations");
        },
        _ = terminate => {
            info!("Received SIGTERM, draining in-flight operations");
        },
    }
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();

    // Load configuration with priority: CLI args > env vars > config file > defaults
    let mut config = match BenchConfig::load(cli_args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    cli_args.apply(&mut config);

    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration: {e:#}");
        std::process::exit(EXIT_CONFIG);
    }
    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Warning: logging disabled: {e:#}");
    }

    info!(
        size = config.dataset.size.as_str(),
        schema = config.schema.variant.as_str(),
        store = config.store.kind.as_str(),
        accounts = config.dataset.account_count(),
        transactions = config.dataset.transaction_count(),
        "Starting txgraph-bench v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let outcome = run_benchmark(config, &cancel).await;
    ResultsReporter::print_summary(&outcome.report);

    let code = outcome.exit_code();
    if let Some(e) = &outcome.error {
        eprintln!("Error: {e}");
    }
    std::process::exit(code);
}
