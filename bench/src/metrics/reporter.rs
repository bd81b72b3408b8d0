use super::{LatencySummary, Phase, PhaseReport, RunReport};
use std::fmt::{self, Write};

const RULE: &str = "═══════════════════════════════════════════════════════════";

/// Results reporter for formatting benchmark output
pub struct ResultsReporter;

impl ResultsReporter {
    pub fn print_summary(report: &RunReport) {
        println!("{}", Self::render_summary(report));
    }

    /// Human-readable digest of a run; the JSON report stays authoritative.
    pub fn render_summary(report: &RunReport) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = Self::write_summary(&mut out, report);
        out
    }

    fn write_summary(out: &mut String, report: &RunReport) -> fmt::Result {
        let run = &report.run;
        writeln!(out, "\n{RULE}")?;
        writeln!(
            out,
            "  📊 Benchmark Results: {} / {} on {}",
            run.size, run.schema, run.store
        )?;
        writeln!(out, "{RULE}")?;
        writeln!(out)?;

        writeln!(
            out,
            "🗂️  Dataset: {} accounts, {} transactions ({} .. {})",
            run.accounts, run.transactions, run.window_start, run.window_end
        )?;
        if run.daily_buckets || run.aggregates {
            writeln!(
                out,
                "   Extensions: daily_buckets={} aggregates={}",
                run.daily_buckets, run.aggregates
            )?;
        }
        writeln!(out, "⏱️  Duration: {:.2}s", run.duration_secs)?;
        writeln!(out)?;

        let writes = &report.writes;
        writeln!(out, "📥 Import [{}]", writes.status.as_str())?;
        writeln!(
            out,
            "   Accounts:      {:>12} ({:.0}/sec)",
            writes.accounts, writes.accounts_per_sec
        )?;
        writeln!(
            out,
            "   Transactions:  {:>12} ({:.0} TPS)",
            writes.transactions, writes.transactions_per_sec
        )?;
        writeln!(
            out,
            "   Relationships: {:>12} ({:.0}/sec)",
            writes.relationships, writes.relationships_per_sec
        )?;
        if writes.retries > 0 {
            writeln!(out, "   Retries:       {:>12}", writes.retries)?;
        }
        if let Some(secs) = writes.aggregate_refresh_secs {
            writeln!(out, "   Aggregate refresh: {secs:.2}s")?;
        }
        if writes.partial_data {
            writeln!(out, "   ⚠️  Store may hold a partially imported dataset")?;
        }
        writeln!(out)?;

        writeln!(
            out,
            "{:<12} {:<12} {:>8} {:>7} {:>10} {:>9} {:>9} {:>9}",
            "phase", "status", "ok", "errors", "ops/sec", "p50 ms", "p95 ms", "p99 ms"
        )?;
        for phase in Phase::WORKLOAD {
            if let Some(section) = report.phase(phase) {
                writeln!(out, "{}", PhaseRow(phase, section))?;
            }
        }
        writeln!(out)?;

        let system = &report.system_metrics;
        writeln!(out, "💻 System Metrics:")?;
        writeln!(out, "   CPU:         {:.1}%", system.cpu_percent)?;
        writeln!(out, "   Memory:      {:.2} GB", system.memory_used_gb)?;
        writeln!(out, "   Disk Reads:  {:.2} MB/s", system.disk_read_mb_per_sec)?;
        writeln!(out, "   Disk Writes: {:.2} MB/s", system.disk_write_mb_per_sec)?;
        writeln!(out)?;

        if let Some(error) = &run.error {
            writeln!(out, "❌ {error} (exit {})", run.exit_code)?;
        } else if run.degraded {
            writeln!(out, "⚠️  Run degraded: see per-phase status")?;
        } else {
            writeln!(out, "✅ All phases completed")?;
        }
        write!(out, "{RULE}")
    }
}

struct PhaseRow<'a>(Phase, &'a PhaseReport);

impl fmt::Display for PhaseRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let PhaseRow(phase, report) = self;
        let pct = |pick: fn(&LatencySummary) -> f64| {
            report
                .latency
                .as_ref()
                .map_or_else(|| "-".to_string(), |l| format!("{:.2}", pick(l)))
        };
        write!(
            f,
            "{:<12} {:<12} {:>8} {:>7} {:>10.1} {:>9} {:>9} {:>9}",
            phase.key(),
            report.status.as_str(),
            report.count,
            report.errors,
            report.ops_per_sec,
            pct(|l| l.p50_ms),
            pct(|l| l.p95_ms),
            pct(|l| l.p99_ms),
        )
    }
}
