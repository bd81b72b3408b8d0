use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub mod report;
pub mod reporter;

pub use report::{ImportReport, PhaseReport, PhaseStatus, RunMetadata, RunReport, SystemReport};
pub use reporter::ResultsReporter;

/// Report section of a benchmark phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Writes,
    /// Single-transaction writes against the loaded graph
    PostLoad,
    Reads,
    Traversal,
    TimeRange,
    Supernode,
    Concurrency,
}

impl Phase {
    /// Workload phases in execution order; `Writes` always runs first.
    pub const WORKLOAD: [Phase; 6] = [
        Phase::PostLoad,
        Phase::Reads,
        Phase::Traversal,
        Phase::TimeRange,
        Phase::Supernode,
        Phase::Concurrency,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Phase::Writes => "writes",
            Phase::PostLoad => "post_load",
            Phase::Reads => "reads",
            Phase::Traversal => "traversal",
            Phase::TimeRange => "time_range",
            Phase::Supernode => "supernode",
            Phase::Concurrency => "concurrency",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Latency distribution of one phase, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone)]
struct Series {
    samples_ns: Vec<u64>,
    count: u64,
    errors: u64,
    sum_ns: u128,
    min_ns: u64,
    max_ns: u64,
}

impl Series {
    fn new() -> Self {
        Self {
            samples_ns: Vec::new(),
            count: 0,
            errors: 0,
            sum_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
        }
    }
}

/// Per-phase latency series.
///
/// Count, mean, min and max are exact. Percentiles use nearest rank over a
/// sorted copy of the retained samples; once a phase has recorded more than
/// `max_samples` operations the retained set is a uniform reservoir sample.
#[derive(Debug, Clone)]
pub struct LatencyRecorder {
    series: BTreeMap<Phase, Series>,
    max_samples: usize,
    rng: StdRng,
}

impl LatencyRecorder {
    pub fn new(max_samples: usize) -> Self {
        Self::with_seed(max_samples, 0)
    }

    pub fn with_seed(max_samples: usize, seed: u64) -> Self {
        Self {
            series: BTreeMap::new(),
            max_samples: max_samples.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        let ns = elapsed.as_nanos().min(u128::from(u64::MAX)) as u64;
        let cap = self.max_samples;
        let series = self.series.entry(phase).or_insert_with(Series::new);
        series.count += 1;
        series.sum_ns += u128::from(ns);
        series.min_ns = series.min_ns.min(ns);
        series.max_ns = series.max_ns.max(ns);

        if series.samples_ns.len() < cap {
            series.samples_ns.push(ns);
        } else {
            let slot = self.rng.gen_range(0..series.count);
            if (slot as usize) < cap {
                series.samples_ns[slot as usize] = ns;
            }
        }
    }

    /// Failed operations are counted but never enter the latency series.
    pub fn record_error(&mut self, phase: Phase) {
        self.series.entry(phase).or_insert_with(Series::new).errors += 1;
    }

    /// Folds another worker's series into this one.
    ///
    /// Each side's samples stand for `count` operations, so once either side
    /// is a reservoir the merged samples are drawn from each side in
    /// proportion to the operations it ran, not to the samples it kept.
    pub fn merge(&mut self, other: &LatencyRecorder) {
        for (phase, theirs) in &other.series {
            let ours = self.series.entry(*phase).or_insert_with(Series::new);
            ours.samples_ns = merge_samples(ours, theirs, self.max_samples, &mut self.rng);
            ours.count += theirs.count;
            ours.errors += theirs.errors;
            ours.sum_ns += theirs.sum_ns;
            ours.min_ns = ours.min_ns.min(theirs.min_ns);
            ours.max_ns = ours.max_ns.max(theirs.max_ns);
        }
    }

    /// Successful operations recorded for `phase`.
    pub fn count(&self, phase: Phase) -> u64 {
        self.series.get(&phase).map_or(0, |s| s.count)
    }

    pub fn errors(&self, phase: Phase) -> u64 {
        self.series.get(&phase).map_or(0, |s| s.errors)
    }

    /// `None` when no operation of `phase` succeeded.
    pub fn summarize(&self, phase: Phase) -> Option<LatencySummary> {
        let series = self.series.get(&phase)?;
        if series.count == 0 || series.samples_ns.is_empty() {
            return None;
        }

        let mut sorted = series.samples_ns.clone();
        sorted.sort_unstable();

        Some(LatencySummary {
            count: series.count,
            mean_ms: ns_to_ms(series.sum_ns as f64 / series.count as f64),
            min_ms: ns_to_ms(series.min_ns as f64),
            p50_ms: ns_to_ms(nearest_rank(&sorted, 0.50) as f64),
            p95_ms: ns_to_ms(nearest_rank(&sorted, 0.95) as f64),
            p99_ms: ns_to_ms(nearest_rank(&sorted, 0.99) as f64),
            max_ms: ns_to_ms(series.max_ns as f64),
        })
    }
}

/// Weighted draw without replacement from two uniform samples of `a.count`
/// and `b.count` operations. Stops when the side it picks runs out of samples,
/// which keeps the result unbiased at the cost of a few slots.
fn merge_samples(a: &Series, b: &Series, cap: usize, rng: &mut StdRng) -> Vec<u64> {
    let exact = a.samples_ns.len() as u64 == a.count && b.samples_ns.len() as u64 == b.count;
    if exact && a.samples_ns.len() + b.samples_ns.len() <= cap {
        let mut merged = a.samples_ns.clone();
        merged.extend_from_slice(&b.samples_ns);
        return merged;
    }

    let mut pools = [a.samples_ns.clone(), b.samples_ns.clone()];
    let mut remaining = [a.count, b.count];
    let target = cap.min(pools[0].len() + pools[1].len());
    let mut merged = Vec::with_capacity(target);
    while merged.len() < target {
        let total = remaining[0] + remaining[1];
        if total == 0 {
            break;
        }
        let side = usize::from(rng.gen_range(0..total) >= remaining[0]);
        let pool = &mut pools[side];
        if pool.is_empty() {
            break;
        }
        let i = rng.gen_range(0..pool.len());
        merged.push(pool.swap_remove(i));
        remaining[side] -= 1;
    }
    merged
}

/// Smallest sample with at least `p` of the series at or below it.
/// `sorted` must be non-empty and ascending.
pub fn nearest_rank(sorted: &[u64], p: f64) -> u64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn ns_to_ms(ns: f64) -> f64 {
    ns / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn nearest_rank_on_known_series() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(nearest_rank(&sorted, 0.50), 50);
        assert_eq!(nearest_rank(&sorted, 0.95), 95);
        assert_eq!(nearest_rank(&sorted, 0.99), 99);
        assert_eq!(nearest_rank(&[7], 0.99), 7);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let mut recorder = LatencyRecorder::new(1_000);
        for v in [5, 1, 9, 3, 3, 8, 2, 100, 4, 6] {
            recorder.record(Phase::Reads, ms(v));
        }
        let s = recorder.summarize(Phase::Reads).unwrap();
        assert_eq!(s.count, 10);
        assert!(s.min_ms <= s.p50_ms);
        assert!(s.p50_ms <= s.p95_ms);
        assert!(s.p95_ms <= s.p99_ms);
        assert!(s.p99_ms <= s.max_ms);
        assert_eq!(s.max_ms, 100.0);
        assert_eq!(s.min_ms, 1.0);
        assert!((s.mean_ms - 14.1).abs() < 1e-9);
    }

    #[test]
    fn errors_are_excluded_from_series() {
        let mut recorder = LatencyRecorder::new(10);
        recorder.record(Phase::Traversal, ms(4));
        recorder.record_error(Phase::Traversal);
        recorder.record_error(Phase::Traversal);
        assert_eq!(recorder.count(Phase::Traversal), 1);
        assert_eq!(recorder.errors(Phase::Traversal), 2);
        assert_eq!(recorder.summarize(Phase::Traversal).unwrap().count, 1);
        assert!(recorder.summarize(Phase::Supernode).is_none());
    }

    #[test]
    fn merge_combines_workers() {
        let mut a = LatencyRecorder::new(1_000);
        let mut b = LatencyRecorder::new(1_000);
        for v in 1..=50 {
            a.record(Phase::Concurrency, ms(v));
        }
        for v in 51..=100 {
            b.record(Phase::Concurrency, ms(v));
        }
        b.record_error(Phase::Concurrency);
        a.merge(&b);

        let s = a.summarize(Phase::Concurrency).unwrap();
        assert_eq!(s.count, 100);
        assert_eq!(s.p50_ms, 50.0);
        assert_eq!(s.p99_ms, 99.0);
        assert_eq!(a.errors(Phase::Concurrency), 1);
    }

    #[test]
    fn merge_weights_workers_by_operation_count() {
        let mut heavy = LatencyRecorder::with_seed(4, 1);
        for _ in 0..1_000 {
            heavy.record(Phase::Reads, ms(1));
        }
        let mut light = LatencyRecorder::with_seed(4, 2);
        for _ in 0..4 {
            light.record(Phase::Reads, ms(9));
        }
        heavy.merge(&light);

        let s = heavy.summarize(Phase::Reads).unwrap();
        assert_eq!(s.count, 1_004);
        assert_eq!(s.p50_ms, 1.0);
        assert_eq!(s.max_ms, 9.0);
    }

    #[test]
    fn merge_into_empty_keeps_reservoir_share() {
        let mut heavy = LatencyRecorder::with_seed(100, 5);
        for _ in 0..100_000 {
            heavy.record(Phase::Concurrency, ms(2));
        }
        let mut light = LatencyRecorder::with_seed(100, 6);
        for _ in 0..100 {
            light.record(Phase::Concurrency, ms(50));
        }

        let mut merged = LatencyRecorder::with_seed(100, 7);
        merged.merge(&light);
        merged.merge(&heavy);
        let s = merged.summarize(Phase::Concurrency).unwrap();
        assert_eq!(s.count, 100_100);
        assert_eq!(s.p50_ms, 2.0);
        assert_eq!(s.p95_ms, 2.0);
    }

    #[test]
    fn reservoir_bounds_memory_but_keeps_exact_count() {
        let mut recorder = LatencyRecorder::with_seed(100, 3);
        for v in 0..10_000 {
            recorder.record(Phase::Reads, Duration::from_micros(v));
        }
        let s = recorder.summarize(Phase::Reads).unwrap();
        assert_eq!(s.count, 10_000);
        assert_eq!(s.max_ms, 9.999);
        assert!(s.p50_ms > 2.0 && s.p50_ms < 8.0);
    }
}
