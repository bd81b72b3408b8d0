use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as RandDist, LogNormal};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{AccountSampler, Distribution, OperationMix};
use crate::error::BenchError;
use crate::model::{Transaction, SECS_PER_DAY};

/// Benchmark operation against the active schema strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    PointRead { account: u64 },
    Traverse { account: u64, hops: u32, limit: usize },
    TimeRange { since: i64 },
    Supernode { account: u64, limit: usize },
    Write { txn: Transaction },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::PointRead { .. } => OperationKind::PointRead,
            Operation::Traverse { .. } => OperationKind::Traversal,
            Operation::TimeRange { .. } => OperationKind::TimeRange,
            Operation::Supernode { .. } => OperationKind::Supernode,
            Operation::Write { .. } => OperationKind::Write,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    PointRead,
    Traversal,
    TimeRange,
    Supernode,
    Write,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::PointRead => "point_read",
            OperationKind::Traversal => "traversal",
            OperationKind::TimeRange => "time_range",
            OperationKind::Supernode => "supernode",
            OperationKind::Write => "write",
        }
    }
}

/// Parameters shared by every workload of a run.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    pub account_count: u64,
    pub traversal_hops: u32,
    pub traversal_limit: usize,
    pub supernode_limit: usize,
    /// Highest-degree accounts, busiest first. Never empty.
    pub supernodes: Vec<u64>,
    /// Lower bound (unix seconds) of the "last N days" range query.
    pub range_since: i64,
    pub mix: OperationMix,
    /// Zipf exponent of the dataset; writes pick endpoints the same way.
    pub skew: f64,
    pub amount_mu: f64,
    pub amount_sigma: f64,
    /// 00:00 UTC of the window's last day, where appended transactions land.
    pub write_day_start: i64,
    /// Next id handed to an appended transaction, shared by all workers.
    pub next_write_id: Arc<AtomicU64>,
}

/// Workload selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Only(OperationKind),
    Mixed,
}

/// Endless source of operations; the executor decides when to stop.
pub trait Workload: Send {
    fn name(&self) -> &str;

    fn next_operation(&mut self) -> Operation;
}

/// Point reads of uniformly chosen accounts
pub struct PointReadWorkload {
    accounts: AccountSampler,
}

impl PointReadWorkload {
    pub fn new(ctx: &WorkloadContext, seed: u64) -> Result<Self, BenchError> {
        Ok(Self {
            accounts: AccountSampler::new(Distribution::Uniform, ctx.account_count, seed)?,
        })
    }
}

impl Workload for PointReadWorkload {
    fn name(&self) -> &str {
        "point_read"
    }

    fn next_operation(&mut self) -> Operation {
        Operation::PointRead {
            account: self.accounts.next_account(),
        }
    }
}

/// Bounded multi-hop traversals from uniformly chosen accounts
pub struct TraversalWorkload {
    accounts: AccountSampler,
    hops: u32,
    limit: usize,
}

impl TraversalWorkload {
    pub fn new(ctx: &WorkloadContext, seed: u64) -> Result<Self, BenchError> {
        Ok(Self {
            accounts: AccountSampler::new(Distribution::Uniform, ctx.account_count, seed)?,
            hops: ctx.traversal_hops,
            limit: ctx.traversal_limit,
        })
    }
}

impl Workload for TraversalWorkload {
    fn name(&self) -> &str {
        "traversal"
    }

    fn next_operation(&mut self) -> Operation {
        Operation::Traverse {
            account: self.accounts.next_account(),
            hops: self.hops,
            limit: self.limit,
        }
    }
}

/// The same "since" query, repeated
pub struct TimeRangeWorkload {
    since: i64,
}

impl TimeRangeWorkload {
    pub fn new(ctx: &WorkloadContext) -> Self {
        Self {
            since: ctx.range_since,
        }
    }
}

impl Workload for TimeRangeWorkload {
    fn name(&self) -> &str {
        "time_range"
    }

    fn next_operation(&mut self) -> Operation {
        Operation::TimeRange { since: self.since }
    }
}

/// Round-robin over the highest-degree accounts
pub struct SupernodeWorkload {
    accounts: Vec<u64>,
    cursor: usize,
    limit: usize,
}

impl SupernodeWorkload {
    pub fn new(ctx: &WorkloadContext, offset: u64) -> Self {
        let accounts = if ctx.supernodes.is_empty() {
            vec![0]
        } else {
            ctx.supernodes.clone()
        };
        Self {
            cursor: (offset % accounts.len() as u64) as usize,
            accounts,
            limit: ctx.supernode_limit,
        }
    }
}

impl Workload for SupernodeWorkload {
    fn name(&self) -> &str {
        "supernode"
    }

    fn next_operation(&mut self) -> Operation {
        let account = self.accounts[self.cursor];
        self.cursor = (self.cursor + 1) % self.accounts.len();
        Operation::Supernode {
            account,
            limit: self.limit,
        }
    }
}

/// New transfers appended to the loaded graph.
///
/// Ids come from a counter shared by every worker, starting past the imported
/// range, so concurrent writers never collide. Timestamps fall within the
/// window's last day.
pub struct WriteWorkload {
    pairs: AccountSampler,
    rng: StdRng,
    amounts: LogNormal<f64>,
    ids: Arc<AtomicU64>,
    day_start: i64,
}

impl WriteWorkload {
    pub fn new(ctx: &WorkloadContext, seed: u64) -> Result<Self, BenchError> {
        if ctx.account_count < 2 {
            return Err(BenchError::Generation(
                "writes need at least two accounts".to_string(),
            ));
        }
        let amounts = LogNormal::new(ctx.amount_mu, ctx.amount_sigma)
            .map_err(|e| BenchError::Generation(format!("invalid amount distribution: {e}")))?;
        Ok(Self {
            pairs: AccountSampler::new(Distribution::from_skew(ctx.skew), ctx.account_count, seed)?,
            rng: StdRng::seed_from_u64(seed ^ 0x5752_17E5),
            amounts,
            ids: Arc::clone(&ctx.next_write_id),
            day_start: ctx.write_day_start,
        })
    }
}

impl Workload for WriteWorkload {
    fn name(&self) -> &str {
        "write"
    }

    fn next_operation(&mut self) -> Operation {
        let (from_account, to_account) = self.pairs.next_pair();
        let raw = self.amounts.sample(&mut self.rng);
        Operation::Write {
            txn: Transaction {
                id: self.ids.fetch_add(1, Ordering::Relaxed),
                from_account,
                to_account,
                amount: ((raw * 100.0).round() / 100.0).max(0.01),
                timestamp: self.day_start + self.rng.gen_range(0..SECS_PER_DAY),
            },
        }
    }
}

/// Weighted mix of every operation kind
pub struct MixedWorkload {
    mix: OperationMix,
    op_rng: StdRng,
    reads: PointReadWorkload,
    traversals: TraversalWorkload,
    ranges: TimeRangeWorkload,
    supernodes: SupernodeWorkload,
    writes: WriteWorkload,
}

impl MixedWorkload {
    pub fn new(ctx: &WorkloadContext, seed: u64) -> Result<Self, BenchError> {
        if ctx.mix.total() == 0 {
            return Err(BenchError::Config(
                "operation mix must have at least one non-zero weight".to_string(),
            ));
        }
        Ok(Self {
            mix: ctx.mix,
            op_rng: StdRng::seed_from_u64(seed),
            reads: PointReadWorkload::new(ctx, seed.wrapping_add(1))?,
            traversals: TraversalWorkload::new(ctx, seed.wrapping_add(2))?,
            ranges: TimeRangeWorkload::new(ctx),
            supernodes: SupernodeWorkload::new(ctx, seed),
            writes: WriteWorkload::new(ctx, seed.wrapping_add(3))?,
        })
    }
}

impl Workload for MixedWorkload {
    fn name(&self) -> &str {
        "mixed"
    }

    fn next_operation(&mut self) -> Operation {
        match self.mix.pick(&mut self.op_rng) {
            OperationKind::PointRead => self.reads.next_operation(),
            OperationKind::Traversal => self.traversals.next_operation(),
            OperationKind::TimeRange => self.ranges.next_operation(),
            OperationKind::Supernode => self.supernodes.next_operation(),
            OperationKind::Write => self.writes.next_operation(),
        }
    }
}

/// Workload factory. Workers of the same phase pass distinct seeds.
pub fn create_workload(
    kind: WorkloadKind,
    ctx: &WorkloadContext,
    seed: u64,
) -> Result<Box<dyn Workload>, BenchError> {
    Ok(match kind {
        WorkloadKind::Only(OperationKind::PointRead) => Box::new(PointReadWorkload::new(ctx, seed)?),
        WorkloadKind::Only(OperationKind::Traversal) => Box::new(TraversalWorkload::new(ctx, seed)?),
        WorkloadKind::Only(OperationKind::TimeRange) => Box::new(TimeRangeWorkload::new(ctx)),
        WorkloadKind::Only(OperationKind::Supernode) => Box::new(SupernodeWorkload::new(ctx, seed)),
        WorkloadKind::Only(OperationKind::Write) => Box::new(WriteWorkload::new(ctx, seed)?),
        WorkloadKind::Mixed => Box::new(MixedWorkload::new(ctx, seed)?),
    })
}
