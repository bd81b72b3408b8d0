use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as RandDist, Zipf};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BenchError;

pub mod generator;
pub mod patterns;

pub use generator::{batched, AccountStream, DatasetGenerator, DatasetSpec, TransactionStream};
pub use patterns::{
    create_workload, MixedWorkload, Operation, OperationKind, Workload, WorkloadContext, WorkloadKind,
    WriteWorkload,
};

/// Second-index draws attempted before falling back to a uniform pick.
pub const MAX_DISTINCT_ATTEMPTS: u32 = 8;

/// Account selection distribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    Uniform,
    /// Frequency of rank `r` proportional to `1 / r^skew`; rank 1 is account 0.
    Zipf { skew: f64 },
}

impl Distribution {
    /// `skew == 0` degenerates to the uniform distribution.
    pub fn from_skew(skew: f64) -> Self {
        if skew == 0.0 {
            Distribution::Uniform
        } else {
            Distribution::Zipf { skew }
        }
    }
}

/// Draws account indices in `[0, account_count)` from a seeded stream.
pub struct AccountSampler {
    rng: StdRng,
    account_count: u64,
    zipf_dist: Option<Zipf<f64>>,
}

impl AccountSampler {
    pub fn new(distribution: Distribution, account_count: u64, seed: u64) -> Result<Self, BenchError> {
        if account_count == 0 {
            return Err(BenchError::Generation(
                "account population must be non-empty".to_string(),
            ));
        }
        let zipf_dist = match distribution {
            Distribution::Uniform => None,
            Distribution::Zipf { skew } => {
                if !skew.is_finite() || skew < 0.0 {
                    return Err(BenchError::Generation(format!(
                        "zipf skew must be a finite value >= 0, got {skew}"
                    )));
                }
                Some(Zipf::new(account_count, skew).map_err(|e| {
                    BenchError::Generation(format!("invalid zipf parameters: {e}"))
                })?)
            }
        };

        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            account_count,
            zipf_dist,
        })
    }

    pub fn account_count(&self) -> u64 {
        self.account_count
    }

    pub fn next_account(&mut self) -> u64 {
        match &self.zipf_dist {
            Some(dist) => {
                let rank = dist.sample(&mut self.rng) as u64;
                rank.saturating_sub(1).min(self.account_count - 1)
            }
            None => self.rng.gen_range(0..self.account_count),
        }
    }

    /// Two distinct accounts, `(from, to)`.
    ///
    /// The second index is redrawn from the distribution at most
    /// [`MAX_DISTINCT_ATTEMPTS`] times, then drawn uniformly from the remaining
    /// `account_count - 1` accounts. Requires at least two accounts.
    pub fn next_pair(&mut self) -> (u64, u64) {
        debug_assert!(self.account_count >= 2);
        let from = self.next_account();
        for _ in 0..MAX_DISTINCT_ATTEMPTS {
            let to = self.next_account();
            if to != from {
                return (from, to);
            }
        }
        let to = self.rng.gen_range(0..self.account_count - 1);
        (from, if to >= from { to + 1 } else { to })
    }
}

/// Per-phase operation counts.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    pub reads: u64,
    pub traversals: u64,
    pub time_ranges: u64,
    pub supernodes: u64,
    /// Transactions appended one by one after the import
    pub post_load_writes: u64,
    pub concurrency_duration: Duration,
    /// Fixed operation count for the concurrency phase; wins over the duration.
    pub concurrency_ops: Option<u64>,
}

/// Relative weights of operation kinds in the concurrency phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationMix {
    pub point_read: u32,
    pub traversal: u32,
    pub supernode: u32,
    pub range: u32,
    pub write: u32,
}

impl Default for OperationMix {
    fn default() -> Self {
        Self {
            point_read: 65,
            traversal: 15,
            supernode: 5,
            range: 10,
            write: 5,
        }
    }
}

impl OperationMix {
    pub fn total(&self) -> u32 {
        self.point_read + self.traversal + self.supernode + self.range + self.write
    }

    /// Weighted pick. `total()` must be non-zero.
    pub fn pick<R: Rng>(&self, rng: &mut R) -> OperationKind {
        let mut roll = rng.gen_range(0..self.total());
        for (kind, weight) in [
            (OperationKind::PointRead, self.point_read),
            (OperationKind::Traversal, self.traversal),
            (OperationKind::Supernode, self.supernode),
            (OperationKind::TimeRange, self.range),
            (OperationKind::Write, self.write),
        ] {
            if roll < weight {
                return kind;
            }
            roll -= weight;
        }
        OperationKind::PointRead
    }
}
