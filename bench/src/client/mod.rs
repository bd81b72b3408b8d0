use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{BenchConfig, StoreKind};
use crate::error::{BenchError, StoreError};
use crate::model::{Account, AccountRecord, AggregateWindows, DayKey, Transaction, TxnSummary};

pub mod bolt;
pub mod memory;

pub use bolt::BoltClient;
pub use memory::{FaultPlan, MemoryGraph};

/// Connection settings for a store adapter
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub pool_size: usize,
    pub fetch_size: usize,
}

impl ClientConfig {
    pub fn from_bench(config: &BenchConfig) -> Self {
        Self {
            uri: config.store.uri.clone(),
            user: config.store.user.clone(),
            password: config.store.password.clone(),
            database: config.store.database.clone(),
            pool_size: config.pool_size(),
            fetch_size: config.store.fetch_size,
        }
    }
}

/// Index or uniqueness constraint on `label.property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub label: &'static str,
    pub property: &'static str,
    pub unique: bool,
}

impl IndexSpec {
    pub const fn unique(label: &'static str, property: &'static str) -> Self {
        Self {
            label,
            property,
            unique: true,
        }
    }

    pub const fn range(label: &'static str, property: &'static str) -> Self {
        Self {
            label,
            property,
            unique: false,
        }
    }
}

/// Links a transaction into the per-account bucket of its day.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketLink {
    pub account: u64,
    pub day: DayKey,
    pub txn: u64,
}

/// Load-time increments of an account's denormalized activity fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateDelta {
    pub account: u64,
    pub velocity_1h: u64,
    pub velocity_24h: u64,
    pub recent_txn_count: u64,
}

/// One typed write against the graph.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Fails with a conflict if any id already exists.
    CreateAccounts {
        accounts: Vec<Account>,
        with_aggregates: bool,
    },
    /// Node plus its FROM and TO edges. Both accounts must exist.
    CreateTransactions(Vec<Transaction>),
    /// Idempotent upsert of Year -> Month -> Day chains.
    MergeCalendar(Vec<DayKey>),
    /// Day -CONTAINS-> Transaction. The day must exist; a transaction is linked at most once.
    LinkToDay(Vec<(u64, DayKey)>),
    /// Upserts the bucket, bumps its count and links the transaction.
    MergeBuckets(Vec<BucketLink>),
    BumpAggregates(Vec<AggregateDelta>),
}

impl Mutation {
    /// Relationships this mutation creates, not counting idempotent merges
    /// that may already exist.
    pub fn relationships(&self) -> u64 {
        match self {
            Mutation::CreateAccounts { .. } | Mutation::MergeCalendar(_) | Mutation::BumpAggregates(_) => 0,
            Mutation::CreateTransactions(txns) => 2 * txns.len() as u64,
            Mutation::LinkToDay(links) => links.len() as u64,
            Mutation::MergeBuckets(links) => links.len() as u64,
        }
    }
}

/// Counts of what a batch created, used for import throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteAck {
    pub accounts: u64,
    pub transactions: u64,
    pub relationships: u64,
}

impl WriteAck {
    pub fn nodes(&self) -> u64 {
        self.accounts + self.transactions
    }

    pub fn add(&mut self, other: WriteAck) {
        self.accounts += other.accounts;
        self.transactions += other.transactions;
        self.relationships += other.relationships;
    }
}

/// Mutations applied in order inside a single store transaction.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn ack(&self) -> WriteAck {
        let mut ack = WriteAck::default();
        for mutation in &self.mutations {
            match mutation {
                Mutation::CreateAccounts { accounts, .. } => ack.accounts += accounts.len() as u64,
                Mutation::CreateTransactions(txns) => ack.transactions += txns.len() as u64,
                _ => {}
            }
            ack.relationships += mutation.relationships();
        }
        ack
    }
}

/// Which edges an adjacency query follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjacency {
    /// Account <-FROM|TO- Transaction
    Direct,
    /// Account -HAS_BUCKET-> DailyBucket -INCLUDES-> Transaction
    DailyBuckets,
}

/// How a "since" count scans transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeScan {
    /// Every transaction, filtered by timestamp
    Full,
    /// Only transactions contained by Day nodes at or after `from_day`
    DayPartitions { from_day: DayKey },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub accounts: u64,
    pub transactions: u64,
    pub days: u64,
    pub buckets: u64,
}

/// Graph store adapter.
///
/// Every method is one round-trip (or one store transaction) and reports
/// failures as [`StoreError`] so callers can decide between retrying,
/// counting and aborting.
#[async_trait]
pub trait GraphClient: Send + Sync {
    fn name(&self) -> &str;

    /// Health check
    async fn ping(&self) -> Result<(), StoreError>;

    /// Delete every node and relationship
    async fn reset(&self) -> Result<(), StoreError>;

    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> Result<(), StoreError>;

    /// Apply all mutations atomically: either every one takes effect or none.
    async fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    /// Recompute the denormalized fields of every account. Returns the number
    /// of accounts updated.
    async fn refresh_aggregates(&self, windows: AggregateWindows) -> Result<u64, StoreError>;

    async fn fetch_account(&self, id: u64) -> Result<Option<AccountRecord>, StoreError>;

    /// Accounts reachable from `start` over 1..=`hops` outgoing transfers,
    /// excluding `start`, at most `limit` of them.
    async fn traverse(&self, start: u64, hops: u32, limit: usize) -> Result<Vec<u64>, StoreError>;

    /// Transactions sent or received by `account`, at most `limit`.
    async fn account_transactions(
        &self,
        account: u64,
        via: Adjacency,
        limit: usize,
    ) -> Result<Vec<TxnSummary>, StoreError>;

    /// Number of transactions with `timestamp >= since`.
    async fn count_since(&self, since: i64, scan: RangeScan) -> Result<u64, StoreError>;

    async fn counts(&self) -> Result<GraphCounts, StoreError>;
}

/// Client factory
pub async fn create_client(config: &BenchConfig) -> Result<Arc<dyn GraphClient>, BenchError> {
    match config.store.kind {
        StoreKind::Bolt => {
            let client = BoltClient::connect(ClientConfig::from_bench(config))
                .await
                .map_err(BenchError::ConnectionLost)?;
            Ok(Arc::new(client))
        }
        StoreKind::Memory => Ok(Arc::new(MemoryGraph::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_counts_created_entities() {
        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::CreateTransactions(vec![
                Transaction {
                    id: 0,
                    from_account: 0,
                    to_account: 1,
                    amount: 1.0,
                    timestamp: 0,
                },
                Transaction {
                    id: 1,
                    from_account: 1,
                    to_account: 0,
                    amount: 2.0,
                    timestamp: 0,
                },
            ]))
            .push(Mutation::LinkToDay(vec![
                (0, DayKey::from_timestamp(0)),
                (1, DayKey::from_timestamp(0)),
            ]))
            .push(Mutation::MergeCalendar(vec![DayKey::from_timestamp(0)]));

        let ack = batch.ack();
        assert_eq!(ack.accounts, 0);
        assert_eq!(ack.transactions, 2);
        assert_eq!(ack.relationships, 6);
    }
}
