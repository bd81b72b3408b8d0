//! Population and query strategies.
//!
//! The workload driver only talks to [`SchemaStrategy`]; the variant is picked
//! once from configuration by [`create_schema`] and never changes during a run.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::client::{GraphClient, IndexSpec, WriteAck};
use crate::config::{SchemaConfig, SchemaVariant};
use crate::error::StoreError;
use crate::model::{Account, AccountRecord, AggregateWindows, DayKey, Transaction, TxnSummary};
use crate::workload::Operation;

pub mod direct;
pub mod partitioned;

pub use direct::DirectSchema;
pub use partitioned::PartitionedSchema;

/// Constraints every variant needs
pub const BASE_INDEXES: [IndexSpec; 3] = [
    IndexSpec::unique("Account", "id"),
    IndexSpec::unique("Transaction", "id"),
    IndexSpec::range("Transaction", "ts"),
];

#[async_trait]
pub trait SchemaStrategy: Send + Sync {
    fn variant(&self) -> SchemaVariant;

    fn index_specs(&self) -> Vec<IndexSpec>;

    /// Runs once before any entity is written.
    async fn prepare(&self, calendar: &[DayKey]) -> Result<(), StoreError>;

    async fn write_accounts(&self, accounts: &[Account]) -> Result<WriteAck, StoreError>;

    async fn write_transactions(&self, txns: &[Transaction]) -> Result<WriteAck, StoreError>;

    async fn write_account(&self, account: &Account) -> Result<WriteAck, StoreError> {
        self.write_accounts(std::slice::from_ref(account)).await
    }

    async fn write_transaction(&self, txn: &Transaction) -> Result<WriteAck, StoreError> {
        self.write_transactions(std::slice::from_ref(txn)).await
    }

    /// Runs once after every entity is written. Returns the number of
    /// accounts whose aggregates were recomputed, if the variant keeps any.
    async fn finish_load(&self, windows: AggregateWindows) -> Result<Option<u64>, StoreError>;

    async fn point_read(&self, account: u64) -> Result<Option<AccountRecord>, StoreError>;

    async fn traverse(&self, account: u64, hops: u32, limit: usize) -> Result<BTreeSet<u64>, StoreError>;

    /// Count of transactions at or after `since`.
    async fn range_query(&self, since: i64) -> Result<u64, StoreError>;

    async fn supernode_query(&self, account: u64, limit: usize) -> Result<Vec<TxnSummary>, StoreError>;
}

/// Runs one workload operation. Returns the number of rows it produced.
pub async fn execute(schema: &dyn SchemaStrategy, op: &Operation) -> Result<u64, StoreError> {
    match *op {
        Operation::PointRead { account } => {
            Ok(schema.point_read(account).await?.map_or(0, |_| 1))
        }
        Operation::Traverse {
            account,
            hops,
            limit,
        } => Ok(schema.traverse(account, hops, limit).await?.len() as u64),
        Operation::TimeRange { since } => schema.range_query(since).await,
        Operation::Supernode { account, limit } => {
            Ok(schema.supernode_query(account, limit).await?.len() as u64)
        }
        Operation::Write { ref txn } => {
            schema.write_transaction(txn).await?;
            Ok(1)
        }
    }
}

/// Schema factory
pub fn create_schema(
    config: &SchemaConfig,
    windows: AggregateWindows,
    client: Arc<dyn GraphClient>,
) -> Arc<dyn SchemaStrategy> {
    match config.variant {
        SchemaVariant::Direct => Arc::new(DirectSchema::new(client)),
        SchemaVariant::Partitioned => Arc::new(PartitionedSchema::new(
            client,
            config.daily_buckets,
            config.aggregates,
            windows,
        )),
    }
}
