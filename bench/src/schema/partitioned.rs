use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use super::{SchemaStrategy, BASE_INDEXES};
use crate::client::{
    Adjacency, AggregateDelta, BucketLink, GraphClient, IndexSpec, Mutation, RangeScan, WriteAck, WriteBatch,
};
use crate::config::SchemaVariant;
use crate::error::StoreError;
use crate::model::{Account, AccountRecord, AggregateWindows, DayKey, Transaction, TxnSummary};

/// Direct edges plus Year -> Month -> Day -> Transaction partitioning.
///
/// Every transaction batch is a single [`WriteBatch`] whose first mutation
/// upserts the calendar chain of the batch's days, so a transaction is never
/// durable without the Day that contains it.
pub struct PartitionedSchema {
    client: Arc<dyn GraphClient>,
    daily_buckets: bool,
    aggregates: bool,
    windows: AggregateWindows,
}

impl PartitionedSchema {
    pub fn new(client: Arc<dyn GraphClient>, daily_buckets: bool, aggregates: bool, windows: AggregateWindows) -> Self {
        Self {
            client,
            daily_buckets,
            aggregates,
            windows,
        }
    }

    fn transaction_batch(&self, txns: &[Transaction]) -> WriteBatch {
        let links: Vec<(u64, DayKey)> = txns.iter().map(|t| (t.id, t.day())).collect();
        let days: BTreeSet<DayKey> = links.iter().map(|(_, day)| *day).collect();

        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::MergeCalendar(days.into_iter().collect()))
            .push(Mutation::CreateTransactions(txns.to_vec()))
            .push(Mutation::LinkToDay(links));

        if self.daily_buckets {
            let buckets = txns
                .iter()
                .flat_map(|t| {
                    [t.from_account, t.to_account].map(|account| BucketLink {
                        account,
                        day: t.day(),
                        txn: t.id,
                    })
                })
                .collect();
            batch.push(Mutation::MergeBuckets(buckets));
        }

        if self.aggregates {
            let deltas = sender_deltas(txns, self.windows);
            if !deltas.is_empty() {
                batch.push(Mutation::BumpAggregates(deltas));
            }
        }
        batch
    }
}

/// Per-sender window increments for one batch, one entry per account.
fn sender_deltas(txns: &[Transaction], windows: AggregateWindows) -> Vec<AggregateDelta> {
    let mut by_account: BTreeMap<u64, AggregateDelta> = BTreeMap::new();
    for txn in txns {
        if let Some((v1, v24, recent)) = windows.delta_for(txn.timestamp) {
            let delta = by_account.entry(txn.from_account).or_insert_with(|| AggregateDelta {
                account: txn.from_account,
                ..AggregateDelta::default()
            });
            delta.velocity_1h += v1;
            delta.velocity_24h += v24;
            delta.recent_txn_count += recent;
        }
    }
    by_account.into_values().collect()
}

#[async_trait]
impl SchemaStrategy for PartitionedSchema {
    fn variant(&self) -> SchemaVariant {
        SchemaVariant::Partitioned
    }

    fn index_specs(&self) -> Vec<IndexSpec> {
        let mut specs = BASE_INDEXES.to_vec();
        specs.extend([
            IndexSpec::unique("Year", "key"),
            IndexSpec::unique("Month", "key"),
            IndexSpec::unique("Day", "key"),
        ]);
        if self.daily_buckets {
            specs.push(IndexSpec::unique("DailyBucket", "key"));
        }
        specs
    }

    async fn prepare(&self, calendar: &[DayKey]) -> Result<(), StoreError> {
        if calendar.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        batch.push(Mutation::MergeCalendar(calendar.to_vec()));
        self.client.apply(&batch).await?;
        info!(days = calendar.len(), "Temporal hierarchy ready");
        Ok(())
    }

    async fn write_accounts(&self, accounts: &[Account]) -> Result<WriteAck, StoreError> {
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateAccounts {
            accounts: accounts.to_vec(),
            with_aggregates: self.aggregates,
        });
        self.client.apply(&batch).await?;
        Ok(batch.ack())
    }

    async fn write_transactions(&self, txns: &[Transaction]) -> Result<WriteAck, StoreError> {
        let batch = self.transaction_batch(txns);
        self.client.apply(&batch).await?;
        Ok(batch.ack())
    }

    async fn finish_load(&self, windows: AggregateWindows) -> Result<Option<u64>, StoreError> {
        if !self.aggregates {
            return Ok(None);
        }
        let refreshed = self.client.refresh_aggregates(windows).await?;
        Ok(Some(refreshed))
    }

    async fn point_read(&self, account: u64) -> Result<Option<AccountRecord>, StoreError> {
        self.client.fetch_account(account).await
    }

    async fn traverse(&self, account: u64, hops: u32, limit: usize) -> Result<BTreeSet<u64>, StoreError> {
        Ok(self.client.traverse(account, hops, limit).await?.into_iter().collect())
    }

    async fn range_query(&self, since: i64) -> Result<u64, StoreError> {
        let scan = RangeScan::DayPartitions {
            from_day: DayKey::from_timestamp(since),
        };
        self.client.count_since(since, scan).await
    }

    async fn supernode_query(&self, account: u64, limit: usize) -> Result<Vec<TxnSummary>, StoreError> {
        let via = if self.daily_buckets {
            Adjacency::DailyBuckets
        } else {
            Adjacency::Direct
        };
        self.client.account_transactions(account, via, limit).await
    }
}
