use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{SchemaStrategy, BASE_INDEXES};
use crate::client::{Adjacency, GraphClient, IndexSpec, Mutation, RangeScan, WriteAck, WriteBatch};
use crate::config::SchemaVariant;
use crate::error::StoreError;
use crate::model::{Account, AccountRecord, AggregateWindows, DayKey, Transaction, TxnSummary};

/// Transaction -FROM-> Account, Transaction -TO-> Account, nothing else.
pub struct DirectSchema {
    client: Arc<dyn GraphClient>,
}

impl DirectSchema {
    pub fn new(client: Arc<dyn GraphClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchemaStrategy for DirectSchema {
    fn variant(&self) -> SchemaVariant {
        SchemaVariant::Direct
    }

    fn index_specs(&self) -> Vec<IndexSpec> {
        BASE_INDEXES.to_vec()
    }

    async fn prepare(&self, _calendar: &[DayKey]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn write_accounts(&self, accounts: &[Account]) -> Result<WriteAck, StoreError> {
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateAccounts {
            accounts: accounts.to_vec(),
            with_aggregates: false,
        });
        self.client.apply(&batch).await?;
        Ok(batch.ack())
    }

    async fn write_transactions(&self, txns: &[Transaction]) -> Result<WriteAck, StoreError> {
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateTransactions(txns.to_vec()));
        self.client.apply(&batch).await?;
        Ok(batch.ack())
    }

    async fn finish_load(&self, _windows: AggregateWindows) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }

    async fn point_read(&self, account: u64) -> Result<Option<AccountRecord>, StoreError> {
        self.client.fetch_account(account).await
    }

    async fn traverse(&self, account: u64, hops: u32, limit: usize) -> Result<BTreeSet<u64>, StoreError> {
        Ok(self.client.traverse(account, hops, limit).await?.into_iter().collect())
    }

    async fn range_query(&self, since: i64) -> Result<u64, StoreError> {
        self.client.count_since(since, RangeScan::Full).await
    }

    async fn supernode_query(&self, account: u64, limit: usize) -> Result<Vec<TxnSummary>, StoreError> {
        self.client
            .account_transactions(account, Adjacency::Direct, limit)
            .await
    }
}
