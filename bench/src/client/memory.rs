//! In-process property graph.
//!
//! Mirrors the node/relationship layout the Bolt adapter writes (Account,
//! Transaction, Year/Month/Day, DailyBucket) closely enough that both schema
//! strategies run unchanged against it. Used by the integration tests and by
//! `--store memory` runs; a [`FaultPlan`] injects failures on demand.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{Adjacency, GraphClient, GraphCounts, IndexSpec, Mutation, RangeScan, WriteBatch};
use crate::error::StoreError;
use crate::model::{Account, AccountAggregates, AccountRecord, AggregateWindows, DayKey, Transaction, TxnSummary};

/// Injected failures
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// The first N `apply` calls fail with a transient error.
    pub fail_first_writes: u64,
    /// Every Nth read fails with a transient error.
    pub fail_every_nth_read: Option<u64>,
    /// Added to every read.
    pub read_latency: Option<Duration>,
    /// After N reads every call fails with a connection error.
    pub disconnect_after_reads: Option<u64>,
}

#[derive(Debug, Clone)]
struct StoredAccount {
    account: Account,
    aggregates: Option<AccountAggregates>,
}

#[derive(Debug, Default)]
struct DayNode {
    month: String,
    transactions: Vec<u64>,
}

#[derive(Debug)]
struct Bucket {
    count: u64,
    transactions: Vec<u64>,
}

#[derive(Debug, Default)]
struct GraphState {
    accounts: HashMap<u64, StoredAccount>,
    transactions: HashMap<u64, Transaction>,
    /// account -> transactions it sent
    sent: HashMap<u64, Vec<u64>>,
    /// account -> transactions it sent or received
    touching: HashMap<u64, Vec<u64>>,
    years: BTreeSet<String>,
    /// month key -> parent year key
    months: BTreeMap<String, String>,
    days: BTreeMap<String, DayNode>,
    /// transaction -> containing day key
    txn_day: HashMap<u64, String>,
    buckets: HashMap<String, Bucket>,
    account_buckets: HashMap<u64, Vec<String>>,
    relationships: u64,
}

/// Ids introduced earlier in the same batch, so later mutations can refer to them.
#[derive(Default)]
struct Staged {
    accounts: HashSet<u64>,
    transactions: HashSet<u64>,
    days: HashSet<String>,
    linked: HashSet<u64>,
}

impl GraphState {
    fn has_account(&self, staged: &Staged, id: u64) -> bool {
        self.accounts.contains_key(&id) || staged.accounts.contains(&id)
    }

    fn has_transaction(&self, staged: &Staged, id: u64) -> bool {
        self.transactions.contains_key(&id) || staged.transactions.contains(&id)
    }

    /// Checks every precondition of the batch without touching state.
    fn validate(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut staged = Staged::default();
        for mutation in batch.mutations() {
            match mutation {
                Mutation::CreateAccounts { accounts, .. } => {
                    for account in accounts {
                        if self.has_account(&staged, account.id) || !staged.accounts.insert(account.id) {
                            return Err(StoreError::Conflict(format!(
                                "Account {} already exists",
                                account.id
                            )));
                        }
                    }
                }
                Mutation::CreateTransactions(txns) => {
                    for txn in txns {
                        if self.has_transaction(&staged, txn.id) || !staged.transactions.insert(txn.id) {
                            return Err(StoreError::Conflict(format!(
                                "Transaction {} already exists",
                                txn.id
                            )));
                        }
                        for endpoint in [txn.from_account, txn.to_account] {
                            if !self.has_account(&staged, endpoint) {
                                return Err(StoreError::Protocol(format!(
                                    "Transaction {} references missing Account {endpoint}",
                                    txn.id
                                )));
                            }
                        }
                    }
                }
                Mutation::MergeCalendar(days) => {
                    staged.days.extend(days.iter().map(DayKey::day_key));
                }
                Mutation::LinkToDay(links) => {
                    for (txn, day) in links {
                        let key = day.day_key();
                        if !self.days.contains_key(&key) && !staged.days.contains(&key) {
                            return Err(StoreError::Protocol(format!("Day {key} does not exist")));
                        }
                        if !self.has_transaction(&staged, *txn) {
                            return Err(StoreError::Protocol(format!("Transaction {txn} does not exist")));
                        }
                        if self.txn_day.contains_key(txn) || !staged.linked.insert(*txn) {
                            return Err(StoreError::Conflict(format!(
                                "Transaction {txn} is already contained by a Day"
                            )));
                        }
                    }
                }
                Mutation::MergeBuckets(links) => {
                    for link in links {
                        if !self.has_account(&staged, link.account) {
                            return Err(StoreError::Protocol(format!(
                                "bucket references missing Account {}",
                                link.account
                            )));
                        }
                        if !self.has_transaction(&staged, link.txn) {
                            return Err(StoreError::Protocol(format!(
                                "bucket references missing Transaction {}",
                                link.txn
                            )));
                        }
                    }
                }
                Mutation::BumpAggregates(deltas) => {
                    if let Some(d) = deltas.iter().find(|d| !self.has_account(&staged, d.account)) {
                        return Err(StoreError::Protocol(format!(
                            "aggregate delta for missing Account {}",
                            d.account
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: &WriteBatch) {
        for mutation in batch.mutations() {
            match mutation {
                Mutation::CreateAccounts {
                    accounts,
                    with_aggregates,
                } => {
                    for account in accounts {
                        self.accounts.insert(
                            account.id,
                            StoredAccount {
                                account: account.clone(),
                                aggregates: with_aggregates.then(AccountAggregates::default),
                            },
                        );
                    }
                }
                Mutation::CreateTransactions(txns) => {
                    for txn in txns {
                        self.sent.entry(txn.from_account).or_default().push(txn.id);
                        self.touching.entry(txn.from_account).or_default().push(txn.id);
                        self.touching.entry(txn.to_account).or_default().push(txn.id);
                        self.transactions.insert(txn.id, txn.clone());
                        self.relationships += 2;
                    }
                }
                Mutation::MergeCalendar(days) => {
                    for day in days {
                        self.merge_day(day);
                    }
                }
                Mutation::LinkToDay(links) => {
                    for (txn, day) in links {
                        let key = day.day_key();
                        if let Some(node) = self.days.get_mut(&key) {
                            node.transactions.push(*txn);
                            self.txn_day.insert(*txn, key);
                            self.relationships += 1;
                        }
                    }
                }
                Mutation::MergeBuckets(links) => {
                    for link in links {
                        let key = link.day.bucket_key(link.account);
                        if !self.buckets.contains_key(&key) {
                            self.account_buckets
                                .entry(link.account)
                                .or_default()
                                .push(key.clone());
                            // HAS_BUCKET
                            self.relationships += 1;
                        }
                        let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
                            count: 0,
                            transactions: Vec::new(),
                        });
                        bucket.count += 1;
                        bucket.transactions.push(link.txn);
                        self.relationships += 1;
                    }
                }
                Mutation::BumpAggregates(deltas) => {
                    for delta in deltas {
                        if let Some(stored) = self.accounts.get_mut(&delta.account) {
                            let agg = stored.aggregates.get_or_insert_with(AccountAggregates::default);
                            agg.velocity_1h += delta.velocity_1h;
                            agg.velocity_24h += delta.velocity_24h;
                            agg.recent_txn_count += delta.recent_txn_count;
                        }
                    }
                }
            }
        }
    }

    fn merge_day(&mut self, day: &DayKey) {
        let year = day.year_key();
        let month = day.month_key();
        let key = day.day_key();
        self.years.insert(year.clone());
        if !self.months.contains_key(&month) {
            self.months.insert(month.clone(), year);
            self.relationships += 1;
        }
        if !self.days.contains_key(&key) {
            self.days.insert(
                key,
                DayNode {
                    month,
                    transactions: Vec::new(),
                },
            );
            self.relationships += 1;
        }
    }
}

/// Thread-safe in-memory graph store
pub struct MemoryGraph {
    state: RwLock<GraphState>,
    faults: FaultPlan,
    writes: AtomicU64,
    reads: AtomicU64,
    disconnected: AtomicBool,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::default())
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            faults,
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Every later call fails with a connection error.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn relationship_count(&self) -> u64 {
        self.state.read().relationships
    }

    /// Keys of every Day node that contains `txn`.
    pub fn days_containing(&self, txn: u64) -> Vec<String> {
        self.state
            .read()
            .days
            .iter()
            .filter(|(_, node)| node.transactions.contains(&txn))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn month_of_day(&self, day_key: &str) -> Option<String> {
        self.state.read().days.get(day_key).map(|d| d.month.clone())
    }

    pub fn year_of_month(&self, month_key: &str) -> Option<String> {
        self.state.read().months.get(month_key).cloned()
    }

    /// `(years, months, days)` node counts.
    pub fn calendar_sizes(&self) -> (usize, usize, usize) {
        let state = self.state.read();
        (state.years.len(), state.months.len(), state.days.len())
    }

    pub fn bucket_count(&self, account: u64, day: &DayKey) -> Option<u64> {
        self.state
            .read()
            .buckets
            .get(&day.bucket_key(account))
            .map(|b| b.count)
    }

    pub fn transaction(&self, id: u64) -> Option<Transaction> {
        self.state.read().transactions.get(&id).cloned()
    }

    fn check_connected(&self) -> Result<(), StoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory graph disconnected".to_string()));
        }
        Ok(())
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        self.check_connected()?;
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.faults.disconnect_after_reads {
            if n > limit {
                self.disconnect();
                return Err(StoreError::Connection("memory graph disconnected".to_string()));
            }
        }
        if let Some(latency) = self.faults.read_latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(every) = self.faults.fail_every_nth_read {
            if every > 0 && n % every == 0 {
                return Err(StoreError::Transient(format!("injected failure on read {n}")));
            }
        }
        Ok(())
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphClient for MemoryGraph {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_connected()
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.check_connected()?;
        *self.state.write() = GraphState::default();
        Ok(())
    }

    async fn ensure_indexes(&self, _specs: &[IndexSpec]) -> Result<(), StoreError> {
        self.check_connected()
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.check_connected()?;
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.faults.fail_first_writes {
            return Err(StoreError::Transient(format!("injected failure on write {n}")));
        }

        let mut state = self.state.write();
        state.validate(batch)?;
        state.apply(batch);
        Ok(())
    }

    async fn refresh_aggregates(&self, windows: AggregateWindows) -> Result<u64, StoreError> {
        self.check_connected()?;
        let mut state = self.state.write();
        let GraphState {
            accounts,
            transactions,
            sent,
            ..
        } = &mut *state;

        for (id, stored) in accounts.iter_mut() {
            let mut agg = AccountAggregates::default();
            let mut amount_sum = 0.0;
            for txn in sent.get(id).into_iter().flatten().filter_map(|t| transactions.get(t)) {
                if let Some((v1, v24, recent)) = windows.delta_for(txn.timestamp) {
                    agg.velocity_1h += v1;
                    agg.velocity_24h += v24;
                    agg.recent_txn_count += recent;
                    amount_sum += txn.amount;
                }
            }
            if agg.recent_txn_count > 0 {
                agg.avg_amount = amount_sum / agg.recent_txn_count as f64;
            }
            agg.risk_score = AccountAggregates::risk_score(agg.velocity_24h, agg.recent_txn_count);
            stored.aggregates = Some(agg);
        }
        Ok(accounts.len() as u64)
    }

    async fn fetch_account(&self, id: u64) -> Result<Option<AccountRecord>, StoreError> {
        self.before_read().await?;
        Ok(self.state.read().accounts.get(&id).map(|stored| AccountRecord {
            account: stored.account.clone(),
            aggregates: stored.aggregates.clone(),
        }))
    }

    async fn traverse(&self, start: u64, hops: u32, limit: usize) -> Result<Vec<u64>, StoreError> {
        self.before_read().await?;
        let state = self.state.read();
        let mut seen = HashSet::from([start]);
        let mut reached = Vec::new();
        let mut frontier = VecDeque::from([(start, 0u32)]);

        while let Some((account, depth)) = frontier.pop_front() {
            if depth == hops {
                continue;
            }
            for txn in state.sent.get(&account).into_iter().flatten() {
                let Some(to) = state.transactions.get(txn).map(|t| t.to_account) else {
                    continue;
                };
                if seen.insert(to) {
                    reached.push(to);
                    if reached.len() >= limit {
                        return Ok(reached);
                    }
                    frontier.push_back((to, depth + 1));
                }
            }
        }
        Ok(reached)
    }

    async fn account_transactions(
        &self,
        account: u64,
        via: Adjacency,
        limit: usize,
    ) -> Result<Vec<TxnSummary>, StoreError> {
        self.before_read().await?;
        let state = self.state.read();
        let summary = |id: &u64| {
            state.transactions.get(id).map(|t| TxnSummary {
                id: t.id,
                amount: t.amount,
                timestamp: t.timestamp,
            })
        };
        let out = match via {
            Adjacency::Direct => state
                .touching
                .get(&account)
                .into_iter()
                .flatten()
                .filter_map(summary)
                .take(limit)
                .collect(),
            Adjacency::DailyBuckets => state
                .account_buckets
                .get(&account)
                .into_iter()
                .flatten()
                .filter_map(|key| state.buckets.get(key))
                .flat_map(|bucket| bucket.transactions.iter())
                .filter_map(summary)
                .take(limit)
                .collect(),
        };
        Ok(out)
    }

    async fn count_since(&self, since: i64, scan: RangeScan) -> Result<u64, StoreError> {
        self.before_read().await?;
        let state = self.state.read();
        let count = match scan {
            RangeScan::Full => state
                .transactions
                .values()
                .filter(|t| t.timestamp >= since)
                .count(),
            RangeScan::DayPartitions { from_day } => state
                .days
                .range(from_day.day_key()..)
                .flat_map(|(_, node)| node.transactions.iter())
                .filter_map(|id| state.transactions.get(id))
                .filter(|t| t.timestamp >= since)
                .count(),
        };
        Ok(count as u64)
    }

    async fn counts(&self) -> Result<GraphCounts, StoreError> {
        self.check_connected()?;
        let state = self.state.read();
        Ok(GraphCounts {
            accounts: state.accounts.len() as u64,
            transactions: state.transactions.len() as u64,
            days: state.days.len() as u64,
            buckets: state.buckets.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BucketLink;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> DayKey {
        DayKey::new(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn txn(id: u64, from: u64, to: u64, ts: i64) -> Transaction {
        Transaction {
            id,
            from_account: from,
            to_account: to,
            amount: 10.0,
            timestamp: ts,
        }
    }

    async fn seeded(accounts: u64) -> MemoryGraph {
        let graph = MemoryGraph::new();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateAccounts {
            accounts: (0..accounts).map(|id| Account::new(id, 0)).collect(),
            with_aggregates: false,
        });
        graph.apply(&batch).await.unwrap();
        graph
    }

    #[tokio::test]
    async fn calendar_merge_is_idempotent() {
        let graph = MemoryGraph::new();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::MergeCalendar(vec![day(2024, 1, 31), day(2024, 2, 1)]));
        graph.apply(&batch).await.unwrap();
        let rels = graph.relationship_count();
        graph.apply(&batch).await.unwrap();

        assert_eq!(graph.calendar_sizes(), (1, 2, 2));
        assert_eq!(graph.relationship_count(), rels);
        assert_eq!(graph.month_of_day("2024_02_01").as_deref(), Some("2024_02"));
        assert_eq!(graph.year_of_month("2024_02").as_deref(), Some("2024"));
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_trace() {
        let graph = seeded(2).await;
        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::MergeCalendar(vec![day(2024, 1, 1)]))
            .push(Mutation::CreateTransactions(vec![txn(0, 0, 1, 0), txn(1, 0, 7, 0)]));

        let err = graph.apply(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
        assert_eq!(graph.counts().await.unwrap().transactions, 0);
        assert_eq!(graph.calendar_sizes(), (0, 0, 0));
    }

    #[tokio::test]
    async fn duplicate_ids_conflict() {
        let graph = seeded(2).await;
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateAccounts {
            accounts: vec![Account::new(1, 0)],
            with_aggregates: false,
        });
        assert!(matches!(graph.apply(&batch).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn transaction_links_to_one_day_only() {
        let graph = seeded(2).await;
        let d = day(1970, 1, 1);
        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::MergeCalendar(vec![d]))
            .push(Mutation::CreateTransactions(vec![txn(0, 0, 1, 5)]))
            .push(Mutation::LinkToDay(vec![(0, d)]));
        graph.apply(&batch).await.unwrap();

        let mut relink = WriteBatch::new();
        relink.push(Mutation::LinkToDay(vec![(0, d)]));
        assert!(matches!(graph.apply(&relink).await, Err(StoreError::Conflict(_))));
        assert_eq!(graph.days_containing(0), vec!["1970_01_01".to_string()]);
    }

    #[tokio::test]
    async fn traversal_respects_hops_and_limit() {
        let graph = seeded(5).await;
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateTransactions(vec![
            txn(0, 0, 1, 0),
            txn(1, 1, 2, 0),
            txn(2, 2, 3, 0),
            txn(3, 3, 0, 0),
        ]));
        graph.apply(&batch).await.unwrap();

        assert_eq!(graph.traverse(0, 1, 100).await.unwrap(), vec![1]);
        assert_eq!(graph.traverse(0, 2, 100).await.unwrap(), vec![1, 2]);
        assert_eq!(graph.traverse(0, 5, 100).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(graph.traverse(0, 5, 2).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn buckets_group_by_account_and_day() {
        let graph = seeded(3).await;
        let d = day(1970, 1, 1);
        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::CreateTransactions(vec![txn(0, 0, 1, 1), txn(1, 0, 2, 2)]))
            .push(Mutation::MergeBuckets(vec![
                BucketLink { account: 0, day: d, txn: 0 },
                BucketLink { account: 1, day: d, txn: 0 },
                BucketLink { account: 0, day: d, txn: 1 },
                BucketLink { account: 2, day: d, txn: 1 },
            ]));
        graph.apply(&batch).await.unwrap();

        assert_eq!(graph.bucket_count(0, &d), Some(2));
        assert_eq!(graph.bucket_count(1, &d), Some(1));
        assert_eq!(graph.counts().await.unwrap().buckets, 3);
        let via_buckets = graph.account_transactions(0, Adjacency::DailyBuckets, 10).await.unwrap();
        let direct = graph.account_transactions(0, Adjacency::Direct, 10).await.unwrap();
        assert_eq!(via_buckets, direct);
    }

    #[tokio::test]
    async fn injected_faults() {
        let graph = MemoryGraph::with_faults(FaultPlan {
            fail_first_writes: 1,
            fail_every_nth_read: Some(2),
            disconnect_after_reads: Some(3),
            ..FaultPlan::default()
        });
        let batch = WriteBatch::new();
        assert!(matches!(graph.apply(&batch).await, Err(StoreError::Transient(_))));
        assert!(graph.apply(&batch).await.is_ok());

        assert!(graph.fetch_account(0).await.is_ok());
        assert!(matches!(graph.fetch_account(0).await, Err(StoreError::Transient(_))));
        assert!(graph.fetch_account(0).await.is_ok());
        assert!(matches!(graph.fetch_account(0).await, Err(StoreError::Connection(_))));
        assert!(matches!(graph.ping().await, Err(StoreError::Connection(_))));
    }
}
