use chrono::{Duration as ChronoDuration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as RandDist, LogNormal};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::{AccountSampler, Distribution};
use crate::config::DatasetConfig;
use crate::error::BenchError;
use crate::model::{Account, DayKey, Transaction, SECS_PER_DAY};

// Stream seeds are derived from the run seed so that accounts and
// transactions can be regenerated independently.
const ACCOUNT_STREAM: u64 = 0x0A11_CE00;
const TIMESTAMP_STREAM: u64 = 0x7153_0000;

/// Account creation dates fall within the first 30 days of the window.
const CREATION_SPREAD_SECS: i64 = 30 * SECS_PER_DAY;

/// Parameters fixing a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub account_count: u64,
    pub transaction_count: u64,
    /// First day of the window (inclusive).
    pub start_date: NaiveDate,
    /// Last day of the window (inclusive).
    pub end_date: NaiveDate,
    pub seed: u64,
    pub skew: f64,
    pub amount_mu: f64,
    pub amount_sigma: f64,
}

impl DatasetSpec {
    pub fn from_config(config: &DatasetConfig) -> Self {
        Self {
            account_count: config.account_count(),
            transaction_count: config.transaction_count(),
            start_date: config.resolved_start_date(),
            end_date: config.resolved_end_date(),
            seed: config.seed,
            skew: config.skew,
            amount_mu: config.amount_mu,
            amount_sigma: config.amount_sigma,
        }
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.account_count < 2 {
            return Err(BenchError::Generation(format!(
                "account_count must be >= 2 so transfers have distinct endpoints, got {}",
                self.account_count
            )));
        }
        if self.end_date < self.start_date {
            return Err(BenchError::Generation(format!(
                "end_date {} precedes start_date {}",
                self.end_date, self.start_date
            )));
        }
        if !self.skew.is_finite() || self.skew < 0.0 {
            return Err(BenchError::Generation(format!(
                "skew must be a finite value >= 0, got {}",
                self.skew
            )));
        }
        if !self.amount_mu.is_finite() || !self.amount_sigma.is_finite() || self.amount_sigma <= 0.0 {
            return Err(BenchError::Generation(format!(
                "amount distribution needs finite mu and sigma > 0, got mu={} sigma={}",
                self.amount_mu, self.amount_sigma
            )));
        }
        Ok(())
    }

    /// Unix seconds at 00:00 UTC of `start_date`.
    pub fn window_start(&self) -> i64 {
        DayKey::new(self.start_date).start_timestamp()
    }

    /// Exclusive end of the window: 00:00 UTC of the day after `end_date`.
    pub fn window_end(&self) -> i64 {
        DayKey::new(self.end_date).start_timestamp() + SECS_PER_DAY
    }

    pub fn window_days(&self) -> u64 {
        ((self.window_end() - self.window_start()) / SECS_PER_DAY) as u64
    }
}

/// Deterministic-given-seed dataset source.
///
/// Both streams are lazy and restartable: calling [`DatasetGenerator::accounts`]
/// or [`DatasetGenerator::transactions`] again reseeds and replays the exact same
/// sequence. Memory use is independent of the configured counts.
#[derive(Debug, Clone)]
pub struct DatasetGenerator {
    spec: DatasetSpec,
}

impl DatasetGenerator {
    pub fn new(spec: DatasetSpec) -> Result<Self, BenchError> {
        spec.validate()?;
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    /// Accounts with dense ids `0..account_count`.
    pub fn accounts(&self) -> AccountStream {
        AccountStream {
            next_id: 0,
            end: self.spec.account_count,
            window_start: self.spec.window_start(),
            rng: StdRng::seed_from_u64(self.spec.seed ^ ACCOUNT_STREAM),
        }
    }

    /// Transactions with ids `0..transaction_count`.
    pub fn transactions(&self) -> Result<TransactionStream, BenchError> {
        self.transactions_from(0, self.spec.transaction_count)
    }

    /// Transactions with ids `first_id..first_id + count`, drawn from a stream
    /// seeded by `first_id` so disjoint id ranges never repeat a sequence.
    pub fn transactions_from(&self, first_id: u64, count: u64) -> Result<TransactionStream, BenchError> {
        let sampler = AccountSampler::new(
            Distribution::from_skew(self.spec.skew),
            self.spec.account_count,
            self.spec.seed.wrapping_add(first_id),
        )?;
        let amounts = LogNormal::new(self.spec.amount_mu, self.spec.amount_sigma)
            .map_err(|e| BenchError::Generation(format!("invalid amount distribution: {e}")))?;
        let window_start = self.spec.window_start();
        Ok(TransactionStream {
            next_id: first_id,
            end: first_id.saturating_add(count),
            sampler,
            rng: StdRng::seed_from_u64(self.spec.seed.wrapping_add(first_id) ^ TIMESTAMP_STREAM),
            amounts,
            window_start,
            window_secs: self.spec.window_end() - window_start,
        })
    }

    /// The `k` accounts touching the most transactions, busiest first; ties
    /// go to the lower id. Replays the whole transaction stream.
    pub fn top_degree_accounts(&self, k: usize) -> Result<Vec<u64>, BenchError> {
        let mut degree = vec![0u32; self.spec.account_count as usize];
        for txn in self.transactions()? {
            for account in [txn.from_account, txn.to_account] {
                let slot = &mut degree[account as usize];
                *slot = slot.saturating_add(1);
            }
        }

        // Min-heap of the best `k` seen so far.
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for (id, &d) in degree.iter().enumerate() {
            heap.push(Reverse((d, Reverse(id as u64))));
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut top: Vec<(u32, Reverse<u64>)> = heap.into_iter().map(|Reverse(entry)| entry).collect();
        top.sort_unstable_by(|a, b| b.cmp(a));
        Ok(top.into_iter().map(|(_, Reverse(id))| id).collect())
    }

    /// Every day of the window, oldest first.
    pub fn calendar(&self) -> Vec<DayKey> {
        let mut days = Vec::with_capacity(self.spec.window_days() as usize);
        let mut date = self.spec.start_date;
        while date <= self.spec.end_date {
            days.push(DayKey::new(date));
            date += ChronoDuration::days(1);
        }
        days
    }
}

pub struct AccountStream {
    next_id: u64,
    end: u64,
    window_start: i64,
    rng: StdRng,
}

impl Iterator for AccountStream {
    type Item = Account;

    fn next(&mut self) -> Option<Account> {
        if self.next_id >= self.end {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let created_at = self.window_start + self.rng.gen_range(0..CREATION_SPREAD_SECS);
        Some(Account::new(id, created_at))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next_id) as usize;
        (remaining, Some(remaining))
    }
}

pub struct TransactionStream {
    next_id: u64,
    end: u64,
    sampler: AccountSampler,
    rng: StdRng,
    amounts: LogNormal<f64>,
    window_start: i64,
    window_secs: i64,
}

impl TransactionStream {
    /// Recency-biased offset: density grows linearly towards the window end.
    fn next_timestamp(&mut self) -> i64 {
        let u: f64 = self.rng.gen();
        let offset = (self.window_secs as f64 * u.sqrt()) as i64;
        self.window_start + offset.min(self.window_secs - 1)
    }

    fn next_amount(&mut self) -> f64 {
        let raw = self.amounts.sample(&mut self.rng);
        ((raw * 100.0).round() / 100.0).max(0.01)
    }
}

impl Iterator for TransactionStream {
    type Item = Transaction;

    fn next(&mut self) -> Option<Transaction> {
        if self.next_id >= self.end {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let (from_account, to_account) = self.sampler.next_pair();
        let timestamp = self.next_timestamp();
        let amount = self.next_amount();
        Some(Transaction {
            id,
            from_account,
            to_account,
            amount,
            timestamp,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next_id) as usize;
        (remaining, Some(remaining))
    }
}

/// Groups an iterator into `Vec`s of at most `size` items.
pub fn batched<I: Iterator>(iter: I, size: usize) -> impl Iterator<Item = Vec<I::Item>> {
    let size = size.max(1);
    let mut iter = iter.fuse();
    std::iter::from_fn(move || {
        let batch: Vec<I::Item> = iter.by_ref().take(size).collect();
        (!batch.is_empty()).then_some(batch)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn spec(accounts: u64, transactions: u64) -> DatasetSpec {
        DatasetSpec {
            account_count: accounts,
            transaction_count: transactions,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            seed: 42,
            skew: 1.2,
            amount_mu: 4.0,
            amount_sigma: 1.2,
        }
    }

    #[test]
    fn accounts_are_dense() {
        let gen = DatasetGenerator::new(spec(1_000, 0)).unwrap();
        let ids: Vec<u64> = gen.accounts().map(|a| a.id).collect();
        assert_eq!(ids, (0..1_000).collect::<Vec<_>>());
    }

    #[test]
    fn transactions_reference_valid_distinct_accounts() {
        let s = spec(1_000, 10_000);
        let gen = DatasetGenerator::new(s.clone()).unwrap();
        let mut ids = HashSet::new();
        for txn in gen.transactions().unwrap() {
            assert!(txn.from_account < 1_000);
            assert!(txn.to_account < 1_000);
            assert_ne!(txn.from_account, txn.to_account);
            assert!(txn.amount > 0.0);
            assert!(txn.timestamp >= s.window_start() && txn.timestamp < s.window_end());
            assert!(txn.day().date() >= s.start_date && txn.day().date() <= s.end_date);
            assert!(ids.insert(txn.id));
        }
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn restart_replays_identical_sequence() {
        let gen = DatasetGenerator::new(spec(500, 2_000)).unwrap();
        let first: Vec<Transaction> = gen.transactions().unwrap().collect();
        let second: Vec<Transaction> = gen.transactions().unwrap().collect();
        assert_eq!(first, second);
        let accounts_a: Vec<Account> = gen.accounts().collect();
        let accounts_b: Vec<Account> = gen.accounts().collect();
        assert_eq!(accounts_a, accounts_b);
    }

    #[test]
    fn timestamps_are_biased_towards_recent_days() {
        let s = spec(100, 20_000);
        let gen = DatasetGenerator::new(s.clone()).unwrap();
        let midpoint = s.window_start() + (s.window_end() - s.window_start()) / 2;
        let recent = gen
            .transactions()
            .unwrap()
            .filter(|t| t.timestamp >= midpoint)
            .count();
        // sqrt(U) puts ~75% of the mass in the second half.
        assert!(recent > 13_000, "only {recent} transactions in the recent half");
    }

    #[test]
    fn calendar_covers_window() {
        let gen = DatasetGenerator::new(spec(10, 0)).unwrap();
        let days = gen.calendar();
        assert_eq!(days.len(), 366);
        assert_eq!(days.first().unwrap().day_key(), "2024_01_01");
        assert_eq!(days.last().unwrap().day_key(), "2024_12_31");
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(
            DatasetGenerator::new(spec(1, 10)),
            Err(BenchError::Generation(_))
        ));
        assert!(matches!(
            DatasetGenerator::new(spec(0, 10)),
            Err(BenchError::Generation(_))
        ));
        let mut bad = spec(10, 10);
        bad.amount_sigma = 0.0;
        assert!(DatasetGenerator::new(bad).is_err());
    }

    #[test]
    fn top_degree_follows_zipf_rank() {
        let gen = DatasetGenerator::new(spec(500, 20_000)).unwrap();
        let top = gen.top_degree_accounts(3).unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], 0);
        assert!(gen.top_degree_accounts(0).unwrap().is_empty());
    }

    #[test]
    fn batched_splits_with_remainder() {
        let sizes: Vec<usize> = batched(0..12, 5).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(batched(std::iter::empty::<u8>(), 5).count(), 0);
    }
}
