//! Dataset entities shared by the generator, the schema strategies and the
//! store adapters.

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SECS_PER_HOUR: i64 = 3_600;
pub const SECS_PER_DAY: i64 = 86_400;

/// Account tier, every tenth account is premium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Standard,
    Premium,
}

impl AccountKind {
    pub fn for_id(id: u64) -> Self {
        if id % 10 == 0 {
            AccountKind::Premium
        } else {
            AccountKind::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Standard => "standard",
            AccountKind::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Some(AccountKind::Standard),
            "premium" => Some(AccountKind::Premium),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub name: String,
    pub kind: AccountKind,
    /// Unix seconds.
    pub created_at: i64,
}

impl Account {
    pub fn new(id: u64, created_at: i64) -> Self {
        Self {
            id,
            name: format!("Acc_{id}"),
            kind: AccountKind::for_id(id),
            created_at,
        }
    }
}

/// A transfer between two distinct accounts. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub from_account: u64,
    pub to_account: u64,
    pub amount: f64,
    /// Unix seconds.
    pub timestamp: i64,
}

impl Transaction {
    pub const CURRENCY: &'static str = "USD";
    pub const STATUS: &'static str = "COMPLETED";

    pub fn day(&self) -> DayKey {
        DayKey::from_timestamp(self.timestamp)
    }
}

/// Calendar day a transaction belongs to. Renders the canonical
/// `YYYY`, `YYYY_MM` and `YYYY_MM_DD` keys of the temporal hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// UTC day of a unix timestamp. Out-of-range timestamps clamp to the epoch.
    pub fn from_timestamp(ts: i64) -> Self {
        let date = DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.date_naive())
            .unwrap_or_default();
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn year_key(&self) -> String {
        format!("{:04}", self.0.year())
    }

    pub fn month_key(&self) -> String {
        format!("{:04}_{:02}", self.0.year(), self.0.month())
    }

    pub fn day_key(&self) -> String {
        format!("{:04}_{:02}_{:02}", self.0.year(), self.0.month(), self.0.day())
    }

    /// Unix seconds at 00:00 UTC of this day.
    pub fn start_timestamp(&self) -> i64 {
        self.0
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default()
    }

    /// Key of the per-account daily bucket for this day.
    pub fn bucket_key(&self, account: u64) -> String {
        format!("{account}_{}", self.day_key())
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.day_key())
    }
}

/// Denormalized per-account activity fields maintained by the aggregate
/// extension of the partitioned schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountAggregates {
    pub velocity_1h: u64,
    pub velocity_24h: u64,
    pub recent_txn_count: u64,
    pub avg_amount: f64,
    pub risk_score: f64,
}

impl AccountAggregates {
    pub fn risk_score(velocity_24h: u64, recent_txn_count: u64) -> f64 {
        let daily_average = recent_txn_count as f64 / 30.0;
        (velocity_24h as f64 / (daily_average + 1.0) / 10.0).min(1.0)
    }
}

/// Account as returned by a point read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
    pub aggregates: Option<AccountAggregates>,
}

/// Minimal projection returned by adjacency queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnSummary {
    pub id: u64,
    pub amount: f64,
    pub timestamp: i64,
}

/// Reference instant for the aggregate windows (1h, 24h, 30d).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateWindows {
    pub as_of: i64,
}

impl AggregateWindows {
    pub fn since_1h(&self) -> i64 {
        self.as_of - SECS_PER_HOUR
    }

    pub fn since_24h(&self) -> i64 {
        self.as_of - SECS_PER_DAY
    }

    pub fn since_30d(&self) -> i64 {
        self.as_of - 30 * SECS_PER_DAY
    }

    /// Increments a single transaction contributes to its sender.
    pub fn delta_for(&self, ts: i64) -> Option<(u64, u64, u64)> {
        if ts < self.since_30d() || ts >= self.as_of {
            return None;
        }
        Some((
            u64::from(ts >= self.since_1h()),
            u64::from(ts >= self.since_24h()),
            1,
        ))
    }
}
