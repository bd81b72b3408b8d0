//! Neo4j / Memgraph adapter over the Bolt protocol.
//!
//! Batches are shipped as parallel column lists and expanded server-side with
//! `UNWIND range(0, size($ids) - 1)`, so one round-trip carries a whole batch.

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query};
use tracing::{debug, info, warn};

use super::{
    Adjacency, AggregateDelta, BucketLink, ClientConfig, GraphClient, GraphCounts, IndexSpec, Mutation,
    RangeScan, WriteBatch,
};
use crate::error::StoreError;
use crate::model::{
    Account, AccountAggregates, AccountKind, AccountRecord, AggregateWindows, DayKey, Transaction,
    TxnSummary,
};

const CREATE_ACCOUNTS: &str = "
UNWIND range(0, size($ids) - 1) AS i
CREATE (:Account {id: $ids[i], name: $names[i], type: $kinds[i], created_at: $created[i]})";

const CREATE_ACCOUNTS_WITH_AGGREGATES: &str = "
UNWIND range(0, size($ids) - 1) AS i
CREATE (:Account {
    id: $ids[i], name: $names[i], type: $kinds[i], created_at: $created[i],
    velocity_1h: 0, velocity_24h: 0, recent_txn_count: 0, avg_amount: 0.0, risk_score: 0.0
})";

const CREATE_TRANSACTIONS: &str = "
UNWIND range(0, size($ids) - 1) AS i
MATCH (src:Account {id: $from[i]})
MATCH (dst:Account {id: $to[i]})
CREATE (t:Transaction {id: $ids[i], amount: $amounts[i], ts: $ts[i], currency: $currency, status: $status})
CREATE (t)-[:FROM]->(src)
CREATE (t)-[:TO]->(dst)";

const MERGE_CALENDAR: &str = "
UNWIND range(0, size($days) - 1) AS i
MERGE (y:Year {key: $years[i]})
MERGE (m:Month {key: $months[i]})
MERGE (y)-[:CONTAINS]->(m)
MERGE (d:Day {key: $days[i]})
ON CREATE SET d.start_ts = $starts[i]
MERGE (m)-[:CONTAINS]->(d)";

const LINK_TO_DAY: &str = "
UNWIND range(0, size($ids) - 1) AS i
MATCH (d:Day {key: $days[i]})
MATCH (t:Transaction {id: $ids[i]})
CREATE (d)-[:CONTAINS]->(t)";

const MERGE_BUCKETS: &str = "
UNWIND range(0, size($keys) - 1) AS i
MATCH (a:Account {id: $accounts[i]})
MATCH (t:Transaction {id: $txns[i]})
MERGE (b:DailyBucket {key: $keys[i]})
ON CREATE SET b.account_id = $accounts[i], b.date = $days[i], b.count = 0
MERGE (a)-[:HAS_BUCKET]->(b)
SET b.count = b.count + 1
CREATE (b)-[:INCLUDES]->(t)";

const BUMP_AGGREGATES: &str = "
UNWIND range(0, size($accounts) - 1) AS i
MATCH (a:Account {id: $accounts[i]})
SET a.velocity_1h = coalesce(a.velocity_1h, 0) + $v1h[i],
    a.velocity_24h = coalesce(a.velocity_24h, 0) + $v24h[i],
    a.recent_txn_count = coalesce(a.recent_txn_count, 0) + $recent[i]";

const REFRESH_AGGREGATES: &str = "
MATCH (a:Account)
CALL {
    WITH a
    OPTIONAL MATCH (a)<-[:FROM]-(t:Transaction)
    WHERE t.ts >= $since_30d AND t.ts < $as_of
    WITH a,
         count(t) AS recent,
         avg(t.amount) AS avg_amount,
         sum(CASE WHEN t.ts >= $since_24h THEN 1 ELSE 0 END) AS v24,
         sum(CASE WHEN t.ts >= $since_1h THEN 1 ELSE 0 END) AS v1
    WITH a, recent, avg_amount, v24, v1, v24 / (recent / 30.0 + 1.0) / 10.0 AS raw_risk
    SET a.recent_txn_count = recent,
        a.velocity_24h = v24,
        a.velocity_1h = v1,
        a.avg_amount = coalesce(avg_amount, 0.0),
        a.risk_score = CASE WHEN raw_risk > 1.0 THEN 1.0 ELSE raw_risk END
} IN TRANSACTIONS OF 10000 ROWS";

const FETCH_ACCOUNT: &str = "
MATCH (a:Account {id: $id})
RETURN a.id AS id, a.name AS name, a.type AS kind, a.created_at AS created_at,
       a.velocity_1h AS velocity_1h, a.velocity_24h AS velocity_24h,
       a.recent_txn_count AS recent_txn_count, a.avg_amount AS avg_amount,
       a.risk_score AS risk_score";

const DIRECT_TRANSACTIONS: &str = "
MATCH (:Account {id: $id})<-[:FROM|TO]-(t:Transaction)
RETURN t.id AS id, t.amount AS amount, t.ts AS ts
LIMIT $limit";

const BUCKET_TRANSACTIONS: &str = "
MATCH (:Account {id: $id})-[:HAS_BUCKET]->(:DailyBucket)-[:INCLUDES]->(t:Transaction)
RETURN t.id AS id, t.amount AS amount, t.ts AS ts
LIMIT $limit";

const COUNT_SINCE_FULL: &str = "
MATCH (t:Transaction)
WHERE t.ts >= $since
RETURN count(t) AS n";

const COUNT_SINCE_PARTITIONED: &str = "
MATCH (d:Day)
WHERE d.key >= $from_day
MATCH (d)-[:CONTAINS]->(t:Transaction)
WHERE t.ts >= $since
RETURN count(t) AS n";

const RESET: &str = "
MATCH (n)
CALL { WITH n DETACH DELETE n } IN TRANSACTIONS OF 10000 ROWS";

const TRAVERSAL_STEP: &str = "<-[:FROM]-(:Transaction)-[:TO]->";

/// Bolt client backed by the `neo4rs` connection pool
pub struct BoltClient {
    graph: Graph,
    uri: String,
}

impl BoltClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, StoreError> {
        let mut builder = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .fetch_size(config.fetch_size)
            .max_connections(config.pool_size);
        if let Some(db) = &config.database {
            builder = builder.db(db.as_str());
        }
        let neo_config = builder
            .build()
            .map_err(|e| StoreError::Protocol(format!("invalid bolt configuration: {e}")))?;

        let graph = Graph::connect(neo_config).await.map_err(classify)?;
        info!(uri = %config.uri, pool_size = config.pool_size, "Connected to graph store");

        Ok(Self {
            graph,
            uri: config.uri,
        })
    }

    async fn scalar(&self, q: Query, column: &str) -> Result<u64, StoreError> {
        let mut rows = self.graph.execute(q).await.map_err(classify)?;
        let row = rows.next().await.map_err(classify)?;
        match row {
            Some(row) => {
                let value: i64 = row
                    .get(column)
                    .map_err(|e| StoreError::Protocol(format!("column {column}: {e}")))?;
                Ok(value.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    async fn summaries(&self, q: Query) -> Result<Vec<TxnSummary>, StoreError> {
        let mut rows = self.graph.execute(q).await.map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            let id: i64 = row.get("id").map_err(decode_error)?;
            let amount: f64 = row.get("amount").map_err(decode_error)?;
            let ts: i64 = row.get("ts").map_err(decode_error)?;
            out.push(TxnSummary {
                id: id as u64,
                amount,
                timestamp: ts,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl GraphClient for BoltClient {
    fn name(&self) -> &str {
        &self.uri
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.scalar(query("RETURN 1 AS ok"), "ok").await.map(|_| ())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.graph.run(query(RESET)).await.map_err(classify)
    }

    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> Result<(), StoreError> {
        for spec in specs {
            let name = format!("{}_{}", spec.label.to_lowercase(), spec.property);
            let statement = if spec.unique {
                format!(
                    "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                    spec.label, spec.property
                )
            } else {
                format!(
                    "CREATE INDEX {name} IF NOT EXISTS FOR (n:{}) ON (n.{})",
                    spec.label, spec.property
                )
            };
            debug!(%statement, "Ensuring index");
            self.graph.run(query(&statement)).await.map_err(classify)?;
        }
        Ok(())
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let queries: Vec<Query> = batch.mutations().iter().filter_map(mutation_query).collect();
        if queries.is_empty() {
            return Ok(());
        }

        let mut txn = self.graph.start_txn().await.map_err(classify)?;
        for q in queries {
            if let Err(e) = txn.run(q).await {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Rollback after failed batch also failed");
                }
                return Err(classify(e));
            }
        }
        txn.commit().await.map_err(classify)
    }

    async fn refresh_aggregates(&self, windows: AggregateWindows) -> Result<u64, StoreError> {
        let q = query(REFRESH_AGGREGATES)
            .param("as_of", windows.as_of)
            .param("since_1h", windows.since_1h())
            .param("since_24h", windows.since_24h())
            .param("since_30d", windows.since_30d());
        self.graph.run(q).await.map_err(classify)?;
        self.scalar(query("MATCH (a:Account) RETURN count(a) AS n"), "n").await
    }

    async fn fetch_account(&self, id: u64) -> Result<Option<AccountRecord>, StoreError> {
        let mut rows = self
            .graph
            .execute(query(FETCH_ACCOUNT).param("id", id as i64))
            .await
            .map_err(classify)?;
        let Some(row) = rows.next().await.map_err(classify)? else {
            return Ok(None);
        };

        let id: i64 = row.get("id").map_err(decode_error)?;
        let name: String = row.get("name").map_err(decode_error)?;
        let kind: String = row.get("kind").map_err(decode_error)?;
        let created_at: i64 = row.get("created_at").map_err(decode_error)?;
        let velocity_1h: Option<i64> = row.get("velocity_1h").map_err(decode_error)?;

        let aggregates = match velocity_1h {
            Some(velocity_1h) => Some(AccountAggregates {
                velocity_1h: velocity_1h.max(0) as u64,
                velocity_24h: row
                    .get::<Option<i64>>("velocity_24h")
                    .map_err(decode_error)?
                    .unwrap_or_default()
                    .max(0) as u64,
                recent_txn_count: row
                    .get::<Option<i64>>("recent_txn_count")
                    .map_err(decode_error)?
                    .unwrap_or_default()
                    .max(0) as u64,
                avg_amount: row
                    .get::<Option<f64>>("avg_amount")
                    .map_err(decode_error)?
                    .unwrap_or_default(),
                risk_score: row
                    .get::<Option<f64>>("risk_score")
                    .map_err(decode_error)?
                    .unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Some(AccountRecord {
            account: Account {
                id: id as u64,
                name,
                kind: AccountKind::parse(&kind).unwrap_or(AccountKind::Standard),
                created_at,
            },
            aggregates,
        }))
    }

    async fn traverse(&self, start: u64, hops: u32, limit: usize) -> Result<Vec<u64>, StoreError> {
        if hops == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let q = query(&traversal_query(hops))
            .param("id", start as i64)
            .param("limit", limit as i64);
        let mut rows = self.graph.execute(q).await.map_err(classify)?;
        let mut reached = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            let id: i64 = row.get("id").map_err(decode_error)?;
            reached.push(id as u64);
        }
        Ok(reached)
    }

    async fn account_transactions(
        &self,
        account: u64,
        via: Adjacency,
        limit: usize,
    ) -> Result<Vec<TxnSummary>, StoreError> {
        let statement = match via {
            Adjacency::Direct => DIRECT_TRANSACTIONS,
            Adjacency::DailyBuckets => BUCKET_TRANSACTIONS,
        };
        let q = query(statement)
            .param("id", account as i64)
            .param("limit", limit as i64);
        self.summaries(q).await
    }

    async fn count_since(&self, since: i64, scan: RangeScan) -> Result<u64, StoreError> {
        let q = match scan {
            RangeScan::Full => query(COUNT_SINCE_FULL).param("since", since),
            RangeScan::DayPartitions { from_day } => query(COUNT_SINCE_PARTITIONED)
                .param("since", since)
                .param("from_day", from_day.day_key()),
        };
        self.scalar(q, "n").await
    }

    async fn counts(&self) -> Result<GraphCounts, StoreError> {
        Ok(GraphCounts {
            accounts: self.scalar(query("MATCH (n:Account) RETURN count(n) AS n"), "n").await?,
            transactions: self
                .scalar(query("MATCH (n:Transaction) RETURN count(n) AS n"), "n")
                .await?,
            days: self.scalar(query("MATCH (n:Day) RETURN count(n) AS n"), "n").await?,
            buckets: self
                .scalar(query("MATCH (n:DailyBucket) RETURN count(n) AS n"), "n")
                .await?,
        })
    }
}

/// Union of the 1..=hops outgoing-transfer patterns; UNION removes duplicates.
fn traversal_query(hops: u32) -> String {
    let branches: Vec<String> = (1..=hops)
        .map(|depth| {
            let mut pattern = String::from("(:Account {id: $id})");
            for _ in 1..depth {
                pattern.push_str(TRAVERSAL_STEP);
                pattern.push_str("(:Account)");
            }
            pattern.push_str(TRAVERSAL_STEP);
            pattern.push_str("(b:Account)");
            format!("MATCH {pattern} RETURN b.id AS id")
        })
        .collect();
    format!(
        "CALL {{ {} }} WITH id WHERE id <> $id RETURN id LIMIT $limit",
        branches.join(" UNION ")
    )
}

fn mutation_query(mutation: &Mutation) -> Option<Query> {
    match mutation {
        Mutation::CreateAccounts { accounts, .. } if accounts.is_empty() => None,
        Mutation::CreateAccounts {
            accounts,
            with_aggregates,
        } => Some(accounts_query(accounts, *with_aggregates)),
        Mutation::CreateTransactions(txns) if txns.is_empty() => None,
        Mutation::CreateTransactions(txns) => Some(transactions_query(txns)),
        Mutation::MergeCalendar(days) if days.is_empty() => None,
        Mutation::MergeCalendar(days) => Some(calendar_query(days)),
        Mutation::LinkToDay(links) if links.is_empty() => None,
        Mutation::LinkToDay(links) => Some(
            query(LINK_TO_DAY)
                .param("ids", links.iter().map(|(id, _)| *id as i64).collect::<Vec<_>>())
                .param("days", links.iter().map(|(_, d)| d.day_key()).collect::<Vec<_>>()),
        ),
        Mutation::MergeBuckets(links) if links.is_empty() => None,
        Mutation::MergeBuckets(links) => Some(buckets_query(links)),
        Mutation::BumpAggregates(deltas) if deltas.is_empty() => None,
        Mutation::BumpAggregates(deltas) => Some(aggregates_query(deltas)),
    }
}

fn accounts_query(accounts: &[Account], with_aggregates: bool) -> Query {
    let statement = if with_aggregates {
        CREATE_ACCOUNTS_WITH_AGGREGATES
    } else {
        CREATE_ACCOUNTS
    };
    query(statement)
        .param("ids", accounts.iter().map(|a| a.id as i64).collect::<Vec<_>>())
        .param("names", accounts.iter().map(|a| a.name.clone()).collect::<Vec<_>>())
        .param(
            "kinds",
            accounts.iter().map(|a| a.kind.as_str()).collect::<Vec<_>>(),
        )
        .param("created", accounts.iter().map(|a| a.created_at).collect::<Vec<_>>())
}

fn transactions_query(txns: &[Transaction]) -> Query {
    query(CREATE_TRANSACTIONS)
        .param("ids", txns.iter().map(|t| t.id as i64).collect::<Vec<_>>())
        .param("from", txns.iter().map(|t| t.from_account as i64).collect::<Vec<_>>())
        .param("to", txns.iter().map(|t| t.to_account as i64).collect::<Vec<_>>())
        .param("amounts", txns.iter().map(|t| t.amount).collect::<Vec<_>>())
        .param("ts", txns.iter().map(|t| t.timestamp).collect::<Vec<_>>())
        .param("currency", Transaction::CURRENCY)
        .param("status", Transaction::STATUS)
}

fn calendar_query(days: &[DayKey]) -> Query {
    query(MERGE_CALENDAR)
        .param("years", days.iter().map(DayKey::year_key).collect::<Vec<_>>())
        .param("months", days.iter().map(DayKey::month_key).collect::<Vec<_>>())
        .param("days", days.iter().map(DayKey::day_key).collect::<Vec<_>>())
        .param("starts", days.iter().map(DayKey::start_timestamp).collect::<Vec<_>>())
}

fn buckets_query(links: &[BucketLink]) -> Query {
    query(MERGE_BUCKETS)
        .param(
            "keys",
            links.iter().map(|l| l.day.bucket_key(l.account)).collect::<Vec<_>>(),
        )
        .param("accounts", links.iter().map(|l| l.account as i64).collect::<Vec<_>>())
        .param("txns", links.iter().map(|l| l.txn as i64).collect::<Vec<_>>())
        .param("days", links.iter().map(|l| l.day.day_key()).collect::<Vec<_>>())
}

fn aggregates_query(deltas: &[AggregateDelta]) -> Query {
    query(BUMP_AGGREGATES)
        .param("accounts", deltas.iter().map(|d| d.account as i64).collect::<Vec<_>>())
        .param("v1h", deltas.iter().map(|d| d.velocity_1h as i64).collect::<Vec<_>>())
        .param("v24h", deltas.iter().map(|d| d.velocity_24h as i64).collect::<Vec<_>>())
        .param(
            "recent",
            deltas.iter().map(|d| d.recent_txn_count as i64).collect::<Vec<_>>(),
        )
}

fn decode_error(err: impl std::fmt::Display) -> StoreError {
    StoreError::Protocol(format!("unexpected row shape: {err}"))
}

/// Maps a driver error onto the retry taxonomy.
fn classify(err: neo4rs::Error) -> StoreError {
    let message = err.to_string();
    if matches!(
        err,
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError
    ) || message.to_ascii_lowercase().contains("connection")
    {
        return StoreError::Connection(message);
    }
    if message.contains("ConstraintValidationFailed") {
        StoreError::Conflict(message)
    } else if message.contains("TransientError") || message.contains("DeadlockDetected") {
        StoreError::Transient(message)
    } else {
        StoreError::Protocol(message)
    }
}
