mod common;

use txgraph_bench::client::GraphClient;
use txgraph_bench::model::{DayKey, SECS_PER_DAY};

#[tokio::test]
async fn direct_and_partitioned_answer_alike() {
    let dir = tempfile::tempdir().unwrap();
    let direct_config = common::config(dir.path(), 300, 5_000);
    let mut partitioned_config = direct_config.clone();
    common::partitioned(&mut partitioned_config);
    partitioned_config.schema.daily_buckets = true;

    let (direct_graph, direct) = common::loaded(&direct_config).await;
    let (partitioned_graph, partitioned) = common::loaded(&partitioned_config).await;

    let a = direct_graph.counts().await.unwrap();
    let b = partitioned_graph.counts().await.unwrap();
    assert_eq!((a.accounts, a.transactions), (b.accounts, b.transactions));

    let end = common::generator(&direct_config).spec().window_end();
    for days in [1, 7, 30, 90, 365] {
        let since = end - days * SECS_PER_DAY;
        assert_eq!(
            direct.range_query(since).await.unwrap(),
            partitioned.range_query(since).await.unwrap(),
            "last {days} days"
        );
    }
    // A bound in the middle of a day still agrees.
    let since = end - 10 * SECS_PER_DAY - 3_600 * 7;
    assert_eq!(
        direct.range_query(since).await.unwrap(),
        partitioned.range_query(since).await.unwrap()
    );

    for account in [0, 1, 7, 150, 299] {
        assert_eq!(
            direct.traverse(account, 2, 10_000).await.unwrap(),
            partitioned.traverse(account, 2, 10_000).await.unwrap()
        );

        let mut via_edges: Vec<u64> = direct
            .supernode_query(account, 100_000)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        let mut via_buckets: Vec<u64> = partitioned
            .supernode_query(account, 100_000)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        via_edges.sort_unstable();
        via_buckets.sort_unstable();
        assert_eq!(via_edges, via_buckets, "account {account}");

        let left = direct.point_read(account).await.unwrap().unwrap();
        let right = partitioned.point_read(account).await.unwrap().unwrap();
        assert_eq!(left.account, right.account);
    }
}

#[tokio::test]
async fn every_transaction_lands_in_exactly_one_day() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 200, 3_000);
    common::partitioned(&mut config);
    let (graph, _) = common::loaded(&config).await;

    for id in 0..3_000u64 {
        let txn = graph.transaction(id).unwrap();
        let day = DayKey::from_timestamp(txn.timestamp);
        assert_eq!(graph.days_containing(id), vec![day.day_key()], "transaction {id}");
        assert_eq!(graph.month_of_day(&day.day_key()), Some(day.month_key()));
        assert_eq!(graph.year_of_month(&day.month_key()), Some(day.year_key()));
    }
    // FROM + TO + IN_DAY per transaction plus the calendar chain
    assert!(graph.relationship_count() > 3 * 3_000);
}

#[tokio::test]
async fn calendar_merge_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 50, 500);
    common::partitioned(&mut config);
    let (graph, schema) = common::loaded(&config).await;

    let before = graph.calendar_sizes();
    // 2024-01-02 ..= 2024-12-31
    assert_eq!(before, (1, 12, 365));

    let calendar = common::generator(&config).calendar();
    schema.prepare(&calendar).await.unwrap();
    schema.prepare(&calendar[..10]).await.unwrap();
    assert_eq!(graph.calendar_sizes(), before);
}

#[tokio::test]
async fn buckets_cover_both_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config(dir.path(), 100, 2_000);
    common::partitioned(&mut config);
    config.schema.daily_buckets = true;
    let (graph, _) = common::loaded(&config).await;

    let txn = graph.transaction(17).unwrap();
    let day = DayKey::from_timestamp(txn.timestamp);
    assert!(graph.bucket_count(txn.from_account, &day).unwrap() >= 1);
    assert!(graph.bucket_count(txn.to_account, &day).unwrap() >= 1);
}
