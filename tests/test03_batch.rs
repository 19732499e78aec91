mod common;

use common::{Event, RecordingConnector};
use sql_executor::prelude::*;

fn inserts(connector: &RecordingConnector) -> Vec<Event> {
    connector
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Execute { .. } | Event::Batch { .. }))
        .map(|e| match e {
            Event::Execute { sql, params, .. } => Event::Execute {
                conn: 0,
                sql,
                params,
                transaction: None,
            },
            other => other,
        })
        .collect()
}

#[tokio::test]
async fn singleton_batch_matches_a_plain_execute() -> Result<(), SqlExecutorError> {
    let sql = "INSERT INTO t VALUES (?, ?)";

    let direct = RecordingConnector::new();
    direct
        .executor()
        .execute_with(sql, |s: &mut Statement| {
            s.set(1, "a").set(2, 1);
        })
        .await?;

    let batched = RecordingConnector::new();
    let mut batch = batched.executor().batch(sql);
    batch.batch(|s: &mut Statement| {
        s.set(1, "a").set(2, 1);
    });
    batch.execute().await?;

    assert_eq!(inserts(&direct), inserts(&batched));
    assert_eq!(batched.count(|e| matches!(e, Event::Batch { .. })), 0);
    assert_eq!(batched.acquired(), direct.acquired());
    Ok(())
}

#[tokio::test]
async fn empty_batch_is_a_no_op() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();
    let mut batch = executor.batch("INSERT INTO t VALUES (?)");
    executor.execute_batch(&mut batch).await?;
    batch.execute_async().await?;
    assert_eq!(connector.acquired(), 0);
    assert!(connector.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn entries_run_in_insertion_order_on_one_round_trip() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();
    let mut batch = executor.batch("INSERT INTO t VALUES (?)");
    for i in 0..3 {
        batch.batch(move |s: &mut Statement| {
            s.set(1, i);
        });
    }

    let mut keys = Vec::new();
    executor
        .execute_batch_with_keys(&mut batch, |rs: &ResultSet| {
            for row in &rs.results {
                keys.push(row.try_get::<i64>("generated_key")?);
            }
            Ok(())
        })
        .await?;

    assert_eq!(
        inserts(&connector),
        vec![Event::Batch {
            conn: 1,
            sql: "INSERT INTO t VALUES (?)".into(),
            entries: 3,
        }]
    );
    assert_eq!(keys, vec![1, 2, 3]);
    assert!(batch.is_empty());
    assert_eq!(connector.acquired(), connector.released());
    Ok(())
}

#[tokio::test]
async fn reset_discards_pending_entries() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();
    let mut batch = executor.batch("DELETE FROM t WHERE id = ?");
    batch
        .batch(Params(vec![1.into()]))
        .batch(Params(vec![2.into()]));
    batch.reset();
    assert!(batch.is_empty());
    assert_eq!(batch.sql(), "DELETE FROM t WHERE id = ?");
    batch.execute().await?;
    assert_eq!(connector.acquired(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_inside_a_transaction_share_its_connection() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    let exec = executor.clone();
    executor
        .with_transaction(move || async move {
            exec.execute("DELETE FROM t").await?;
            let mut batch = exec.batch("INSERT INTO t VALUES (?)");
            batch.batch(Params(vec![1.into()])).batch(Params(vec![2.into()]));
            let pending = batch.execute_async();
            assert!(!pending.is_spawned());
            pending.await
        })
        .await?;

    let conns = connector.statement_connections();
    assert_eq!(conns, vec![1, 1]);
    assert_eq!(connector.acquired(), 1);
    Ok(())
}

#[tokio::test]
async fn binder_gaps_fail_the_whole_batch_before_checkout() {
    let connector = RecordingConnector::new();
    let executor = connector.executor();
    let mut batch = executor.batch("INSERT INTO t VALUES (?, ?)");
    batch
        .batch(|s: &mut Statement| {
            s.set(1, 1).set(2, 2);
        })
        .batch(|s: &mut Statement| {
            s.set(2, 2);
        });
    let err = batch.execute().await.unwrap_err();
    assert!(matches!(err, SqlExecutorError::ParameterError(_)));
    assert_eq!(connector.acquired(), 0);
}
