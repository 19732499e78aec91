mod common;

use common::{Event, RecordingConnector};
use sql_executor::prelude::*;

#[tokio::test(flavor = "multi_thread")]
async fn every_statement_in_a_transaction_uses_one_connection() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    let exec = executor.clone();
    let out = executor
        .with_transaction(move || async move {
            exec.execute("UPDATE a SET x = 1").await?;
            exec.execute_with("UPDATE b SET y = ?", Params(vec![2.into()]))
                .await?;
            exec.query_raw("SELECT * FROM c", NoParams).await?;
            exec.execute_async("UPDATE d SET z = 3").await?;
            Ok::<_, SqlExecutorError>("done")
        })
        .await?;
    assert_eq!(out, "done");

    let conns = connector.statement_connections();
    assert_eq!(conns.len(), 4);
    assert!(conns.iter().all(|c| *c == conns[0]));
    assert_eq!(connector.acquired(), 1);
    assert_eq!(connector.released(), 1);

    let events = connector.events();
    assert_eq!(events[1], Event::Begin(conns[0]));
    assert!(events.contains(&Event::Commit(conns[0])));
    assert!(!events.iter().any(|e| matches!(e, Event::Rollback(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn async_calls_inside_a_transaction_run_inline() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    let exec = executor.clone();
    let tx_id = executor
        .with_transaction(move || async move {
            let entry = exec.current_transaction().expect("transaction bound to the body");
            match exec.current_dispatch()? {
                Dispatch::Inline { transaction_id } => assert_eq!(transaction_id, entry.id()),
                Dispatch::Pool(_) => panic!("async work must not leave the transaction task"),
            }

            let pending = exec.execute_async("INSERT INTO t VALUES (1)");
            assert!(!pending.is_spawned());
            pending.await?;

            let rows = exec.query_raw_async("SELECT * FROM t", NoParams);
            assert!(!rows.is_spawned());
            rows.await?;
            Ok::<_, SqlExecutorError>(entry.id())
        })
        .await?;

    for event in connector.events() {
        match event {
            Event::Execute { transaction, .. } | Event::Query { transaction, .. } => {
                assert_eq!(transaction, Some(tx_id));
            }
            _ => {}
        }
    }
    assert!(TransactionContext::current().is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_body_rolls_back_and_clears_the_slot() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    let exec = executor.clone();
    let err = executor
        .with_transaction(move || async move {
            exec.execute("INSERT INTO t VALUES (1)").await?;
            exec.execute("INSERT INTO FAIL VALUES (2)").await?;
            exec.execute("INSERT INTO t VALUES (3)").await?;
            Ok::<_, SqlExecutorError>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SqlExecutorError::TransactionError(_)));
    assert!(err.to_string().contains("forced failure"));

    let first_conn = connector.statement_connections()[0];
    assert!(connector.events().contains(&Event::Rollback(first_conn)));
    assert!(!connector.events().contains(&Event::Commit(first_conn)));
    assert_eq!(connector.count(|e| matches!(e, Event::Execute { .. })), 2);
    assert_eq!(connector.acquired(), connector.released());

    // A second, independent transaction starts clean on a fresh connection.
    let exec = executor.clone();
    let second = executor
        .with_transaction(move || async move {
            let entry = exec.current_transaction().expect("new transaction");
            exec.execute("INSERT INTO t VALUES (4)").await?;
            Ok::<_, SqlExecutorError>(entry.connection_id())
        })
        .await?;
    assert_ne!(second, first_conn);
    assert!(connector.events().contains(&Event::Commit(second)));
    assert_eq!(connector.acquired(), 2);
    assert_eq!(connector.released(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_body_rolls_back() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    let exec = executor.clone();
    let err = executor
        .with_transaction(move || async move {
            exec.execute("INSERT INTO t VALUES (1)").await?;
            if exec.current_transaction().is_some() {
                panic!("boom");
            }
            Ok::<_, SqlExecutorError>(())
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(connector.count(|e| matches!(e, Event::Rollback(_))), 1);
    assert_eq!(connector.count(|e| matches!(e, Event::Commit(_))), 0);
    assert_eq!(connector.acquired(), connector.released());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn work_escaping_the_body_cannot_reuse_its_connection() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    let exec = executor.clone();
    let (late, entry) = executor
        .with_transaction(move || async move {
            exec.execute("UPDATE a SET x = 1").await?;
            let entry = exec.current_transaction().expect("transaction bound to the body");
            Ok::<_, SqlExecutorError>((exec.execute_async("UPDATE late SET x = 2"), entry))
        })
        .await?;

    // The connection is back in the pool as soon as the transaction commits.
    assert_eq!(connector.acquired(), 1);
    assert_eq!(connector.released(), 1);

    let err = late.await.unwrap_err();
    assert!(matches!(err, SqlExecutorError::TransactionError(_)));
    assert!(err.to_string().contains("already finished"), "got {err}");
    assert_eq!(connector.count(|e| matches!(e, Event::Execute { .. })), 1);

    executor.execute("UPDATE b SET y = 3").await?;
    assert_ne!(connector.statement_connections()[1], entry.connection_id());
    assert_eq!(connector.acquired(), 2);
    assert_eq!(connector.released(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn nested_transactions_join_the_outer_one() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    let outer = executor.clone();
    executor
        .with_transaction(move || async move {
            outer.execute("INSERT INTO t VALUES (1)").await?;
            let inner = outer.clone();
            let inner_tx = outer
                .with_transaction(move || async move {
                    inner.execute("INSERT INTO t VALUES (2)").await?;
                    Ok::<_, SqlExecutorError>(inner.current_transaction().map(|e| e.id()))
                })
                .await?;
            assert_eq!(inner_tx, outer.current_transaction().map(|e| e.id()));
            Ok::<_, SqlExecutorError>(())
        })
        .await?;

    assert_eq!(connector.acquired(), 1);
    assert_eq!(connector.count(|e| matches!(e, Event::Begin(_))), 1);
    assert_eq!(connector.count(|e| matches!(e, Event::Commit(_))), 1);
    let conns = connector.statement_connections();
    assert_eq!(conns.len(), 2);
    assert_eq!(conns[0], conns[1]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn checkouts_are_released_on_every_path() -> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    executor.execute("UPDATE ok SET x = 1").await?;
    assert!(executor.execute("UPDATE FAIL SET x = 1").await.is_err());
    assert!(executor.query_raw("SELECT FAIL", NoParams).await.is_err());
    executor
        .register_adapter::<i64, _>(|_| Err(SqlExecutorError::ExecutionError("bad row".into())));
    connector.set_rows(vec![vec![1.into(), "a".into()]]);
    assert!(executor.query_many::<i64, _>("SELECT id", NoParams).await.is_err());
    assert!(executor.execute_async("UPDATE FAIL").await.is_err());

    assert_eq!(connector.acquired(), 5);
    assert_eq!(connector.released(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn outside_a_transaction_each_call_checks_out_its_own_connection()
-> Result<(), SqlExecutorError> {
    let connector = RecordingConnector::new();
    let executor = connector.executor();

    executor.execute("UPDATE a SET x = 1").await?;
    executor.execute("UPDATE a SET x = 2").await?;
    let conns = connector.statement_connections();
    assert_ne!(conns[0], conns[1]);
    assert!(executor.current_transaction().is_none());
    Ok(())
}
