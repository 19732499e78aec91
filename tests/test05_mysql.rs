#![cfg(feature = "mysql")]

//! Runs against a live server only when `SQL_EXECUTOR_MYSQL_URL` is set, e.g.
//! `SQL_EXECUTOR_MYSQL_URL=app:secret@127.0.0.1:3306/testing`.

use std::env;

use sql_executor::prelude::*;

fn options_from_env() -> Option<MysqlOptions> {
    let raw = env::var("SQL_EXECUTOR_MYSQL_URL").ok()?;
    let (credentials, rest) = raw.split_once('@')?;
    let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));
    let (address, database) = rest.split_once('/')?;
    let flavor = if env::var_os("SQL_EXECUTOR_MARIADB").is_some() {
        MysqlFlavor::Mariadb
    } else {
        MysqlFlavor::Mysql
    };
    Some(
        MysqlOptionsBuilder::new(address, user, password, database)
            .flavor(flavor)
            .max_connections(4)
            .finish(),
    )
}

#[derive(Debug, PartialEq)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
}

#[tokio::test(flavor = "multi_thread")]
async fn mysql_round_trip_and_transactions() -> Result<(), Box<dyn std::error::Error>> {
    let Some(opts) = options_from_env() else {
        eprintln!("SQL_EXECUTOR_MYSQL_URL not set; skipping");
        return Ok(());
    };
    let cap = ConfigAndPool::new_mysql(opts).await?;
    let executor = cap.executor();
    executor.register_adapter::<Account, _>(|row| {
        Ok(Some(Account {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            balance: row.try_get("balance")?,
        }))
    });

    executor.execute("DROP TABLE IF EXISTS sql_executor_accounts").await?;
    executor
        .execute(
            "CREATE TABLE sql_executor_accounts (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                owner VARCHAR(64) NOT NULL,
                balance BIGINT NOT NULL
            )",
        )
        .await?;

    let mut batch = executor.batch("INSERT INTO sql_executor_accounts (owner, balance) VALUES (?, ?)");
    batch
        .batch(Params(vec!["ana".into(), 100.into()]))
        .batch(Params(vec!["bo".into(), 50.into()]));
    let mut keys = Vec::new();
    executor
        .execute_batch_with_keys(&mut batch, |rs: &ResultSet| {
            for row in &rs.results {
                keys.push(row.try_get::<i64>("generated_key")?);
            }
            Ok(())
        })
        .await?;
    assert_eq!(keys.len(), 2);

    // Plain checkouts skip the id lookup; a transaction learns it alongside BEGIN.
    let exec = executor.clone();
    let server_id = executor
        .with_transaction(move || async move {
            let entry = exec.current_transaction().expect("transaction bound to the body");
            exec.execute("UPDATE sql_executor_accounts SET balance = balance WHERE id = 0")
                .await?;
            Ok::<_, SqlExecutorError>(entry.connection_id())
        })
        .await?;
    assert_ne!(server_id, 0);

    let exec = executor.clone();
    let err = executor
        .with_transaction(move || async move {
            exec.execute("UPDATE sql_executor_accounts SET balance = balance - 10 WHERE owner = 'ana'")
                .await?;
            exec.execute("UPDATE no_such_table SET x = 1").await?;
            Ok::<_, SqlExecutorError>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SqlExecutorError::TransactionError(_)));

    let accounts = executor
        .query_many::<Account, _>("SELECT * FROM sql_executor_accounts ORDER BY id", NoParams)
        .await?;
    assert_eq!(accounts[0].balance, 100, "rolled back update must not persist");
    assert_eq!(accounts[1].owner, "bo");

    executor.execute("DROP TABLE sql_executor_accounts").await?;
    cap.close().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let opts = MysqlOptionsBuilder::new("127.0.0.1:1", "nobody", "", "none")
        .connect_timeout(std::time::Duration::from_secs(1))
        .max_connections(1)
        .min_idle(0)
        .finish();
    let err = ConfigAndPool::new_mysql(opts).await.unwrap_err();
    assert!(err.is_connection_error(), "got {err}");
}
