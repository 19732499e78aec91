use std::fmt;

use async_trait::async_trait;
use sqlx::mysql::{MySqlQueryResult, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, Row};

use super::query::{bind_all, build_result_set};
use crate::connector::{BatchOutcome, DbConnection, ExecuteOutcome};
use crate::error::SqlExecutorError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

/// A checked-out `MySQL` / `MariaDB` connection.
///
/// Parameterless statements go over the text protocol; anything with parameters is
/// prepared (and cached by the driver) then bound. Dropped with a transaction still open,
/// the connection is closed instead of returned to the pool, which ends the transaction
/// server-side.
///
/// The server-side connection id is learned in the same round trip as `BEGIN`; plain
/// checkouts report 0 until then.
pub struct MysqlConnection {
    conn: PoolConnection<MySql>,
    id: Option<u64>,
    db_type: DatabaseType,
    in_transaction: bool,
}

impl MysqlConnection {
    pub(crate) fn new(conn: PoolConnection<MySql>, db_type: DatabaseType) -> Self {
        Self {
            conn,
            id: None,
            db_type,
            in_transaction: false,
        }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn run(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<MySqlQueryResult, SqlExecutorError> {
        let result = if params.is_empty() {
            (&mut *self.conn).execute(sql).await?
        } else {
            bind_all(sql, params).execute(&mut *self.conn).await?
        };
        Ok(result)
    }

    async fn raw(&mut self, sql: &'static str) -> Result<(), SqlExecutorError> {
        (&mut *self.conn).execute(sql).await?;
        tracing::debug!(connection_id = self.id(), statement = sql, "mysql transaction control");
        Ok(())
    }

    async fn run_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<BatchOutcome, SqlExecutorError> {
        let mut outcome = BatchOutcome::default();
        for params in param_sets {
            let result = self.run(sql, params).await?;
            outcome.rows_affected += result.rows_affected();
            outcome.generated_keys.extend(generated_key(&result));
        }
        Ok(outcome)
    }
}

fn generated_key(result: &MySqlQueryResult) -> Option<i64> {
    match result.last_insert_id() {
        0 => None,
        id => i64::try_from(id).ok(),
    }
}

#[async_trait]
impl DbConnection for MysqlConnection {
    fn id(&self) -> u64 {
        self.id.unwrap_or_default()
    }

    fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, SqlExecutorError> {
        let result = self.run(sql, params).await?;
        Ok(ExecuteOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: generated_key(&result),
        })
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlExecutorError> {
        let rows: Vec<MySqlRow> = if params.is_empty() {
            (&mut *self.conn).fetch_all(sql).await?
        } else {
            bind_all(sql, params).fetch_all(&mut *self.conn).await?
        };
        build_result_set(&rows)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<BatchOutcome, SqlExecutorError> {
        if self.in_transaction {
            return self.run_batch(sql, param_sets).await;
        }
        // Outside a transaction the batch still lands all-or-nothing.
        self.raw("BEGIN").await?;
        match self.run_batch(sql, param_sets).await {
            Ok(outcome) => {
                self.raw("COMMIT").await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = self.raw("ROLLBACK").await {
                    tracing::warn!(connection_id = self.id(), error = %rollback_err, "batch rollback failed");
                    self.conn.close_on_drop();
                }
                Err(err)
            }
        }
    }

    async fn begin(&mut self) -> Result<(), SqlExecutorError> {
        if self.in_transaction {
            return Err(SqlExecutorError::ExecutionError(
                "MySQL transaction already in progress".into(),
            ));
        }
        match self.id {
            Some(_) => self.raw("BEGIN").await?,
            None => {
                let row = (&mut *self.conn)
                    .fetch_one(sqlx::raw_sql("BEGIN; SELECT CONNECTION_ID()"))
                    .await?;
                self.id = Some(row.try_get::<u64, _>(0)?);
                tracing::debug!(connection_id = self.id(), "mysql transaction control");
            }
        }
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlExecutorError> {
        if !self.in_transaction {
            return Err(SqlExecutorError::ExecutionError(
                "MySQL transaction not active".into(),
            ));
        }
        self.raw("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlExecutorError> {
        if !self.in_transaction {
            return Err(SqlExecutorError::ExecutionError(
                "MySQL transaction not active".into(),
            ));
        }
        self.raw("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }
}

impl Drop for MysqlConnection {
    fn drop(&mut self) {
        if self.in_transaction {
            tracing::warn!(
                connection_id = self.id(),
                "connection dropped inside a transaction; closing it"
            );
            self.conn.close_on_drop();
        }
    }
}

impl fmt::Debug for MysqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConnection")
            .field("id", &self.id)
            .field("db_type", &self.db_type)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}
