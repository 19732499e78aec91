use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bb8::{ManageConnection, PooledConnection};
use rusqlite::params_from_iter;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use super::config::SqliteOptions;
use super::params::Params;
use super::query::build_result_set;
use crate::connector::{BatchOutcome, DbConnection, ExecuteOutcome};
use crate::error::SqlExecutorError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// A physical `SQLite` connection as held by the pool.
pub struct SqliteHandle {
    id: u64,
    conn: SharedSqliteConnection,
    broken: bool,
}

impl SqliteHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// bb8 manager opening `SQLite` connections with the configured pragmas.
pub struct SqliteManager {
    options: Arc<SqliteOptions>,
    next_id: AtomicU64,
}

impl SqliteManager {
    #[must_use]
    pub fn new(options: Arc<SqliteOptions>) -> Self {
        Self {
            options,
            next_id: AtomicU64::new(1),
        }
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SqliteHandle;
    type Error = SqlExecutorError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let options = Arc::clone(&self.options);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        async move {
            let conn = spawn_blocking(move || options.open()).await??;
            tracing::debug!(connection_id = id, "sqlite connection opened");
            Ok(SqliteHandle {
                id,
                conn: Arc::new(Mutex::new(conn)),
                broken: false,
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(&conn.conn);
        async move {
            run_blocking(handle, |guard| {
                guard.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken
    }
}

/// A checked-out `SQLite` connection.
///
/// Dropped with a transaction still open, it rolls the transaction back before returning to
/// the pool, or is discarded when that is not possible.
pub struct SqliteConnection {
    conn: PooledConnection<'static, SqliteManager>,
    in_transaction: bool,
}

impl SqliteConnection {
    pub(crate) fn new(conn: PooledConnection<'static, SqliteManager>) -> Self {
        Self {
            conn,
            in_transaction: false,
        }
    }

    /// Run synchronous `rusqlite` logic against the underlying connection.
    ///
    /// # Errors
    /// Returns whatever `func` returns, or `ExecutionError` if the blocking task fails.
    pub async fn with_connection<F, R>(&self, func: F) -> Result<R, SqlExecutorError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlExecutorError> + Send + 'static,
        R: Send + 'static,
    {
        run_blocking(self.conn_handle(), func).await
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn conn_handle(&self) -> SharedSqliteConnection {
        Arc::clone(&self.conn.conn)
    }
}

#[async_trait]
impl DbConnection for SqliteConnection {
    fn id(&self) -> u64 {
        self.conn.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, SqlExecutorError> {
        let sql_owned = sql.to_owned();
        let values = Params::convert(params);
        run_blocking(self.conn_handle(), move |guard| {
            let inserts = inserts_rows(&sql_owned);
            let affected = if values.0.is_empty() {
                // Parameterless text may hold several statements (schema scripts).
                guard.execute_batch(&sql_owned)?;
                guard.changes()
            } else {
                let mut stmt = guard.prepare_cached(&sql_owned)?;
                stmt.execute(params_from_iter(values.as_values().iter()))? as u64
            };
            Ok(ExecuteOutcome {
                rows_affected: affected,
                last_insert_id: inserted_rowid(guard, inserts, affected),
            })
        })
        .await
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlExecutorError> {
        let sql_owned = sql.to_owned();
        let values = Params::convert(params);
        run_blocking(self.conn_handle(), move |guard| {
            let mut stmt = guard.prepare_cached(&sql_owned)?;
            build_result_set(&mut stmt, values.as_values())
        })
        .await
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<BatchOutcome, SqlExecutorError> {
        let sql_owned = sql.to_owned();
        let converted: Vec<Params> = param_sets.iter().map(|p| Params::convert(p)).collect();
        run_blocking(self.conn_handle(), move |guard| {
            let inserts = inserts_rows(&sql_owned);
            let savepoint = guard.savepoint()?;
            let mut outcome = BatchOutcome::default();
            {
                let mut stmt = savepoint.prepare_cached(&sql_owned)?;
                for values in &converted {
                    let affected = stmt.execute(params_from_iter(values.as_values().iter()))? as u64;
                    outcome.rows_affected += affected;
                    outcome
                        .generated_keys
                        .extend(inserted_rowid(&savepoint, inserts, affected));
                }
            }
            savepoint.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn begin(&mut self) -> Result<(), SqlExecutorError> {
        if self.in_transaction {
            return Err(SqlExecutorError::ExecutionError(
                "SQLite transaction already in progress".into(),
            ));
        }
        run_blocking(self.conn_handle(), |guard| {
            guard.execute_batch("BEGIN")?;
            Ok(())
        })
        .await?;
        self.in_transaction = true;
        tracing::debug!(connection_id = self.conn.id, "sqlite BEGIN");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlExecutorError> {
        if !self.in_transaction {
            return Err(SqlExecutorError::ExecutionError(
                "SQLite transaction not active".into(),
            ));
        }
        run_blocking(self.conn_handle(), |guard| {
            guard.execute_batch("COMMIT")?;
            Ok(())
        })
        .await?;
        self.in_transaction = false;
        tracing::debug!(connection_id = self.conn.id, "sqlite COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlExecutorError> {
        if !self.in_transaction {
            return Err(SqlExecutorError::ExecutionError(
                "SQLite transaction not active".into(),
            ));
        }
        let result = run_blocking(self.conn_handle(), |guard| {
            guard.execute_batch("ROLLBACK")?;
            Ok(())
        })
        .await;
        // A failed ROLLBACK leaves the transaction state unknown; Drop decides what to do.
        if result.is_ok() {
            self.in_transaction = false;
            tracing::debug!(connection_id = self.conn.id, "sqlite ROLLBACK");
        }
        result
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        let id = self.conn.id;
        let rolled_back = match self.conn.conn.try_lock() {
            Ok(guard) => guard.execute_batch("ROLLBACK").is_ok(),
            Err(_) => false,
        };
        if rolled_back {
            tracing::debug!(connection_id = id, "rolled back transaction left open on drop");
        } else {
            tracing::warn!(
                connection_id = id,
                "could not roll back transaction left open on drop; discarding connection"
            );
            self.conn.broken = true;
        }
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("id", &self.conn.id)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

/// Row id produced by the statement just run, if it inserted one.
fn inserted_rowid(conn: &rusqlite::Connection, inserts: bool, affected: u64) -> Option<i64> {
    let rowid = conn.last_insert_rowid();
    (inserts && affected > 0 && rowid != 0).then_some(rowid)
}

/// `last_insert_rowid` is only meaningful after INSERT or REPLACE.
fn inserts_rows(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
}

async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, SqlExecutorError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlExecutorError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| SqlExecutorError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}
