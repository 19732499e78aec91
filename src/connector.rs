//! Backend-neutral connection seams.
//!
//! A [`Connector`] owns a pool and hands out one [`DbConnection`] per [`Connector::acquire`].
//! Releasing a connection is dropping it; [`Checkout`] wraps a connection with the release
//! logging and leak detection shared by every backend.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::SqlExecutorError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

/// Outcome of a single executed statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Key generated by the statement, when the backend reports one.
    pub last_insert_id: Option<i64>,
}

impl ExecuteOutcome {
    #[must_use]
    pub fn generated_keys(&self) -> Vec<i64> {
        self.last_insert_id.into_iter().collect()
    }
}

/// Outcome of a batch executed against one prepared statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rows_affected: u64,
    /// Generated keys in parameter-set order.
    pub generated_keys: Vec<i64>,
}

/// One live physical connection.
#[async_trait]
pub trait DbConnection: Send {
    /// Identity of the underlying physical connection. Stable once a transaction has begun
    /// on it; backends that learn it from the server may report 0 before that.
    fn id(&self) -> u64;

    fn database_type(&self) -> DatabaseType;

    /// Run a statement that produces no rows.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, SqlExecutorError>;

    /// Run a statement and materialize its rows.
    async fn query(&mut self, sql: &str, params: &[RowValues])
    -> Result<ResultSet, SqlExecutorError>;

    /// Run one statement once per parameter set, in order.
    async fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<BatchOutcome, SqlExecutorError>;

    async fn begin(&mut self) -> Result<(), SqlExecutorError>;

    async fn commit(&mut self) -> Result<(), SqlExecutorError>;

    async fn rollback(&mut self) -> Result<(), SqlExecutorError>;
}

/// A source of connections for one database.
#[async_trait]
pub trait Connector: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Name of the driver backing this connector.
    fn driver_name(&self) -> &str;

    /// Connection string rendered from the backend's template (no credentials).
    fn connection_url(&self) -> String;

    /// Check one connection out of the pool. Dropping it releases it.
    async fn acquire(&self) -> Result<Box<dyn DbConnection>, SqlExecutorError>;

    /// Checkouts held longer than this are reported as possible leaks.
    fn leak_detection_threshold(&self) -> Option<Duration> {
        None
    }

    /// Shut the pool down. Connections already checked out stay usable until dropped.
    async fn close(&self) {}
}

/// A checked-out connection that is released when dropped.
pub struct Checkout {
    conn: Box<dyn DbConnection>,
    acquired_at: Instant,
    leak_threshold: Option<Duration>,
}

impl Checkout {
    /// Acquire a connection from `connector`.
    ///
    /// # Errors
    /// Propagates the connector's acquisition error.
    pub async fn acquire(connector: &dyn Connector) -> Result<Self, SqlExecutorError> {
        let conn = connector.acquire().await?;
        tracing::debug!(
            connection_id = conn.id(),
            db_type = %connector.database_type(),
            "connection checked out"
        );
        Ok(Self {
            conn,
            acquired_at: Instant::now(),
            leak_threshold: connector.leak_detection_threshold(),
        })
    }

    /// How long this checkout has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Deref for Checkout {
    type Target = dyn DbConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for Checkout {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("connection_id", &self.conn.id())
            .field("db_type", &self.conn.database_type())
            .field("held_for", &self.held_for())
            .finish()
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        let held = self.held_for();
        if let Some(threshold) = self.leak_threshold
            && held > threshold
        {
            tracing::warn!(
                connection_id = self.conn.id(),
                held_ms = u64::try_from(held.as_millis()).unwrap_or(u64::MAX),
                threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX),
                "connection held past leak detection threshold"
            );
        }
        tracing::debug!(connection_id = self.conn.id(), "connection released");
    }
}

/// Acquire one connection, run `block` against it and release it on every exit path.
///
/// ```rust,no_run
/// use sql_executor::prelude::*;
///
/// # async fn demo(cap: ConfigAndPool) -> Result<(), SqlExecutorError> {
/// let count = sql_executor::run(cap.connector().as_ref(), |conn| {
///     Box::pin(async move {
///         let rs = conn.query("SELECT COUNT(*) AS n FROM t", &[]).await?;
///         rs.first().map_or(Ok(0), |row| row.try_get::<i64>("n"))
///     })
/// })
/// .await?;
/// # let _ = count;
/// # Ok(()) }
/// ```
///
/// # Errors
/// Returns the acquisition error or whatever `block` returns.
pub async fn run<F, R>(connector: &dyn Connector, block: F) -> Result<R, SqlExecutorError>
where
    F: for<'c> FnOnce(
        &'c mut (dyn DbConnection + 'static),
    ) -> BoxFuture<'c, Result<R, SqlExecutorError>>,
{
    let mut checkout = Checkout::acquire(connector).await?;
    block(&mut *checkout).await
}
