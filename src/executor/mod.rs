//! The statement execution façade.
//!
//! Every operation follows the same two steps: a [`Binder`] fills a [`Statement`], then the
//! statement runs on a connection. Outside a transaction the connection is checked out of
//! the executor's [`Connector`] for the duration of one call; inside
//! [`SqlExecutor::with_transaction`] every call uses the transaction's connection.

mod dispatch;

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use tokio::runtime::Handle;

use crate::adapter::{AdapterRef, AdapterRegistry};
use crate::batch::BatchBuilder;
use crate::connector::{Checkout, Connector, DbConnection};
use crate::error::SqlExecutorError;
use crate::results::{CustomDbRow, ResultSet};
use crate::statement::{Binder, BoxedBinder, NoParams, Statement, collect_params};
use crate::transaction::{TransactionContext, TransactionEntry, TransactionGuard};
use crate::types::RowValues;

pub use dispatch::{DbFuture, Dispatch};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Public entry point for statement execution and querying.
///
/// Cheap to clone; clones share the connector, the adapter registry and the runtime
/// override.
#[derive(Clone)]
pub struct SqlExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    connector: Arc<dyn Connector>,
    adapters: AdapterRegistry,
    runtime: RwLock<Option<Handle>>,
}

/// A connection borrowed for one operation.
enum Lease {
    Pooled(Checkout),
    Transaction(TransactionGuard),
}

impl Deref for Lease {
    type Target = dyn DbConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            Lease::Pooled(checkout) => &**checkout,
            Lease::Transaction(guard) => &***guard,
        }
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Lease::Pooled(checkout) => &mut **checkout,
            Lease::Transaction(guard) => &mut ***guard,
        }
    }
}

impl SqlExecutor {
    /// Executor over `connector` with only the built-in adapters and the ambient runtime.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        SqlExecutorBuilder::new(connector).build()
    }

    #[must_use]
    pub fn builder(connector: Arc<dyn Connector>) -> SqlExecutorBuilder {
        SqlExecutorBuilder::new(connector)
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.inner.connector
    }

    #[must_use]
    pub fn adapters(&self) -> &AdapterRegistry {
        &self.inner.adapters
    }

    /// Register the adapter used to map rows into `T`, replacing any previous one.
    pub fn register_adapter<T, F>(&self, adapter: F) -> &Self
    where
        T: 'static,
        F: Fn(&CustomDbRow) -> Result<Option<T>, SqlExecutorError> + Send + Sync + 'static,
    {
        self.inner.adapters.register::<T, F>(adapter);
        self
    }

    /// The adapter registered for `T`.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::AdapterNotFound` naming `T` when none is registered.
    pub fn adapter<T: 'static>(&self) -> Result<AdapterRef<T>, SqlExecutorError> {
        self.inner.adapters.get::<T>()
    }

    /// Route `_async` operations of this executor (and its clones) to `handle`.
    pub fn set_runtime(&self, handle: Handle) {
        let mut guard = match self.inner.runtime.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(handle);
    }

    /// How an `_async` call made right now would run.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConfigError` outside a transaction when no runtime is set
    /// and the caller is not inside a tokio runtime.
    pub fn current_dispatch(&self) -> Result<Dispatch, SqlExecutorError> {
        match TransactionContext::current() {
            Some(entry) => Ok(Dispatch::Inline {
                transaction_id: entry.id(),
            }),
            None => self.runtime().map(Dispatch::Pool),
        }
    }

    /// The transaction bound to the calling task, if any.
    #[must_use]
    pub fn current_transaction(&self) -> Option<TransactionEntry> {
        TransactionContext::current()
    }

    fn runtime(&self) -> Result<Handle, SqlExecutorError> {
        let configured = match self.inner.runtime.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match configured {
            Some(handle) => Ok(handle),
            None => Handle::try_current().map_err(|e| {
                SqlExecutorError::ConfigError(format!(
                    "no tokio runtime available for async dispatch: {e}"
                ))
            }),
        }
    }

    async fn lease(&self) -> Result<Lease, SqlExecutorError> {
        match TransactionContext::current() {
            Some(entry) => entry.lock().await.map(Lease::Transaction),
            None => Checkout::acquire(self.inner.connector.as_ref())
                .await
                .map(Lease::Pooled),
        }
    }

    fn dispatch<T, Fut>(&self, future: Fut) -> DbFuture<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, SqlExecutorError>> + Send + 'static,
    {
        if let Some(entry) = TransactionContext::current() {
            tracing::trace!(transaction_id = entry.id(), "async operation runs inline");
            return DbFuture::inline(TransactionContext::scope(entry, future));
        }
        match self.runtime() {
            Ok(handle) => DbFuture::spawned(handle.spawn(future)),
            Err(err) => DbFuture::ready(Err(err)),
        }
    }

    // ----------------------------------------------------------------------------------
    // execute

    /// Run a statement without parameters.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors.
    pub async fn execute(&self, sql: &str) -> Result<(), SqlExecutorError> {
        self.execute_with(sql, NoParams).await
    }

    /// Bind parameters with `binder`, then run the statement.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors.
    pub async fn execute_with<B: Binder>(
        &self,
        sql: &str,
        binder: B,
    ) -> Result<(), SqlExecutorError> {
        let params = collect_params(binder)?;
        let mut conn = self.lease().await?;
        conn.execute(sql, &params).await?;
        Ok(())
    }

    /// Run the statement and hand the keys it generated to `consumer`.
    ///
    /// The consumer sees a [`ResultSet`] with one `generated_key` column.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors, or the consumer's error.
    pub async fn execute_with_keys<B, C>(
        &self,
        sql: &str,
        binder: B,
        consumer: C,
    ) -> Result<(), SqlExecutorError>
    where
        B: Binder,
        C: FnOnce(&ResultSet) -> Result<(), SqlExecutorError>,
    {
        let params = collect_params(binder)?;
        let outcome = {
            let mut conn = self.lease().await?;
            conn.execute(sql, &params).await?
        };
        consumer(&ResultSet::from_generated_keys(&outcome.generated_keys()))
    }

    pub fn execute_async(&self, sql: &str) -> DbFuture<()> {
        self.execute_with_async(sql, NoParams)
    }

    pub fn execute_with_async<B: Binder>(&self, sql: &str, binder: B) -> DbFuture<()> {
        let this = self.clone();
        let sql = sql.to_owned();
        self.dispatch(async move { this.execute_with(&sql, binder).await })
    }

    pub fn execute_with_keys_async<B, C>(&self, sql: &str, binder: B, consumer: C) -> DbFuture<()>
    where
        B: Binder,
        C: FnOnce(&ResultSet) -> Result<(), SqlExecutorError> + Send + 'static,
    {
        let this = self.clone();
        let sql = sql.to_owned();
        self.dispatch(async move { this.execute_with_keys(&sql, binder, consumer).await })
    }

    // ----------------------------------------------------------------------------------
    // query

    /// Run a query and return its raw rows.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors.
    pub async fn query_raw<B: Binder>(
        &self,
        sql: &str,
        binder: B,
    ) -> Result<ResultSet, SqlExecutorError> {
        let params = collect_params(binder)?;
        let mut conn = self.lease().await?;
        conn.query(sql, &params).await
    }

    /// Run a query and map the whole result with `mapper`.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors, or the mapper's error.
    pub async fn query<T, B, F>(
        &self,
        sql: &str,
        binder: B,
        mapper: F,
    ) -> Result<Option<T>, SqlExecutorError>
    where
        B: Binder,
        F: FnOnce(&ResultSet) -> Result<Option<T>, SqlExecutorError>,
    {
        let rows = self.query_raw(sql, binder).await?;
        mapper(&rows)
    }

    /// Run a query and adapt its first row into `T`.
    ///
    /// # Errors
    /// Fails with `SqlExecutorError::AdapterNotFound` before touching the database when no
    /// adapter is registered for `T`.
    pub async fn query_as<T, B>(&self, sql: &str, binder: B) -> Result<Option<T>, SqlExecutorError>
    where
        T: 'static,
        B: Binder,
    {
        let adapter = self.adapter::<T>()?;
        self.query(sql, binder, move |rows| match rows.first() {
            Some(row) => adapter.adapt(row),
            None => Ok(None),
        })
        .await
    }

    /// Run a query and adapt every row into `T`, in row order.
    ///
    /// Rows the adapter maps to `None` are skipped; equal values are kept.
    ///
    /// # Errors
    /// Fails with `SqlExecutorError::AdapterNotFound` before touching the database when no
    /// adapter is registered for `T`.
    pub async fn query_many<T, B>(&self, sql: &str, binder: B) -> Result<Vec<T>, SqlExecutorError>
    where
        T: 'static,
        B: Binder,
    {
        let adapter = self.adapter::<T>()?;
        let mapped = self
            .query(sql, binder, move |rows| {
                let mut elements = Vec::with_capacity(rows.len());
                for row in &rows.results {
                    if let Some(value) = adapter.adapt(row)? {
                        elements.push(value);
                    }
                }
                Ok(Some(elements))
            })
            .await?;
        Ok(mapped.unwrap_or_default())
    }

    pub fn query_raw_async<B: Binder>(&self, sql: &str, binder: B) -> DbFuture<ResultSet> {
        let this = self.clone();
        let sql = sql.to_owned();
        self.dispatch(async move { this.query_raw(&sql, binder).await })
    }

    pub fn query_async<T, B, F>(&self, sql: &str, binder: B, mapper: F) -> DbFuture<Option<T>>
    where
        T: Send + 'static,
        B: Binder,
        F: FnOnce(&ResultSet) -> Result<Option<T>, SqlExecutorError> + Send + 'static,
    {
        let this = self.clone();
        let sql = sql.to_owned();
        self.dispatch(async move { this.query(&sql, binder, mapper).await })
    }

    pub fn query_as_async<T, B>(&self, sql: &str, binder: B) -> DbFuture<Option<T>>
    where
        T: Send + 'static,
        B: Binder,
    {
        let this = self.clone();
        let sql = sql.to_owned();
        self.dispatch(async move { this.query_as::<T, B>(&sql, binder).await })
    }

    pub fn query_many_async<T, B>(&self, sql: &str, binder: B) -> DbFuture<Vec<T>>
    where
        T: Send + 'static,
        B: Binder,
    {
        let this = self.clone();
        let sql = sql.to_owned();
        self.dispatch(async move { this.query_many::<T, B>(&sql, binder).await })
    }

    // ----------------------------------------------------------------------------------
    // batch

    /// Start a batch of executions of `sql`.
    #[must_use]
    pub fn batch(&self, sql: &str) -> BatchBuilder {
        BatchBuilder::new(sql, self.clone())
    }

    /// Execute every entry accumulated in `builder`, draining it.
    ///
    /// An empty batch is a no-op; a batch with one entry runs as a plain execute.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors.
    pub async fn execute_batch(&self, builder: &mut BatchBuilder) -> Result<(), SqlExecutorError> {
        self.execute_batch_with_keys(builder, |_| Ok(())).await
    }

    /// Execute the batch and hand all generated keys, in entry order, to `consumer`.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors, or the consumer's error.
    pub async fn execute_batch_with_keys<C>(
        &self,
        builder: &mut BatchBuilder,
        consumer: C,
    ) -> Result<(), SqlExecutorError>
    where
        C: FnOnce(&ResultSet) -> Result<(), SqlExecutorError>,
    {
        let sql = builder.sql().to_owned();
        let handlers = builder.take_handlers();
        self.run_batch(&sql, handlers, consumer).await
    }

    pub fn execute_batch_async(&self, builder: &mut BatchBuilder) -> DbFuture<()> {
        self.execute_batch_with_keys_async(builder, |_| Ok(()))
    }

    pub fn execute_batch_with_keys_async<C>(
        &self,
        builder: &mut BatchBuilder,
        consumer: C,
    ) -> DbFuture<()>
    where
        C: FnOnce(&ResultSet) -> Result<(), SqlExecutorError> + Send + 'static,
    {
        let this = self.clone();
        let sql = builder.sql().to_owned();
        let handlers = builder.take_handlers();
        self.dispatch(async move { this.run_batch(&sql, handlers, consumer).await })
    }

    async fn run_batch<C>(
        &self,
        sql: &str,
        handlers: Vec<BoxedBinder>,
        consumer: C,
    ) -> Result<(), SqlExecutorError>
    where
        C: FnOnce(&ResultSet) -> Result<(), SqlExecutorError>,
    {
        if handlers.is_empty() {
            return Ok(());
        }
        let mut param_sets = handlers
            .into_iter()
            .map(|handler| {
                let mut statement = Statement::new();
                handler(&mut statement);
                statement.into_params()
            })
            .collect::<Result<Vec<Vec<RowValues>>, _>>()?;

        let keys = {
            let mut conn = self.lease().await?;
            if param_sets.len() == 1 {
                let params = param_sets.pop().unwrap_or_default();
                conn.execute(sql, &params).await?.generated_keys()
            } else {
                tracing::debug!(entries = param_sets.len(), "executing batch");
                conn.execute_batch(sql, &param_sets).await?.generated_keys
            }
        };
        consumer(&ResultSet::from_generated_keys(&keys))
    }

    // ----------------------------------------------------------------------------------
    // transactions

    /// Run `body` as one transaction.
    ///
    /// A connection is checked out and a transaction begun on it; every executor call made
    /// from the body's task uses that connection, and `_async` calls run inline on that task.
    /// The transaction commits when the body returns `Ok` and rolls back when it returns
    /// `Err` or panics; the error is returned as `SqlExecutorError::TransactionError`.
    ///
    /// Called while a transaction is already active on the current task, the body joins it:
    /// it runs on the same connection without its own commit or rollback.
    ///
    /// ```rust,no_run
    /// use sql_executor::prelude::*;
    ///
    /// # async fn demo(executor: SqlExecutor) -> Result<(), SqlExecutorError> {
    /// let exec = executor.clone();
    /// let moved = executor
    ///     .with_transaction(move || async move {
    ///         exec.execute_with("UPDATE accounts SET balance = balance - ? WHERE id = ?",
    ///             Params(vec![10.into(), 1.into()])).await?;
    ///         exec.execute_with("UPDATE accounts SET balance = balance + ? WHERE id = ?",
    ///             Params(vec![10.into(), 2.into()])).await?;
    ///         Ok::<_, SqlExecutorError>(10)
    ///     })
    ///     .await?;
    /// # let _ = moved;
    /// # Ok(()) }
    /// ```
    pub fn with_transaction<F, Fut, T, E>(&self, body: F) -> DbFuture<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        if let Some(entry) = TransactionContext::current() {
            tracing::debug!(transaction_id = entry.id(), "joining active transaction");
            return DbFuture::inline(TransactionContext::scope(entry, async move {
                body().await.map_err(SqlExecutorError::transaction)
            }));
        }
        let this = self.clone();
        self.dispatch(async move { this.run_transaction(body).await })
    }

    async fn run_transaction<F, Fut, T, E>(&self, body: F) -> Result<T, SqlExecutorError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let mut checkout = Checkout::acquire(self.inner.connector.as_ref()).await?;
        checkout.begin().await?;
        let entry = TransactionEntry::new(checkout);
        tracing::debug!(
            transaction_id = entry.id(),
            connection_id = entry.connection_id(),
            "transaction started"
        );

        let scoped = TransactionContext::scope(entry.clone(), async move { body().await });
        let outcome: Result<T, BoxError> = match AssertUnwindSafe(scoped).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.into()),
            Err(panic) => Err(panic_message(panic.as_ref()).into()),
        };

        let mut conn = entry.lock().await?;
        let result = match outcome {
            Ok(value) => match conn.commit().await {
                Ok(()) => {
                    tracing::debug!(transaction_id = entry.id(), "transaction committed");
                    Ok(value)
                }
                Err(err) => {
                    rollback_quietly(&mut conn, entry.id()).await;
                    Err(SqlExecutorError::transaction(err))
                }
            },
            Err(err) => {
                tracing::debug!(transaction_id = entry.id(), error = %err, "rolling back transaction");
                rollback_quietly(&mut conn, entry.id()).await;
                Err(SqlExecutorError::transaction(err))
            }
        };
        drop(conn);
        drop(entry.release().await);
        result
    }
}

async fn rollback_quietly(conn: &mut Checkout, transaction_id: u64) {
    if let Err(err) = conn.rollback().await {
        tracing::warn!(transaction_id, error = %err, "rollback failed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    tracing::warn!(panic = %detail, "transaction body panicked");
    format!("transaction body panicked: {detail}")
}

impl fmt::Debug for SqlExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlExecutor")
            .field("db_type", &self.inner.connector.database_type())
            .field("url", &self.inner.connector.connection_url())
            .field("adapters", &self.inner.adapters)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SqlExecutor`], for registering adapters and a runtime up front.
pub struct SqlExecutorBuilder {
    connector: Arc<dyn Connector>,
    adapters: AdapterRegistry,
    runtime: Option<Handle>,
}

impl SqlExecutorBuilder {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            adapters: AdapterRegistry::new(),
            runtime: None,
        }
    }

    /// Worker pool for `_async` operations. Defaults to the runtime active at call time.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    #[must_use]
    pub fn register_adapter<T, F>(self, adapter: F) -> Self
    where
        T: 'static,
        F: Fn(&CustomDbRow) -> Result<Option<T>, SqlExecutorError> + Send + Sync + 'static,
    {
        self.adapters.register::<T, F>(adapter);
        self
    }

    #[must_use]
    pub fn build(self) -> SqlExecutor {
        SqlExecutor {
            inner: Arc::new(ExecutorInner {
                connector: self.connector,
                adapters: self.adapters,
                runtime: RwLock::new(self.runtime),
            }),
        }
    }
}
