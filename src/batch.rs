use std::fmt;

use crate::error::SqlExecutorError;
use crate::executor::{DbFuture, SqlExecutor};
use crate::statement::{Binder, BoxedBinder, boxed};

/// Accumulates parameter binders for repeated executions of one statement.
///
/// Created by [`SqlExecutor::batch`]. Executing drains the accumulated entries, so a
/// builder can be reused for the next round.
///
/// ```rust,no_run
/// use sql_executor::prelude::*;
///
/// # async fn demo(executor: SqlExecutor) -> Result<(), SqlExecutorError> {
/// let mut batch = executor.batch("INSERT INTO users (name) VALUES (?)");
/// for name in ["ana", "bo", "cy"] {
///     batch.batch(move |stmt: &mut Statement| {
///         stmt.set(1, name);
///     });
/// }
/// batch.execute().await?;
/// # Ok(()) }
/// ```
pub struct BatchBuilder {
    sql: String,
    executor: SqlExecutor,
    handlers: Vec<BoxedBinder>,
}

impl BatchBuilder {
    pub(crate) fn new(sql: &str, executor: SqlExecutor) -> Self {
        Self {
            sql: sql.to_owned(),
            executor,
            handlers: Vec::new(),
        }
    }

    /// Append one entry. Binders run when the batch executes, in insertion order.
    pub fn batch<B: Binder>(&mut self, binder: B) -> &mut Self {
        self.handlers.push(boxed(binder));
        self
    }

    /// Discard every accumulated entry.
    pub fn reset(&mut self) -> &mut Self {
        self.handlers.clear();
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn take_handlers(&mut self) -> Vec<BoxedBinder> {
        std::mem::take(&mut self.handlers)
    }

    /// Execute every entry through the owning executor.
    ///
    /// # Errors
    /// Returns connection, binding or driver errors.
    pub async fn execute(&mut self) -> Result<(), SqlExecutorError> {
        let executor = self.executor.clone();
        executor.execute_batch(self).await
    }

    pub fn execute_async(&mut self) -> DbFuture<()> {
        let executor = self.executor.clone();
        executor.execute_batch_async(self)
    }
}

impl fmt::Debug for BatchBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("sql", &self.sql)
            .field("entries", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
