//! Connection and statement coordination over `SQLite` (rusqlite) and `MySQL`/`MariaDB` (sqlx).
//!
//! A [`Connector`] hands out pooled connections, a [`SqlExecutor`] runs statements against
//! them and maps rows through per-executor [`ResultAdapter`]s, and
//! [`SqlExecutor::with_transaction`] pins every call made inside its body to one connection.
//!
//! ```rust,no_run
//! use sql_executor::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlExecutorError> {
//! let cap = ConfigAndPool::sqlite_builder("data/app.db").build().await?;
//! let executor = cap.executor();
//! executor.execute("CREATE TABLE IF NOT EXISTS t (id TEXT PRIMARY KEY, v INT)").await?;
//! executor
//!     .execute_with("INSERT INTO t VALUES (?, ?)", |stmt: &mut Statement| {
//!         stmt.set(1, "a");
//!         stmt.set(2, 1);
//!     })
//!     .await?;
//! # Ok(()) }
//! ```

pub mod adapter;
pub mod batch;
pub mod connector;
pub mod dao;
pub mod error;
pub mod executor;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod transaction;
pub mod types;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use adapter::{AdapterRegistry, ResultAdapter};
pub use batch::BatchBuilder;
pub use connector::{BatchOutcome, Checkout, Connector, DbConnection, ExecuteOutcome, run};
pub use dao::Dao;
pub use error::SqlExecutorError;
pub use executor::{DbFuture, Dispatch, SqlExecutor, SqlExecutorBuilder};
pub use pool::{ConfigAndPool, DatabaseConfig};
pub use results::{CustomDbRow, FromRowValue, ResultSet};
pub use statement::{Binder, NoParams, Params, Statement};
pub use transaction::{TransactionContext, TransactionEntry};
pub use types::{DatabaseType, RowValues};
