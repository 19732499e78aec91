//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::adapter::{AdapterRegistry, ResultAdapter};
pub use crate::batch::BatchBuilder;
pub use crate::connector::{Connector, DbConnection, run};
pub use crate::dao::Dao;
pub use crate::error::SqlExecutorError;
pub use crate::executor::{DbFuture, Dispatch, SqlExecutor, SqlExecutorBuilder};
pub use crate::pool::{ConfigAndPool, DatabaseConfig};
pub use crate::results::{CustomDbRow, FromRowValue, ResultSet};
pub use crate::statement::{Binder, NoParams, Params, Statement};
pub use crate::transaction::TransactionContext;
pub use crate::types::{DatabaseType, RowValues};

#[cfg(feature = "mysql")]
pub use crate::mysql::{MysqlConnector, MysqlFlavor, MysqlOptions, MysqlOptionsBuilder};
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnector, SqliteOptions, SqliteOptionsBuilder};
