use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlExecutorError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MysqlError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter binding error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("The adapter for type {0} was not found")]
    AdapterNotFound(&'static str),

    #[error("Transaction failed and was rolled back: {0}")]
    TransactionError(#[source] Box<dyn StdError + Send + Sync + 'static>),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlExecutorError {
    /// Wrap an error escaping a transaction body.
    ///
    /// Errors that already are transaction errors are passed through so nested transactions
    /// do not stack wrappers.
    pub fn transaction<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
        match boxed.downcast::<SqlExecutorError>() {
            Ok(inner) => match *inner {
                SqlExecutorError::TransactionError(source) => {
                    SqlExecutorError::TransactionError(source)
                }
                other => SqlExecutorError::TransactionError(Box::new(other)),
            },
            Err(boxed) => SqlExecutorError::TransactionError(boxed),
        }
    }

    /// `true` when a declared result type had no registered adapter.
    #[must_use]
    pub fn is_adapter_missing(&self) -> bool {
        matches!(self, SqlExecutorError::AdapterNotFound(_))
    }

    /// `true` when the failure happened while obtaining a connection.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            SqlExecutorError::ConnectionError(_) => true,
            #[cfg(feature = "mysql")]
            SqlExecutorError::MysqlError(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for SqlExecutorError {
    fn from(err: tokio::task::JoinError) -> Self {
        SqlExecutorError::ExecutionError(format!("worker task failed: {err}"))
    }
}
