use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

use super::config::MysqlOptions;
use super::connection::MysqlConnection;
use crate::connector::{Connector, DbConnection};
use crate::error::SqlExecutorError;
use crate::pool::ConfigAndPool;
use crate::types::DatabaseType;

/// Connector over a sqlx `MySQL` pool, for `MySQL` and `MariaDB` servers.
pub struct MysqlConnector {
    pool: MySqlPool,
    options: MysqlOptions,
}

impl MysqlConnector {
    /// Build the pool and check out one connection to prove the server is reachable.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConfigError` for a malformed address and
    /// `SqlExecutorError::ConnectionError` when no connection can be established.
    pub async fn connect(options: MysqlOptions) -> Result<Self, SqlExecutorError> {
        let connect_options = options.connect_options()?;
        let pool = MySqlPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections())
            .max_lifetime(Some(options.max_lifetime))
            .acquire_timeout(options.connect_timeout)
            .connect_lazy_with(connect_options);

        let probe = pool.acquire().await.map_err(|e| {
            SqlExecutorError::ConnectionError(format!(
                "cannot connect to {}: {e}",
                options.connection_url()
            ))
        })?;
        drop(probe);

        tracing::info!(
            driver = "sqlx-mysql",
            url = %options.connection_url(),
            max_connections = options.max_connections,
            min_connections = options.min_connections(),
            "mysql connector ready"
        );
        Ok(Self { pool, options })
    }

    #[must_use]
    pub fn options(&self) -> &MysqlOptions {
        &self.options
    }

    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn database_type(&self) -> DatabaseType {
        self.options.flavor.database_type()
    }

    fn driver_name(&self) -> &str {
        "sqlx-mysql"
    }

    fn connection_url(&self) -> String {
        self.options.connection_url()
    }

    async fn acquire(&self) -> Result<Box<dyn DbConnection>, SqlExecutorError> {
        let conn = self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => SqlExecutorError::ConnectionError(format!(
                "timed out after {:?} waiting for a connection to {}",
                self.options.connect_timeout,
                self.options.connection_url()
            )),
            other => SqlExecutorError::MysqlError(other),
        })?;
        Ok(Box::new(MysqlConnection::new(conn, self.database_type())))
    }

    fn leak_detection_threshold(&self) -> Option<Duration> {
        Some(self.options.leak_detection_threshold)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!(url = %self.options.connection_url(), "mysql connector closed");
    }
}

impl ConfigAndPool {
    /// Connect to a `MySQL` or `MariaDB` server.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConnectionError` if the server cannot be reached.
    pub async fn new_mysql(opts: MysqlOptions) -> Result<Self, SqlExecutorError> {
        let connector = MysqlConnector::connect(opts).await?;
        Ok(ConfigAndPool::from_connector(Arc::new(connector)))
    }
}
