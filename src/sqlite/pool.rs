use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, RunError};

use super::config::SqliteOptions;
use super::connection::{SqliteConnection, SqliteManager};
use crate::connector::{Connector, DbConnection};
use crate::error::SqlExecutorError;
use crate::pool::ConfigAndPool;
use crate::types::DatabaseType;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector over one long-lived embedded `SQLite` connection.
///
/// The connection sits in a bb8 pool of size one that never expires it, so callers queue
/// for it and a transaction holds it exclusively until it finishes. [`Connector::close`]
/// drops the pool: the idle connection closes and later checkouts fail.
pub struct SqliteConnector {
    pool: RwLock<Option<Pool<SqliteManager>>>,
    options: Arc<SqliteOptions>,
}

impl SqliteConnector {
    /// Open the database, creating its directory and file when missing.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConnectionError` when the file cannot be prepared or opened.
    pub async fn connect(options: SqliteOptions) -> Result<Self, SqlExecutorError> {
        // bb8 retries failed opens until the acquire timeout; bad paths should fail at once.
        options.prepare_path()?;
        let options = Arc::new(options);
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .max_lifetime(None::<Duration>)
            .idle_timeout(None::<Duration>)
            .connection_timeout(ACQUIRE_TIMEOUT)
            .build(SqliteManager::new(Arc::clone(&options)))
            .await?;

        let connector = Self {
            pool: RwLock::new(Some(pool)),
            options,
        };
        // Surface open/pragma failures now rather than on first use.
        drop(connector.checkout().await?);
        tracing::info!(
            driver = connector.driver_name(),
            url = %connector.connection_url(),
            "sqlite connector ready"
        );
        Ok(connector)
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }

    fn pool(&self) -> Option<Pool<SqliteManager>> {
        match self.pool.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn checkout(&self) -> Result<SqliteConnection, SqlExecutorError> {
        let pool = self.pool().ok_or_else(|| {
            SqlExecutorError::ConnectionError(format!(
                "sqlite connector for {} is closed",
                self.options.path.display()
            ))
        })?;
        let conn = pool.get_owned().await.map_err(|e| match e {
            RunError::User(err) => err,
            other => SqlExecutorError::ConnectionError(format!(
                "sqlite connection unavailable: {other}"
            )),
        })?;
        Ok(SqliteConnection::new(conn))
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn driver_name(&self) -> &str {
        "rusqlite"
    }

    fn connection_url(&self) -> String {
        format!("sqlite://{}", self.options.path.display())
    }

    async fn acquire(&self) -> Result<Box<dyn DbConnection>, SqlExecutorError> {
        Ok(Box::new(self.checkout().await?))
    }

    async fn close(&self) {
        let pool = match self.pool.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if pool.is_some() {
            tracing::info!(url = %self.connection_url(), "sqlite connector closed");
        }
    }
}

impl ConfigAndPool {
    /// Open an embedded `SQLite` database.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConnectionError` if the database cannot be opened.
    pub async fn new_sqlite(opts: SqliteOptions) -> Result<Self, SqlExecutorError> {
        let connector = SqliteConnector::connect(opts).await?;
        Ok(ConfigAndPool::from_connector(Arc::new(connector)))
    }
}
