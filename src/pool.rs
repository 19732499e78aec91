use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connector::Connector;
use crate::error::SqlExecutorError;
use crate::executor::{SqlExecutor, SqlExecutorBuilder};
use crate::types::DatabaseType;

#[cfg(feature = "mysql")]
use crate::mysql::MysqlOptions;
#[cfg(feature = "sqlite")]
use crate::sqlite::SqliteOptions;

/// Backend selection and options, as read from a configuration file.
///
/// ```json
/// { "backend": "sqlite", "path": "data/app.db" }
/// { "backend": "mysql", "flavor": "mariadb", "address": "db:3306",
///   "username": "app", "password": "secret", "database": "shop" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteOptions),
    #[cfg(feature = "mysql")]
    Mysql(MysqlOptions),
}

impl DatabaseConfig {
    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "sqlite")]
            DatabaseConfig::Sqlite(_) => DatabaseType::Sqlite,
            #[cfg(feature = "mysql")]
            DatabaseConfig::Mysql(opts) => opts.flavor.database_type(),
        }
    }
}

/// A connected database: the connector plus the backend it talks to.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct ConfigAndPool {
    connector: Arc<dyn Connector>,
    db_type: DatabaseType,
}

impl ConfigAndPool {
    /// Wrap an already-built connector.
    #[must_use]
    pub fn from_connector(connector: Arc<dyn Connector>) -> Self {
        let db_type = connector.database_type();
        Self { connector, db_type }
    }

    /// Connect to whichever backend `config` selects.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConnectionError` (or `ConfigError`) from the backend.
    pub async fn connect(config: DatabaseConfig) -> Result<Self, SqlExecutorError> {
        match config {
            #[cfg(feature = "sqlite")]
            DatabaseConfig::Sqlite(opts) => Self::new_sqlite(opts).await,
            #[cfg(feature = "mysql")]
            DatabaseConfig::Mysql(opts) => Self::new_mysql(opts).await,
        }
    }

    #[must_use]
    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// An executor over this pool with the default adapters.
    #[must_use]
    pub fn executor(&self) -> SqlExecutor {
        SqlExecutor::new(Arc::clone(&self.connector))
    }

    #[must_use]
    pub fn executor_builder(&self) -> SqlExecutorBuilder {
        SqlExecutor::builder(Arc::clone(&self.connector))
    }

    /// Shut the pool down.
    pub async fn close(&self) {
        self.connector.close().await;
    }
}

impl fmt::Debug for ConfigAndPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigAndPool")
            .field("db_type", &self.db_type)
            .field("driver", &self.connector.driver_name())
            .field("url", &self.connector.connection_url())
            .finish()
    }
}
