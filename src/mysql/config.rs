use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnectOptions;

use crate::error::SqlExecutorError;
use crate::pool::ConfigAndPool;
use crate::types::DatabaseType;

const DEFAULT_PORT: u16 = 3306;

/// Server family behind a pooled connector. Both speak the `MySQL` protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MysqlFlavor {
    #[default]
    Mysql,
    Mariadb,
}

impl MysqlFlavor {
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            MysqlFlavor::Mysql => "mysql",
            MysqlFlavor::Mariadb => "mariadb",
        }
    }

    #[must_use]
    pub fn database_type(self) -> DatabaseType {
        match self {
            MysqlFlavor::Mysql => DatabaseType::Mysql,
            MysqlFlavor::Mariadb => DatabaseType::MariaDb,
        }
    }
}

/// Options for a pooled `MySQL` or `MariaDB` connector.
///
/// Pool sizing defaults: `2 * cores + 1` connections, `min(max, 10)` kept idle, 30 minute
/// lifetime, 10 second acquire timeout and a 10 second leak-detection threshold.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlOptions {
    #[serde(default)]
    pub flavor: MysqlFlavor,
    /// `host` or `host:port`.
    pub address: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Defaults to `min(max_connections, 10)`.
    #[serde(default)]
    pub min_idle: Option<u32>,
    #[serde(default = "default_max_lifetime", with = "duration_secs")]
    pub max_lifetime: Duration,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub leak_detection_threshold: Duration,
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
}

fn default_max_connections() -> u32 {
    let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    u32::try_from(cores * 2 + 1).unwrap_or(u32::MAX)
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_statement_cache_capacity() -> usize {
    250
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl MysqlOptions {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            flavor: MysqlFlavor::default(),
            address: address.into(),
            username: username.into(),
            password: password.into(),
            database: database.into(),
            max_connections: default_max_connections(),
            min_idle: None,
            max_lifetime: default_max_lifetime(),
            connect_timeout: default_timeout(),
            leak_detection_threshold: default_timeout(),
            statement_cache_capacity: default_statement_cache_capacity(),
        }
    }

    /// Connections kept open while idle.
    #[must_use]
    pub fn min_connections(&self) -> u32 {
        self.min_idle
            .unwrap_or(10)
            .min(self.max_connections)
    }

    /// Connection string for logs and diagnostics. Never contains credentials.
    #[must_use]
    pub fn connection_url(&self) -> String {
        format!("{}://{}/{}", self.flavor.scheme(), self.address, self.database)
    }

    /// Split `address` into host and port.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConfigError` for an empty host or a non-numeric port.
    pub fn host_and_port(&self) -> Result<(&str, u16), SqlExecutorError> {
        let (host, port) = match self.address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    SqlExecutorError::ConfigError(format!(
                        "invalid port in address {:?}: {e}",
                        self.address
                    ))
                })?;
                (host, port)
            }
            None => (self.address.as_str(), DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(SqlExecutorError::ConfigError(format!(
                "missing host in address {:?}",
                self.address
            )));
        }
        Ok((host, port))
    }

    /// Driver connect options: credentials, `utf8mb4` and the statement cache size.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConfigError` if `address` is malformed.
    pub fn connect_options(&self) -> Result<MySqlConnectOptions, SqlExecutorError> {
        let (host, port) = self.host_and_port()?;
        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(&self.username)
            .database(&self.database)
            .charset("utf8mb4")
            .statement_cache_capacity(self.statement_cache_capacity);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }
}

impl std::fmt::Debug for MysqlOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlOptions")
            .field("flavor", &self.flavor)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("min_idle", &self.min_idle)
            .field("max_lifetime", &self.max_lifetime)
            .field("connect_timeout", &self.connect_timeout)
            .field("leak_detection_threshold", &self.leak_detection_threshold)
            .field("statement_cache_capacity", &self.statement_cache_capacity)
            .finish()
    }
}

/// Fluent builder for `MySQL` / `MariaDB` options.
#[derive(Debug, Clone)]
pub struct MysqlOptionsBuilder {
    opts: MysqlOptions,
}

impl MysqlOptionsBuilder {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            opts: MysqlOptions::new(address, username, password, database),
        }
    }

    #[must_use]
    pub fn flavor(mut self, flavor: MysqlFlavor) -> Self {
        self.opts.flavor = flavor;
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.opts.max_connections = max;
        self
    }

    #[must_use]
    pub fn min_idle(mut self, min_idle: u32) -> Self {
        self.opts.min_idle = Some(min_idle);
        self
    }

    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.opts.max_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.opts.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn leak_detection_threshold(mut self, threshold: Duration) -> Self {
        self.opts.leak_detection_threshold = threshold;
        self
    }

    #[must_use]
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.opts.statement_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn finish(self) -> MysqlOptions {
        self.opts
    }

    /// Build a `ConfigAndPool` for `MySQL` / `MariaDB`.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConnectionError` if no connection can be established.
    pub async fn build(self) -> Result<ConfigAndPool, SqlExecutorError> {
        ConfigAndPool::new_mysql(self.finish()).await
    }
}

impl ConfigAndPool {
    #[must_use]
    pub fn mysql_builder(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> MysqlOptionsBuilder {
        MysqlOptionsBuilder::new(address, username, password, database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizing_follows_core_count() {
        let opts = MysqlOptions::new("db:3306", "app", "pw", "app");
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        assert_eq!(opts.max_connections as usize, cores * 2 + 1);
        assert_eq!(opts.min_connections(), opts.max_connections.min(10));
        assert_eq!(opts.max_lifetime, Duration::from_secs(1800));
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
        assert_eq!(opts.leak_detection_threshold, Duration::from_secs(10));
        assert_eq!(opts.statement_cache_capacity, 250);
    }

    #[test]
    fn min_idle_never_exceeds_max() {
        let opts = MysqlOptionsBuilder::new("db", "app", "", "app")
            .max_connections(3)
            .min_idle(8)
            .finish();
        assert_eq!(opts.min_connections(), 3);
    }

    #[test]
    fn url_depends_on_flavor_and_hides_credentials() {
        let opts = MysqlOptionsBuilder::new("db.internal:3307", "app", "secret", "shop")
            .flavor(MysqlFlavor::Mariadb)
            .finish();
        assert_eq!(opts.connection_url(), "mariadb://db.internal:3307/shop");
        assert!(!format!("{opts:?}").contains("secret"));
    }

    #[test]
    fn address_parsing() {
        let opts = MysqlOptions::new("localhost", "u", "", "d");
        assert_eq!(opts.host_and_port().unwrap(), ("localhost", 3306));
        let opts = MysqlOptions::new("10.0.0.5:3310", "u", "", "d");
        assert_eq!(opts.host_and_port().unwrap(), ("10.0.0.5", 3310));
        let bad = MysqlOptions::new("host:port", "u", "", "d");
        assert!(matches!(
            bad.host_and_port(),
            Err(SqlExecutorError::ConfigError(_))
        ));
    }

    #[test]
    fn durations_deserialize_from_seconds() {
        let opts: MysqlOptions = serde_json::from_str(
            r#"{"flavor":"mariadb","address":"db","username":"u","database":"d","max_lifetime":60}"#,
        )
        .unwrap();
        assert_eq!(opts.flavor, MysqlFlavor::Mariadb);
        assert_eq!(opts.max_lifetime, Duration::from_secs(60));
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
        assert!(opts.password.is_empty());
    }
}
