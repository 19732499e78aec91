use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SqlExecutorError;
use crate::pool::ConfigAndPool;

/// `PRAGMA synchronous` levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    Off,
    #[default]
    Normal,
    Full,
    Extra,
}

impl Synchronous {
    #[must_use]
    pub fn as_pragma(self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
            Synchronous::Extra => "EXTRA",
        }
    }
}

/// `PRAGMA temp_store` locations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempStore {
    Default,
    File,
    #[default]
    Memory,
}

impl TempStore {
    #[must_use]
    pub fn as_pragma(self) -> &'static str {
        match self {
            TempStore::Default => "DEFAULT",
            TempStore::File => "FILE",
            TempStore::Memory => "MEMORY",
        }
    }
}

/// `PRAGMA journal_mode` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    #[default]
    Wal,
    Off,
}

impl JournalMode {
    #[must_use]
    pub fn as_pragma(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

/// Options for the embedded `SQLite` connector.
///
/// Everything but `path` defaults to the tuning applied to every new database file:
/// 4 KiB pages, `synchronous = NORMAL`, in-memory temp store, WAL journal and a 5 s busy
/// timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteOptions {
    pub path: PathBuf,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub synchronous: Synchronous,
    #[serde(default)]
    pub temp_store: TempStore,
    #[serde(default)]
    pub journal_mode: JournalMode,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_page_size() -> u32 {
    4096
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl SqliteOptions {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_size: default_page_size(),
            synchronous: Synchronous::default(),
            temp_store: TempStore::default(),
            journal_mode: JournalMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// `true` for a private in-memory database, which has no file to prepare.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    /// Create the database's parent directory and file when missing.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConnectionError` when either cannot be created.
    pub fn prepare_path(&self) -> Result<(), SqlExecutorError> {
        if self.is_memory() {
            return Ok(());
        }
        prepare_path(&self.path)
    }

    /// Open one physical connection with the configured pragmas applied.
    pub(crate) fn open(&self) -> Result<rusqlite::Connection, SqlExecutorError> {
        self.prepare_path()?;
        let conn = rusqlite::Connection::open(&self.path).map_err(|e| {
            SqlExecutorError::ConnectionError(format!(
                "cannot open sqlite database {}: {e}",
                self.path.display()
            ))
        })?;
        conn.busy_timeout(self.busy_timeout())?;
        conn.pragma_update(None, "page_size", self.page_size)?;
        conn.pragma_update(None, "synchronous", self.synchronous.as_pragma())?;
        conn.pragma_update(None, "temp_store", self.temp_store.as_pragma())?;
        let journal: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            self.journal_mode.as_pragma(),
            |row| row.get(0),
        )?;
        tracing::trace!(path = %self.path.display(), journal_mode = %journal, "sqlite pragmas applied");
        Ok(conn)
    }
}

fn prepare_path(path: &Path) -> Result<(), SqlExecutorError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            SqlExecutorError::ConnectionError(format!(
                "cannot create directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                SqlExecutorError::ConnectionError(format!(
                    "cannot create database file {}: {e}",
                    path.display()
                ))
            })?;
        tracing::info!(path = %path.display(), "created sqlite database file");
    }
    Ok(())
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            opts: SqliteOptions::new(path),
        }
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.opts.page_size = page_size;
        self
    }

    #[must_use]
    pub fn synchronous(mut self, synchronous: Synchronous) -> Self {
        self.opts.synchronous = synchronous;
        self
    }

    #[must_use]
    pub fn temp_store(mut self, temp_store: TempStore) -> Self {
        self.opts.temp_store = temp_store;
        self
    }

    #[must_use]
    pub fn journal_mode(mut self, journal_mode: JournalMode) -> Self {
        self.opts.journal_mode = journal_mode;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build a `ConfigAndPool` for `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `SqlExecutorError::ConnectionError` if the file cannot be prepared or the
    /// connection cannot be opened.
    pub async fn build(self) -> Result<ConfigAndPool, SqlExecutorError> {
        ConfigAndPool::new_sqlite(self.finish()).await
    }
}

impl ConfigAndPool {
    #[must_use]
    pub fn sqlite_builder(path: impl Into<PathBuf>) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_embedded_tuning() {
        let opts = SqliteOptions::new("db/app.db");
        assert_eq!(opts.page_size, 4096);
        assert_eq!(opts.synchronous.as_pragma(), "NORMAL");
        assert_eq!(opts.temp_store.as_pragma(), "MEMORY");
        assert_eq!(opts.journal_mode.as_pragma(), "WAL");
        assert_eq!(opts.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn deserializes_with_only_a_path() {
        let opts: SqliteOptions =
            serde_json::from_str(r#"{"path":"x.db","journal_mode":"delete"}"#).unwrap();
        assert_eq!(opts.path, PathBuf::from("x.db"));
        assert_eq!(opts.journal_mode, JournalMode::Delete);
        assert_eq!(opts.busy_timeout_ms, 5000);
    }

    #[test]
    fn prepare_path_creates_directories_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/app.db");
        SqliteOptions::new(&path).prepare_path().unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn prepare_path_reports_unusable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("plain-file");
        std::fs::write(&blocker, b"x").unwrap();
        let err = SqliteOptions::new(blocker.join("app.db"))
            .prepare_path()
            .unwrap_err();
        assert!(err.is_connection_error());
    }
}
