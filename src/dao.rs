//! Key/document table helper.
//!
//! A [`Dao`] stores values of one type in a two-column table, `id VARCHAR(128)` primary key
//! plus a `data TEXT` column holding the value as JSON.

use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SqlExecutorError;
use crate::executor::{DbFuture, SqlExecutor};
use crate::results::CustomDbRow;
use crate::statement::{NoParams, Statement};

type KeyFn<K, V> = Arc<dyn Fn(&V) -> K + Send + Sync>;

/// Typed access to one key/document table.
///
/// ```rust,no_run
/// use serde::{Deserialize, Serialize};
/// use sql_executor::prelude::*;
///
/// #[derive(Serialize, Deserialize)]
/// struct Player { name: String, score: i64 }
///
/// # async fn demo(executor: SqlExecutor) -> Result<(), SqlExecutorError> {
/// let players = Dao::new("players", &executor, |p: &Player| p.name.clone())?;
/// players.create_table().await?;
/// players.save_one(&Player { name: "ana".into(), score: 3 }).await?;
/// let ana = players.select_one(&"ana".to_string()).await?;
/// # let _ = ana;
/// # Ok(()) }
/// ```
pub struct Dao<K, V> {
    table: String,
    executor: SqlExecutor,
    key_of: KeyFn<K, V>,
    _value: PhantomData<fn() -> V>,
}

impl<K, V> Dao<K, V>
where
    K: Display + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    /// Bind a table to `executor`. Registers a JSON adapter for `V` unless one exists.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ConfigError` if `table` is not a plain identifier.
    pub fn new<F>(table: &str, executor: &SqlExecutor, key_of: F) -> Result<Self, SqlExecutorError>
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        validate_identifier(table)?;
        if !executor.adapters().contains::<V>() {
            executor.register_adapter::<V, _>(decode_document::<V>);
        }
        Ok(Self {
            table: table.to_owned(),
            executor: executor.clone(),
            key_of: Arc::new(key_of),
            _value: PhantomData,
        })
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table if it does not exist.
    ///
    /// # Errors
    /// Returns connection or driver errors.
    pub async fn create_table(&self) -> Result<(), SqlExecutorError> {
        self.executor
            .execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id VARCHAR(128) NOT NULL PRIMARY KEY, data TEXT)",
                self.table
            ))
            .await
    }

    /// # Errors
    /// Returns connection, driver or JSON decoding errors.
    pub async fn select_all(&self) -> Result<Vec<V>, SqlExecutorError> {
        self.executor
            .query_many::<V, _>(&format!("SELECT id, data FROM {}", self.table), NoParams)
            .await
    }

    /// # Errors
    /// Returns connection, driver or JSON decoding errors.
    pub async fn select_one(&self, key: &K) -> Result<Option<V>, SqlExecutorError> {
        let id = key.to_string();
        self.executor
            .query_as::<V, _>(
                &format!("SELECT id, data FROM {} WHERE id = ?", self.table),
                move |stmt: &mut Statement| {
                    stmt.set(1, id);
                },
            )
            .await
    }

    pub fn delete_one(&self, key: &K) -> DbFuture<()> {
        let id = key.to_string();
        self.executor.execute_with_async(
            &format!("DELETE FROM {} WHERE id = ?", self.table),
            move |stmt: &mut Statement| {
                stmt.set(1, id);
            },
        )
    }

    pub fn save_one(&self, value: &V) -> DbFuture<()> {
        self.save_all(std::iter::once(value))
    }

    /// Upsert every value in one batch.
    pub fn save_all<'a, I>(&self, values: I) -> DbFuture<()>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        let mut batch = self
            .executor
            .batch(&format!("REPLACE INTO {} (id, data) VALUES (?, ?)", self.table));
        for value in values {
            let id = (self.key_of)(value).to_string();
            let data = match serde_json::to_string(value) {
                Ok(data) => data,
                Err(e) => {
                    return DbFuture::ready(Err(SqlExecutorError::ParameterError(format!(
                        "cannot serialize value for key {id}: {e}"
                    ))));
                }
            };
            batch.batch(move |stmt: &mut Statement| {
                stmt.set(1, id).set(2, data);
            });
        }
        batch.execute_async()
    }
}

fn decode_document<V: DeserializeOwned>(row: &CustomDbRow) -> Result<Option<V>, SqlExecutorError> {
    let Some(data) = row.try_get::<Option<String>>("data")? else {
        return Ok(None);
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| SqlExecutorError::ExecutionError(format!("cannot decode stored document: {e}")))
}

fn validate_identifier(name: &str) -> Result<(), SqlExecutorError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(SqlExecutorError::ConfigError(format!(
            "invalid table name {name:?}"
        )))
    }
}

impl<K, V> fmt::Debug for Dao<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
