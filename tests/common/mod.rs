#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sql_executor::prelude::*;
use sql_executor::{BatchOutcome, ExecuteOutcome};

/// Everything the recording connector observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire(u64),
    Release(u64),
    Begin(u64),
    Commit(u64),
    Rollback(u64),
    Execute {
        conn: u64,
        sql: String,
        params: Vec<RowValues>,
        /// Transaction bound to the task the statement ran on.
        transaction: Option<u64>,
    },
    Query {
        conn: u64,
        sql: String,
        transaction: Option<u64>,
    },
    Batch {
        conn: u64,
        sql: String,
        entries: usize,
    },
}

#[derive(Default)]
struct Shared {
    next_id: AtomicU64,
    next_key: AtomicI64,
    acquired: AtomicUsize,
    released: AtomicUsize,
    events: Mutex<Vec<Event>>,
    rows: Mutex<Vec<Vec<RowValues>>>,
}

impl Shared {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Test double handing out a fresh connection id per acquisition.
///
/// Statements whose SQL contains `FAIL` return an execution error. Every query returns the
/// canned rows set with [`RecordingConnector::set_rows`] under the columns `id` and `name`.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    shared: Arc<Shared>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executor(&self) -> SqlExecutor {
        SqlExecutor::new(Arc::new(self.clone()))
    }

    pub fn set_rows(&self, rows: Vec<Vec<RowValues>>) {
        *self.shared.rows.lock().unwrap() = rows;
    }

    pub fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    /// Connection ids that ran an execute, query or batch, in order.
    pub fn statement_connections(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Execute { conn, .. } | Event::Query { conn, .. } | Event::Batch { conn, .. } => {
                    Some(conn)
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn driver_name(&self) -> &str {
        "recording"
    }

    fn connection_url(&self) -> String {
        "mock://recording".into()
    }

    async fn acquire(&self) -> Result<Box<dyn DbConnection>, SqlExecutorError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        self.shared.record(Event::Acquire(id));
        Ok(Box::new(RecordingConnection {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct RecordingConnection {
    id: u64,
    shared: Arc<Shared>,
}

fn current_transaction() -> Option<u64> {
    TransactionContext::current().map(|entry| entry.id())
}

fn check(sql: &str) -> Result<(), SqlExecutorError> {
    if sql.contains("FAIL") {
        Err(SqlExecutorError::ExecutionError(format!("forced failure: {sql}")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl DbConnection for RecordingConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecuteOutcome, SqlExecutorError> {
        self.shared.record(Event::Execute {
            conn: self.id,
            sql: sql.to_owned(),
            params: params.to_vec(),
            transaction: current_transaction(),
        });
        check(sql)?;
        let key = self.shared.next_key.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ExecuteOutcome {
            rows_affected: 1,
            last_insert_id: Some(key),
        })
    }

    async fn query(
        &mut self,
        sql: &str,
        _params: &[RowValues],
    ) -> Result<ResultSet, SqlExecutorError> {
        self.shared.record(Event::Query {
            conn: self.id,
            sql: sql.to_owned(),
            transaction: current_transaction(),
        });
        check(sql)?;
        let mut rs = ResultSet::default();
        rs.set_column_names(Arc::new(vec!["id".to_string(), "name".to_string()]));
        for row in self.shared.rows.lock().unwrap().iter() {
            rs.add_row_values(row.clone());
        }
        Ok(rs)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<BatchOutcome, SqlExecutorError> {
        self.shared.record(Event::Batch {
            conn: self.id,
            sql: sql.to_owned(),
            entries: param_sets.len(),
        });
        check(sql)?;
        let keys = param_sets
            .iter()
            .map(|_| self.shared.next_key.fetch_add(1, Ordering::SeqCst) + 1)
            .collect::<Vec<_>>();
        Ok(BatchOutcome {
            rows_affected: param_sets.len() as u64,
            generated_keys: keys,
        })
    }

    async fn begin(&mut self) -> Result<(), SqlExecutorError> {
        self.shared.record(Event::Begin(self.id));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlExecutorError> {
        self.shared.record(Event::Commit(self.id));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlExecutorError> {
        self.shared.record(Event::Rollback(self.id));
        Ok(())
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
        self.shared.record(Event::Release(self.id));
    }
}

/// A unique on-disk database path inside a fresh temp directory.
pub fn temp_db(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(format!("{name}.db"))
}
