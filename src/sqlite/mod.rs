// SQLite module - the embedded-file connector
//
// - config: options, pragmas and file preparation
// - connection: bb8 manager and the checked-out connection
// - params / query: value conversion in both directions
// - pool: the connector handed to executors

pub mod config;
pub mod connection;
pub mod params;
pub mod pool;
pub mod query;

pub use config::{JournalMode, SqliteOptions, SqliteOptionsBuilder, Synchronous, TempStore};
pub use connection::{SqliteConnection, SqliteHandle, SqliteManager};
pub use pool::SqliteConnector;
pub use query::build_result_set;
