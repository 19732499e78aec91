// MySQL / MariaDB module - the pooled-network connector
//
// - config: options, flavors and pool sizing
// - connection: the checked-out sqlx connection
// - query: parameter binding and row decoding
// - pool: the connector handed to executors

pub mod config;
pub mod connection;
pub mod pool;
pub mod query;

pub use config::{MysqlFlavor, MysqlOptions, MysqlOptionsBuilder};
pub use connection::MysqlConnection;
pub use pool::MysqlConnector;
