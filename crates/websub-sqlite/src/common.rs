//! SQLite connection management

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use websub_sql_common::pool::{self, DatabaseConfig, DatabasePool, Pool};
use websub_sql_common::value::Value;

/// SQLite pool configuration
#[derive(Clone, Debug)]
pub struct SqliteConfig {
    path: String,
    max_size: usize,
}

impl DatabaseConfig for SqliteConfig {
    fn max_size(&self) -> usize {
        self.max_size
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

impl From<&str> for SqliteConfig {
    fn from(path: &str) -> Self {
        // In-memory databases exist per connection, so the pool must never
        // open a second one.
        let max_size = if path.contains(":memory:") { 1 } else { 20 };
        Self {
            path: path.to_owned(),
            max_size,
        }
    }
}

/// Connection factory applying the pragmas every connection needs
#[derive(Debug)]
pub struct SqliteConnectionManager;

impl DatabasePool for SqliteConnectionManager {
    type Config = SqliteConfig;
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn new_resource(
        config: &Self::Config,
        _stale: Arc<AtomicBool>,
        _timeout: Duration,
    ) -> Result<Self::Connection, pool::Error<Self::Error>> {
        let conn = if config.path.contains(":memory:") {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };

        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.pragma_update(None, "temp_store", "memory")?;
        conn.pragma_update(None, "foreign_keys", "on")?;

        Ok(conn)
    }
}

/// Creates a configured SQLite connection pool
pub fn create_sqlite_pool(path: &str) -> Arc<Pool<SqliteConnectionManager>> {
    Pool::new(path.into())
}

/// Converts a generic value into a rusqlite value
pub(crate) fn to_sqlite(value: Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(n) => rusqlite::types::Value::Integer(n),
        Value::Real(r) => rusqlite::types::Value::Real(r),
        Value::Text(text) => rusqlite::types::Value::Text(text),
        Value::Blob(bytes) => rusqlite::types::Value::Blob(bytes),
    }
}

/// Converts a rusqlite value into a generic value
pub(crate) fn from_sqlite(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(n) => Value::Integer(n),
        rusqlite::types::Value::Real(r) => Value::Real(r),
        rusqlite::types::Value::Text(text) => Value::Text(text),
        rusqlite::types::Value::Blob(bytes) => Value::Blob(bytes),
    }
}
