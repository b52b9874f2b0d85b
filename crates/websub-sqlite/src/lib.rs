//! SQLite storage backend for the WebSub hub

mod common;
pub mod hub;

pub use common::create_sqlite_pool;
pub use hub::HubSqliteDatabase;
