//! Generic SQL storage backend for the WebSub hub
//!
//! The hub repository is written once here against standard ANSI SQL, and
//! drivers (sqlite, postgres) only provide statement execution, transactions
//! and pooling. Statements use `:name` placeholders that are rewritten to
//! `$1..$n` before reaching the driver.

pub mod cache;
mod common;
pub mod database;
pub mod hub;
mod macros;
pub mod pool;
pub mod stmt;
pub mod value;

pub use common::{migrate, run_db_operation};
pub use hub::SQLHubDatabase;
pub use websub_common::database::ConversionError;
