//! In-memory database, mainly for testing purposes

use websub_common::database;

use super::HubSqliteDatabase;

/// Creates a new in-memory [`HubSqliteDatabase`] instance
pub async fn empty() -> Result<HubSqliteDatabase, database::Error> {
    HubSqliteDatabase::new(":memory:").await
}
