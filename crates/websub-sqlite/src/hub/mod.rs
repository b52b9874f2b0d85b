//! SQLite hub storage

use websub_sql_common::SQLHubDatabase;

mod async_rusqlite;

pub mod memory;

pub use async_rusqlite::AsyncRusqlite;

/// Hub storage backed by SQLite through rusqlite
pub type HubSqliteDatabase = SQLHubDatabase<AsyncRusqlite>;

#[cfg(test)]
mod test {
    use websub_common::hub_db_test;

    use super::*;

    async fn provide_db(_test_id: String) -> HubSqliteDatabase {
        memory::empty().await.expect("valid db instance")
    }

    hub_db_test!(provide_db);
}
