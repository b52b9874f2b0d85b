//! Database driver traits

use std::fmt::Debug;

use websub_common::database::Error;

use crate::stmt::{Column, Statement};

/// Statement execution
///
/// Implemented by connections and by open transactions alike, so repository
/// queries can run against either.
#[async_trait::async_trait]
pub trait DatabaseExecutor: Debug + Sync + Send {
    /// Database driver name
    fn name() -> &'static str;

    /// Executes a statement and returns the affected row count
    async fn execute(&self, statement: Statement) -> Result<usize, Error>;

    /// Runs the query and returns the first row, if any
    async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error>;

    /// Runs the query and returns every matching row
    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error>;

    /// Returns the first column of the first row, if any
    async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error>;

    /// Executes a multi-statement batch
    async fn batch(&self, statement: Statement) -> Result<(), Error>;
}

/// An open database transaction
///
/// Dropping an unfinished transaction must roll it back (or discard the
/// underlying connection, which amounts to the same thing server-side).
#[async_trait::async_trait]
pub trait DatabaseTransaction: DatabaseExecutor + 'static {
    /// Consumes the transaction committing the changes
    async fn commit(self) -> Result<(), Error>;

    /// Consumes the transaction rolling back all changes
    async fn rollback(self) -> Result<(), Error>;
}

/// Database connector
#[async_trait::async_trait]
pub trait DatabaseConnector: DatabaseExecutor + 'static {
    /// Transaction type for this driver
    type Transaction: DatabaseTransaction;

    /// Begin a new transaction
    async fn begin(&self) -> Result<Self::Transaction, Error>;
}
