//! Async, pipelined rusqlite client
//!
//! SQLite calls block, so they run on plain threads: a manager thread routes
//! plain statements to a small pool of reader threads, while transactions
//! take the manager over entirely (SQLite serializes writers anyway, so
//! there is nothing to gain from queueing more work behind an open write
//! transaction).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::spawn;
use std::time::Instant;

use rusqlite::{ffi, Connection, ErrorCode, TransactionBehavior};
use tokio::sync::{mpsc, oneshot};
use websub_common::database::Error;
use websub_sql_common::database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
use websub_sql_common::pool::{self, Pool, PooledResource};
use websub_sql_common::stmt::{Column, ExpectedSqlResponse, Statement};
use websub_sql_common::ConversionError;

use crate::common::{create_sqlite_pool, from_sqlite, to_sqlite, SqliteConnectionManager};

/// Queued statements before senders start failing
const SQL_QUEUE_SIZE: usize = 10_000;
/// Queries slower than this are logged for debugging
const SLOW_QUERY_THRESHOLD_MS: u128 = 20;
/// Reader threads running statements in parallel
const WORKING_THREAD_POOL_SIZE: usize = 5;

/// Async handle over a pool of SQLite connections
#[derive(Debug, Clone)]
pub struct AsyncRusqlite {
    sender: mpsc::Sender<DbRequest>,
    inflight_requests: Arc<AtomicUsize>,
}

impl From<&str> for AsyncRusqlite {
    fn from(path: &str) -> Self {
        AsyncRusqlite::new(create_sqlite_pool(path))
    }
}

impl From<String> for AsyncRusqlite {
    fn from(path: String) -> Self {
        AsyncRusqlite::new(create_sqlite_pool(&path))
    }
}

#[derive(Debug)]
enum DbRequest {
    Sql(Statement, oneshot::Sender<DbResponse>),
    Begin(oneshot::Sender<DbResponse>),
    Commit(oneshot::Sender<DbResponse>),
    Rollback(oneshot::Sender<DbResponse>),
}

#[derive(Debug)]
enum DbResponse {
    Transaction(mpsc::Sender<DbRequest>),
    AffectedRows(usize),
    Pluck(Option<Column>),
    Row(Option<Vec<Column>>),
    Rows(Vec<Vec<Column>>),
    Error(SqliteError),
    Unexpected,
    Ok,
}

#[derive(thiserror::Error, Debug)]
enum SqliteError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Inner(#[from] Error),

    #[error(transparent)]
    Pool(#[from] pool::Error<rusqlite::Error>),

    #[error("Duplicate")]
    Duplicate,

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl From<SqliteError> for Error {
    fn from(val: SqliteError) -> Self {
        match val {
            SqliteError::Duplicate => Error::Duplicate,
            SqliteError::Conversion(e) => e.into(),
            SqliteError::Inner(e) => e,
            o => Error::Internal(o.to_string()),
        }
    }
}

/// Rewrites unique-constraint failures as `Duplicate`
fn classify(err: SqliteError) -> SqliteError {
    if let SqliteError::Sqlite(rusqlite::Error::SqliteFailure(
        ffi::Error {
            code,
            extended_code,
        },
        _,
    )) = &err
    {
        if *code == ErrorCode::ConstraintViolation
            && (*extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || *extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE)
        {
            return SqliteError::Duplicate;
        }
    }

    err
}

#[inline(always)]
fn process_query(conn: &Connection, statement: Statement) -> Result<DbResponse, SqliteError> {
    let start = Instant::now();
    let expected_response = statement.expected_response;
    let (sql, placeholder_values) = statement.to_sql()?;

    let to_return = if matches!(expected_response, ExpectedSqlResponse::Batch) {
        conn.execute_batch(&sql)?;
        DbResponse::Ok
    } else {
        let mut stmt = conn.prepare_cached(&sql)?;
        for (i, value) in placeholder_values.into_iter().enumerate() {
            stmt.raw_bind_parameter(i + 1, to_sqlite(value))?;
        }

        let columns = stmt.column_count();

        match expected_response {
            ExpectedSqlResponse::AffectedRows => DbResponse::AffectedRows(stmt.raw_execute()?),
            ExpectedSqlResponse::Batch => DbResponse::Unexpected,
            ExpectedSqlResponse::ManyRows => {
                let mut rows = stmt.raw_query();
                let mut results = vec![];

                while let Some(row) = rows.next()? {
                    results.push(
                        (0..columns)
                            .map(|i| row.get(i).map(from_sqlite))
                            .collect::<Result<Vec<_>, _>>()?,
                    )
                }

                DbResponse::Rows(results)
            }
            ExpectedSqlResponse::Pluck => {
                let mut rows = stmt.raw_query();
                DbResponse::Pluck(
                    rows.next()?
                        .map(|row| row.get(0usize).map(from_sqlite))
                        .transpose()?,
                )
            }
            ExpectedSqlResponse::SingleRow => {
                let mut rows = stmt.raw_query();
                let row = rows
                    .next()?
                    .map(|row| {
                        (0..columns)
                            .map(|i| row.get(i).map(from_sqlite))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .transpose()?;
                DbResponse::Row(row)
            }
        }
    };

    let duration = start.elapsed();
    if duration.as_millis() > SLOW_QUERY_THRESHOLD_MS {
        tracing::warn!("[SLOW QUERY] Took {} ms: {}", duration.as_millis(), sql);
    }

    Ok(to_return)
}

type ReaderJob = (
    PooledResource<SqliteConnectionManager>,
    Statement,
    oneshot::Sender<DbResponse>,
);

/// Spawns the reader thread pool and returns its job queue
fn spawn_reader_threads(
    inflight_requests: Arc<AtomicUsize>,
    threads: usize,
) -> std_mpsc::Sender<ReaderJob> {
    let (sender, receiver) = std_mpsc::channel::<ReaderJob>();
    let receiver = Arc::new(Mutex::new(receiver));

    for _ in 0..threads {
        let rx = receiver.clone();
        let inflight_requests = inflight_requests.clone();
        spawn(move || loop {
            let job = match rx.lock() {
                Ok(rx) => rx.recv(),
                Err(_) => return,
            };

            let (conn, statement, reply_to) = match job {
                Ok(job) => job,
                Err(_) => return,
            };

            let _ = match process_query(&conn, statement) {
                Ok(ok) => reply_to.send(ok),
                Err(err) => {
                    let err = classify(err);
                    if !matches!(err, SqliteError::Duplicate) {
                        tracing::error!("Failed query with error {}", err);
                    }
                    reply_to.send(DbResponse::Error(err))
                }
            };

            drop(conn);
            inflight_requests.fetch_sub(1, Ordering::Relaxed);
        });
    }

    sender
}

/// The manager thread: routes statements to readers, runs transactions
/// inline with exclusive access to one connection until finalized.
fn rusqlite_worker_manager(
    mut receiver: mpsc::Receiver<DbRequest>,
    pool: Arc<Pool<SqliteConnectionManager>>,
    inflight_requests: Arc<AtomicUsize>,
) {
    let send_sql_to_thread =
        spawn_reader_threads(inflight_requests.clone(), WORKING_THREAD_POOL_SIZE);

    let mut tx_id: usize = 0;

    while let Some(request) = receiver.blocking_recv() {
        inflight_requests.fetch_add(1, Ordering::Relaxed);
        match request {
            DbRequest::Sql(statement, reply_to) => {
                let conn = match pool.get() {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::error!("Failed to acquire a pool connection: {}", err);
                        inflight_requests.fetch_sub(1, Ordering::Relaxed);
                        let _ = reply_to.send(DbResponse::Error(err.into()));
                        continue;
                    }
                };

                let _ = send_sql_to_thread.send((conn, statement, reply_to));
                continue;
            }
            DbRequest::Begin(reply_to) => {
                let (sender, mut tx_receiver) = mpsc::channel(SQL_QUEUE_SIZE);
                let mut conn = match pool.get() {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::error!("Failed to acquire a pool connection: {}", err);
                        inflight_requests.fetch_sub(1, Ordering::Relaxed);
                        let _ = reply_to.send(DbResponse::Error(err.into()));
                        continue;
                    }
                };

                let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                    Ok(tx) => tx,
                    Err(err) => {
                        tracing::error!("Failed to begin a transaction: {}", err);
                        inflight_requests.fetch_sub(1, Ordering::Relaxed);
                        let _ = reply_to.send(DbResponse::Error(err.into()));
                        continue;
                    }
                };

                // The transaction owns the manager until finalized; when all
                // senders drop without a Commit the rollback is automatic.
                let _ = reply_to.send(DbResponse::Transaction(sender));

                tx_id += 1;

                loop {
                    let request = if let Some(request) = tx_receiver.blocking_recv() {
                        request
                    } else {
                        tracing::trace!("Tx {}: rollback on drop", tx_id);
                        let _ = tx.rollback();
                        break;
                    };

                    match request {
                        DbRequest::Commit(reply_to) => {
                            tracing::trace!("Tx {}: commit", tx_id);
                            let _ = reply_to.send(match tx.commit() {
                                Ok(()) => DbResponse::Ok,
                                Err(err) => {
                                    tracing::error!("Failed commit: {}", err);
                                    DbResponse::Error(err.into())
                                }
                            });
                            break;
                        }
                        DbRequest::Rollback(reply_to) => {
                            tracing::trace!("Tx {}: rollback", tx_id);
                            let _ = reply_to.send(match tx.rollback() {
                                Ok(()) => DbResponse::Ok,
                                Err(err) => {
                                    tracing::error!("Failed rollback: {}", err);
                                    DbResponse::Error(err.into())
                                }
                            });
                            break;
                        }
                        DbRequest::Begin(reply_to) => {
                            let _ = reply_to.send(DbResponse::Unexpected);
                        }
                        DbRequest::Sql(statement, reply_to) => {
                            let _ = match process_query(&tx, statement) {
                                Ok(ok) => reply_to.send(ok),
                                Err(err) => {
                                    let err = classify(err);
                                    if !matches!(err, SqliteError::Duplicate) {
                                        tracing::error!(
                                            "Tx {}: failed query with error {}",
                                            tx_id,
                                            err
                                        );
                                    }
                                    reply_to.send(DbResponse::Error(err))
                                }
                            };
                        }
                    }
                }

                drop(conn);
            }
            DbRequest::Commit(reply_to) => {
                let _ = reply_to.send(DbResponse::Unexpected);
            }
            DbRequest::Rollback(reply_to) => {
                let _ = reply_to.send(DbResponse::Unexpected);
            }
        }

        inflight_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

impl AsyncRusqlite {
    /// Creates a new async wrapper over a SQLite pool
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        let (sender, receiver) = mpsc::channel(SQL_QUEUE_SIZE);
        let inflight_requests = Arc::new(AtomicUsize::new(0));
        let inflight_for_thread = inflight_requests.clone();
        spawn(move || {
            rusqlite_worker_manager(receiver, pool, inflight_for_thread);
        });

        Self {
            sender,
            inflight_requests,
        }
    }

    /// Statements currently queued or running
    pub fn inflight_requests(&self) -> usize {
        self.inflight_requests.load(Ordering::Relaxed)
    }

    async fn request(&self, request: DbRequest, receiver: oneshot::Receiver<DbResponse>) -> Result<DbResponse, Error> {
        self.sender
            .send(request)
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?;

        receiver
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))
    }
}

macro_rules! sql_request {
    ($target:expr, $statement:expr, $expected:ident, $response:ident) => {{
        let (sender, receiver) = oneshot::channel();
        let mut statement = $statement;
        statement.expected_response = ExpectedSqlResponse::$expected;

        $target
            .send(DbRequest::Sql(statement, sender))
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?;

        match receiver
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?
        {
            DbResponse::$response(value) => Ok(value),
            DbResponse::Ok => Err(Error::InvalidDbResponse),
            DbResponse::Error(err) => Err(err.into()),
            _ => Err(Error::InvalidDbResponse),
        }
    }};
}

#[async_trait::async_trait]
impl DatabaseExecutor for AsyncRusqlite {
    fn name() -> &'static str {
        "sqlite"
    }

    async fn execute(&self, statement: Statement) -> Result<usize, Error> {
        sql_request!(self.sender, statement, AffectedRows, AffectedRows)
    }

    async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error> {
        sql_request!(self.sender, statement, SingleRow, Row)
    }

    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error> {
        sql_request!(self.sender, statement, ManyRows, Rows)
    }

    async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error> {
        sql_request!(self.sender, statement, Pluck, Pluck)
    }

    async fn batch(&self, mut statement: Statement) -> Result<(), Error> {
        let (sender, receiver) = oneshot::channel();
        statement.expected_response = ExpectedSqlResponse::Batch;

        match self
            .request(DbRequest::Sql(statement, sender), receiver)
            .await?
        {
            DbResponse::Ok => Ok(()),
            DbResponse::Error(err) => Err(err.into()),
            _ => Err(Error::InvalidDbResponse),
        }
    }
}

#[async_trait::async_trait]
impl DatabaseConnector for AsyncRusqlite {
    type Transaction = Transaction;

    /// Begins a transaction.
    ///
    /// Dropping the returned handle without finalizing rolls it back.
    async fn begin(&self) -> Result<Self::Transaction, Error> {
        let (sender, receiver) = oneshot::channel();
        match self.request(DbRequest::Begin(sender), receiver).await? {
            DbResponse::Transaction(db_sender) => Ok(Transaction { db_sender }),
            DbResponse::Error(err) => Err(err.into()),
            _ => Err(Error::InvalidDbResponse),
        }
    }
}

/// An open SQLite transaction
#[derive(Debug)]
pub struct Transaction {
    db_sender: mpsc::Sender<DbRequest>,
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // After an explicit commit/rollback the receiver is gone, so this
        // try_send quietly fails, which is what we want.
        let (sender, _) = oneshot::channel();
        let _ = self.db_sender.try_send(DbRequest::Rollback(sender));
    }
}

#[async_trait::async_trait]
impl DatabaseExecutor for Transaction {
    fn name() -> &'static str {
        "sqlite"
    }

    async fn execute(&self, statement: Statement) -> Result<usize, Error> {
        sql_request!(self.db_sender, statement, AffectedRows, AffectedRows)
    }

    async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error> {
        sql_request!(self.db_sender, statement, SingleRow, Row)
    }

    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error> {
        sql_request!(self.db_sender, statement, ManyRows, Rows)
    }

    async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error> {
        sql_request!(self.db_sender, statement, Pluck, Pluck)
    }

    async fn batch(&self, mut statement: Statement) -> Result<(), Error> {
        let (sender, receiver) = oneshot::channel();
        statement.expected_response = ExpectedSqlResponse::Batch;

        self.db_sender
            .send(DbRequest::Sql(statement, sender))
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?;

        match receiver
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?
        {
            DbResponse::Ok => Ok(()),
            DbResponse::Error(err) => Err(err.into()),
            _ => Err(Error::InvalidDbResponse),
        }
    }
}

#[async_trait::async_trait]
impl DatabaseTransaction for Transaction {
    async fn commit(self) -> Result<(), Error> {
        let (sender, receiver) = oneshot::channel();
        self.db_sender
            .send(DbRequest::Commit(sender))
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?;

        match receiver
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?
        {
            DbResponse::Ok => Ok(()),
            DbResponse::Error(err) => Err(err.into()),
            _ => Err(Error::InvalidDbResponse),
        }
    }

    async fn rollback(self) -> Result<(), Error> {
        let (sender, receiver) = oneshot::channel();
        self.db_sender
            .send(DbRequest::Rollback(sender))
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?;

        match receiver
            .await
            .map_err(|_| Error::Internal("Database worker is gone".to_owned()))?
        {
            DbResponse::Ok => Ok(()),
            DbResponse::Error(err) => Err(err.into()),
            _ => Err(Error::InvalidDbResponse),
        }
    }
}
