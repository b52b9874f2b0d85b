//! PostgreSQL storage backend for the WebSub hub
//!
//! Connections are created lazily: `new_resource` cannot block, so each
//! pooled slot spawns its own connect task and the first statement waits for
//! it. A broken socket flags the slot stale and the pool discards it.

use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use db::{pg_batch, pg_execute, pg_fetch_all, pg_fetch_one, pg_pluck};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_postgres::{connect, Client, Error as PgError, NoTls};
use websub_common::database::Error;
use websub_sql_common::database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
use websub_sql_common::pool::{DatabaseConfig, DatabasePool, Pool, PooledResource};
use websub_sql_common::stmt::{query, Column, Statement};
use websub_sql_common::SQLHubDatabase;

mod db;
pub mod listener;
mod value;

/// Connection factory for the pool
#[derive(Debug)]
pub struct PgConnectionPool;

/// TLS handling derived from the connection string's `sslmode`
#[derive(Clone)]
pub enum SslMode {
    /// Plaintext
    NoTls(NoTls),
    /// TLS through native-tls
    NativeTls(MakeTlsConnector),
}

const SSLMODE_VERIFY_FULL: &str = "sslmode=verify-full";
const SSLMODE_VERIFY_CA: &str = "sslmode=verify-ca";
const SSLMODE_PREFER: &str = "sslmode=prefer";
const SSLMODE_ALLOW: &str = "sslmode=allow";
const SSLMODE_REQUIRE: &str = "sslmode=require";

impl Default for SslMode {
    fn default() -> Self {
        SslMode::NoTls(NoTls {})
    }
}

impl Debug for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let debug_text = match self {
            Self::NoTls(_) => "NoTls",
            Self::NativeTls(_) => "NativeTls",
        };

        write!(f, "SslMode::{debug_text}")
    }
}

/// Postgres configuration
#[derive(Clone, Debug)]
pub struct PgConfig {
    url: String,
    schema: Option<String>,
    tls: SslMode,
}

impl DatabaseConfig for PgConfig {
    fn default_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn max_size(&self) -> usize {
        20
    }
}

impl PgConfig {
    /// Strip a non-standard `schema=` token from the connection string
    fn strip_schema(input: &str) -> (Option<String>, String) {
        let mut schema: Option<String> = None;

        let mut parts = Vec::new();
        for token in input.split_whitespace() {
            if let Some(rest) = token.strip_prefix("schema=") {
                schema = Some(rest.to_string());
            } else {
                parts.push(token);
            }
        }

        (schema, parts.join(" "))
    }
}

impl From<&str> for PgConfig {
    fn from(conn_str: &str) -> Self {
        let (schema, conn_str) = Self::strip_schema(conn_str);

        fn build_tls(accept_invalid_certs: bool, accept_invalid_hostnames: bool) -> SslMode {
            let mut builder = TlsConnector::builder();
            if accept_invalid_certs {
                builder.danger_accept_invalid_certs(true);
            }
            if accept_invalid_hostnames {
                builder.danger_accept_invalid_hostnames(true);
            }

            match builder.build() {
                Ok(connector) => SslMode::NativeTls(MakeTlsConnector::new(connector)),
                Err(_) => SslMode::NoTls(NoTls {}),
            }
        }

        let tls = if conn_str.contains(SSLMODE_VERIFY_FULL) {
            // Strict TLS: valid certs and hostnames required
            build_tls(false, false)
        } else if conn_str.contains(SSLMODE_VERIFY_CA) {
            build_tls(false, true)
        } else if conn_str.contains(SSLMODE_PREFER)
            || conn_str.contains(SSLMODE_ALLOW)
            || conn_str.contains(SSLMODE_REQUIRE)
        {
            build_tls(true, true)
        } else {
            SslMode::NoTls(NoTls {})
        };

        PgConfig {
            url: conn_str,
            schema,
            tls,
        }
    }
}

impl DatabasePool for PgConnectionPool {
    type Config = PgConfig;

    type Connection = PostgresConnection;

    type Error = PgError;

    fn new_resource(
        config: &Self::Config,
        stale: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Result<Self::Connection, websub_sql_common::pool::Error<Self::Error>> {
        Ok(PostgresConnection::new(config.to_owned(), timeout, stale))
    }
}

/// A lazily-established postgres connection
#[derive(Debug)]
pub struct PostgresConnection {
    timeout: Duration,
    error: Arc<Mutex<Option<Error>>>,
    result: Arc<OnceLock<Client>>,
    notify: Arc<Notify>,
}

async fn select_schema(conn: &Client, schema: &str) -> Result<(), Error> {
    conn.batch_execute(&format!(
        r#"
        CREATE SCHEMA IF NOT EXISTS "{schema}";
        SET search_path TO "{schema}"
        "#
    ))
    .await
    .map_err(|e| Error::Database(Box::new(e)))
}

impl PostgresConnection {
    /// Creates a new instance; connection happens in the background
    pub fn new(config: PgConfig, timeout: Duration, stale: Arc<AtomicBool>) -> Self {
        let error = Arc::new(Mutex::new(None));
        let result = Arc::new(OnceLock::new());
        let notify = Arc::new(Notify::new());
        let error_clone = error.clone();
        let result_clone = result.clone();
        let notify_clone = notify.clone();

        tokio::spawn(async move {
            let connected = match config.tls {
                SslMode::NoTls(tls) => connect(&config.url, tls).await.map(|(client, conn)| {
                    let stale = stale.clone();
                    tokio::spawn(async move {
                        let _ = conn.await;
                        stale.store(true, std::sync::atomic::Ordering::Release);
                    });
                    client
                }),
                SslMode::NativeTls(tls) => connect(&config.url, tls).await.map(|(client, conn)| {
                    let stale = stale.clone();
                    tokio::spawn(async move {
                        let _ = conn.await;
                        stale.store(true, std::sync::atomic::Ordering::Release);
                    });
                    client
                }),
            };

            let client = match connected {
                Ok(client) => client,
                Err(err) => {
                    *error_clone.lock().await = Some(Error::Database(Box::new(err)));
                    notify_clone.notify_waiters();
                    return;
                }
            };

            if let Some(schema) = config.schema.as_ref() {
                if let Err(err) = select_schema(&client, schema).await {
                    *error_clone.lock().await = Some(err);
                    stale.store(true, std::sync::atomic::Ordering::Release);
                    notify_clone.notify_waiters();
                    return;
                }
            }

            let _ = result_clone.set(client);
            notify_clone.notify_waiters();
        });

        Self {
            error,
            timeout,
            result,
            notify,
        }
    }

    /// The connected client, waiting out the in-flight connect if needed.
    /// The original connect error is returned once; later callers get a
    /// generic failure.
    async fn inner(&self) -> Result<&Client, Error> {
        if let Some(client) = self.result.get() {
            return Ok(client);
        }

        if let Some(error) = self.error.lock().await.take() {
            return Err(error);
        }

        if timeout(self.timeout, self.notify.notified()).await.is_err() {
            return Err(Error::Internal("Timeout".to_owned()));
        }

        if let Some(client) = self.result.get() {
            Ok(client)
        } else if let Some(error) = self.error.lock().await.take() {
            Err(error)
        } else {
            Err(Error::Internal("Failed connection".to_owned()))
        }
    }
}

#[async_trait::async_trait]
impl DatabaseExecutor for PostgresConnection {
    fn name() -> &'static str {
        "postgres"
    }

    async fn execute(&self, statement: Statement) -> Result<usize, Error> {
        pg_execute(self.inner().await?, statement).await
    }

    async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error> {
        pg_fetch_one(self.inner().await?, statement).await
    }

    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error> {
        pg_fetch_all(self.inner().await?, statement).await
    }

    async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error> {
        pg_pluck(self.inner().await?, statement).await
    }

    async fn batch(&self, statement: Statement) -> Result<(), Error> {
        pg_batch(self.inner().await?, statement).await
    }
}

/// Pooled postgres connector
#[derive(Debug, Clone)]
pub struct PgPool {
    pool: Arc<Pool<PgConnectionPool>>,
}

impl From<&str> for PgPool {
    fn from(conn_str: &str) -> Self {
        Self {
            pool: Pool::new(conn_str.into()),
        }
    }
}

impl From<String> for PgPool {
    fn from(conn_str: String) -> Self {
        conn_str.as_str().into()
    }
}

impl PgPool {
    fn conn(&self) -> Result<PooledResource<PgConnectionPool>, Error> {
        self.pool.get().map_err(|e| Error::Database(Box::new(e)))
    }
}

#[async_trait::async_trait]
impl DatabaseExecutor for PgPool {
    fn name() -> &'static str {
        "postgres"
    }

    async fn execute(&self, statement: Statement) -> Result<usize, Error> {
        self.conn()?.execute(statement).await
    }

    async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error> {
        self.conn()?.fetch_one(statement).await
    }

    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error> {
        self.conn()?.fetch_all(statement).await
    }

    async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error> {
        self.conn()?.pluck(statement).await
    }

    async fn batch(&self, statement: Statement) -> Result<(), Error> {
        self.conn()?.batch(statement).await
    }
}

#[async_trait::async_trait]
impl DatabaseConnector for PgPool {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<Self::Transaction, Error> {
        let conn = self.conn()?;
        query(r#"BEGIN"#)?.batch(&*conn).await?;

        Ok(PgTransaction {
            conn,
            finished: false,
        })
    }
}

/// An open postgres transaction over a pooled connection
#[derive(Debug)]
pub struct PgTransaction {
    conn: PooledResource<PgConnectionPool>,
    finished: bool,
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.finished {
            // An abandoned transaction poisons the session state; flag the
            // connection so the pool discards it and the server rolls the
            // transaction back on disconnect.
            self.conn.mark_stale();
        }
    }
}

#[async_trait::async_trait]
impl DatabaseExecutor for PgTransaction {
    fn name() -> &'static str {
        "postgres"
    }

    async fn execute(&self, statement: Statement) -> Result<usize, Error> {
        self.conn.execute(statement).await
    }

    async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error> {
        self.conn.fetch_one(statement).await
    }

    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error> {
        self.conn.fetch_all(statement).await
    }

    async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error> {
        self.conn.pluck(statement).await
    }

    async fn batch(&self, statement: Statement) -> Result<(), Error> {
        self.conn.batch(statement).await
    }
}

#[async_trait::async_trait]
impl DatabaseTransaction for PgTransaction {
    async fn commit(mut self) -> Result<(), Error> {
        query(r#"COMMIT"#)?.batch(&*self.conn).await?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), Error> {
        query(r#"ROLLBACK"#)?.batch(&*self.conn).await?;
        self.finished = true;
        Ok(())
    }
}

/// Hub storage backed by PostgreSQL
pub type HubPgDatabase = SQLHubDatabase<PgPool>;
