//! websubd library
//!
//! Wires the pieces together: configuration, tracing, the storage backend,
//! the scheduler and the ingress server, with a graceful shutdown path that
//! stops claiming work and drains what is in flight.

// Ensure at least one database backend is enabled at compile time
#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("At least one database backend feature must be enabled: sqlite or postgres");

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use cli::CLIArgs;
use config::{DatabaseEngine, Settings};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use websub::{Hub, Scheduler};
use websub_common::database::HubDatabase;

pub mod cli;
pub mod config;
pub mod env_vars;

/// Resolves the working directory: CLI flag, then environment, then
/// `~/.websub-hubd`.
pub async fn get_work_directory(args: &CLIArgs) -> Result<PathBuf> {
    let dir = if let Some(work_dir) = args.work_dir.clone() {
        work_dir
    } else if let Ok(env_dir) = env::var(env_vars::ENV_WORK_DIR) {
        PathBuf::from(env_dir)
    } else {
        home::home_dir()
            .ok_or(anyhow!("Unknown home dir"))?
            .join(".websub-hubd")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Loads settings from the explicit config path or `<work-dir>/config.toml`
pub fn load_settings(work_dir: &Path, config_path: Option<PathBuf>) -> Result<Settings> {
    let path = config_path.or_else(|| {
        let default = work_dir.join("config.toml");
        default.exists().then_some(default)
    });

    Ok(Settings::new(path)?)
}

/// Sets up the tracing subscriber per the logging configuration.
/// Returns a guard that must stay alive until shutdown when file logging
/// is enabled.
pub fn setup_tracing(
    work_dir: &Path,
    logging: &config::LoggingConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = "debug";
    let noisy_crates = "hyper=warn,h2=warn,reqwest=warn,rustls=warn,tower_http=warn";
    let env_filter = EnvFilter::new(format!("{default_filter},{noisy_crates}"));

    let console_level = logging
        .console_level
        .as_deref()
        .unwrap_or("info")
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let file_level = logging
        .file_level
        .as_deref()
        .unwrap_or("debug")
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::DEBUG);

    use config::LoggingOutput;
    match logging.output {
        LoggingOutput::Stderr => {
            let stderr = std::io::stderr.with_max_level(console_level);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(stderr)
                .init();

            Ok(None)
        }
        LoggingOutput::File => {
            let logs_dir = work_dir.join("logs");
            std::fs::create_dir_all(&logs_dir)?;

            let file_appender = rolling::daily(&logs_dir, "websubd.log");
            let (non_blocking_appender, guard) = non_blocking(file_appender);
            let file_writer = non_blocking_appender.with_max_level(file_level);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(file_writer)
                .init();

            Ok(Some(guard))
        }
        LoggingOutput::Both => {
            let logs_dir = work_dir.join("logs");
            std::fs::create_dir_all(&logs_dir)?;

            let file_appender = rolling::daily(&logs_dir, "websubd.log");
            let (non_blocking_appender, guard) = non_blocking(file_appender);

            let stderr = std::io::stderr.with_max_level(console_level);
            let file_writer = non_blocking_appender.with_max_level(file_level);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(stderr.and(file_writer))
                .init();

            Ok(Some(guard))
        }
    }
}

/// Opens the configured storage backend. For postgres this also spawns the
/// `topic_changed` listener that keeps the content cache coherent.
async fn setup_database(
    settings: &Settings,
    work_dir: &Path,
    lifecycle: &CancellationToken,
) -> Result<(Arc<dyn HubDatabase>, Option<JoinHandle<()>>)> {
    match &settings.database.engine {
        #[cfg(feature = "sqlite")]
        DatabaseEngine::Sqlite => {
            let path = settings.database.sqlite_path(work_dir);
            let path = path
                .to_str()
                .ok_or(anyhow!("Database path is not valid UTF-8"))?;
            tracing::info!("Opening SQLite database at {}", path);

            let db: Arc<dyn HubDatabase> =
                Arc::new(websub_sqlite::HubSqliteDatabase::new(path).await?);
            Ok((db, None))
        }
        #[cfg(feature = "postgres")]
        DatabaseEngine::Postgres => {
            let url = settings
                .database
                .url
                .as_deref()
                .ok_or(anyhow!("database.url is required for the postgres engine"))?;
            tracing::info!("Connecting to PostgreSQL");

            let cache = Arc::new(websub_sql_common::cache::ContentCache::new());
            let db: Arc<dyn HubDatabase> = Arc::new(
                websub_postgres::HubPgDatabase::new(url)
                    .await?
                    .with_content_cache(cache.clone()),
            );

            let listener = websub_postgres::listener::spawn_topic_listener(
                url.into(),
                cache,
                lifecycle.clone(),
            );

            Ok((db, Some(listener)))
        }
        #[allow(unreachable_patterns)]
        engine => bail!("websubd was built without support for the {engine:?} engine"),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C handler: {}", err);
        return;
    }
    tracing::info!("Shutdown signal received");
}

/// Runs the daemon until CTRL+C
pub async fn run_hubd(work_dir: &Path, settings: &Settings, enable_logging: bool) -> Result<()> {
    let guard = if enable_logging {
        setup_tracing(work_dir, &settings.info.logging)?
    } else {
        None
    };

    let result = run_hubd_with_shutdown(work_dir, settings, shutdown_signal()).await;

    if let Some(guard) = guard {
        drop(guard);
    }
    tracing::info!("websubd shutdown");

    result
}

/// Runs the daemon with a custom shutdown signal
pub async fn run_hubd_with_shutdown(
    work_dir: &Path,
    settings: &Settings,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let lifecycle = CancellationToken::new();
    let (db, change_listener) = setup_database(settings, work_dir, &lifecycle).await?;

    let hub = Arc::new(Hub::new(settings.hub_config(), db)?);

    let scheduler = Scheduler::new(Arc::clone(&hub));
    let scheduler_shutdown = scheduler.shutdown_token();
    let scheduler_handle = tokio::spawn(scheduler.run());

    let service = websub_axum::create_hub_router(hub).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestDecompressionLayer::new())
            .layer(CompressionLayer::new()),
    );

    let socket_addr = SocketAddr::from_str(&format!(
        "{}:{}",
        settings.info.listen_host, settings.info.listen_port
    ))?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    tracing::info!("Listening on {}", socket_addr);

    let serve_result = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown)
        .await;

    // Stop claiming new work and drain what is in flight
    scheduler_shutdown.cancel();
    if let Err(err) = scheduler_handle.await {
        tracing::error!("Scheduler task failed: {}", err);
    }

    lifecycle.cancel();
    if let Some(handle) = change_listener {
        let _ = handle.await;
    }

    match serve_result {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::error!("Server exited with error: {}", err);
            bail!("Server exited with error")
        }
    }
}
