//! Topic change listener
//!
//! A dedicated connection `LISTEN`s on the `topic_changed` channel and turns
//! notifications into content-cache evictions. The cache is only allowed to
//! serve reads while this connection is healthy: a periodic self-ping on the
//! same channel proves end-to-end delivery, and prolonged silence or a broken
//! socket disables and clears the cache until a reconnect (with bounded
//! exponential backoff) succeeds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::poll_fn;
use futures_util::TryStreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_postgres::{connect, AsyncMessage, Notification};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use websub_sql_common::cache::ContentCache;

use crate::{PgConfig, SslMode};

/// The notification channel topic updates are announced on
pub const TOPIC_CHANGED_CHANNEL: &str = "topic_changed";

/// Keep-alive payload, ignored by eviction
const PING_PAYLOAD: &str = "ping";

const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Missing several pings in a row counts as a dead connection
const MAX_SILENCE: Duration = Duration::from_secs(180);

const RECONNECT_DELAY_MIN: Duration = Duration::from_millis(500);
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(30);

/// Spawns the listener task; it reconnects on failure until `shutdown` fires
pub fn spawn_topic_listener(
    config: PgConfig,
    cache: Arc<ContentCache>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reconnect_delay = RECONNECT_DELAY_MIN;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    cache.disable();
                    tracing::info!("Topic change listener shutting down");
                    return;
                }
                result = listen_once(&config, &cache, &shutdown) => {
                    cache.disable();
                    match result {
                        Ok(()) => return,
                        Err(err) => {
                            tracing::warn!(
                                "Topic change listener lost its connection ({}), reconnecting in {:?}",
                                err,
                                reconnect_delay
                            );
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Topic change listener shutting down during reconnect delay");
                    return;
                }
                _ = sleep(reconnect_delay) => {}
            }

            reconnect_delay = (reconnect_delay * 2).min(RECONNECT_DELAY_MAX);
        }
    })
}

fn handle_notification(cache: &ContentCache, notification: &Notification) {
    if notification.channel() != TOPIC_CHANGED_CHANNEL {
        return;
    }

    let payload = notification.payload();
    if payload == PING_PAYLOAD {
        return;
    }

    match Uuid::parse_str(payload) {
        Ok(topic_id) => {
            tracing::debug!("Evicting topic {} from the content cache", topic_id);
            cache.invalidate(&topic_id);
        }
        Err(_) => {
            tracing::warn!("Ignoring malformed topic change payload: {}", payload);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ListenerError {
    #[error(transparent)]
    Pg(#[from] tokio_postgres::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection silent past the keep-alive window")]
    Silent,
}

/// One connection lifetime: listen, enable the cache, evict on notification,
/// ping periodically. Returns `Ok` only on shutdown.
async fn listen_once(
    config: &PgConfig,
    cache: &ContentCache,
    shutdown: &CancellationToken,
) -> Result<(), ListenerError> {
    // The driver task owns the socket; notifications come back over this
    // channel while regular client calls make progress.
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let (client, driver) = match config.tls.clone() {
        SslMode::NoTls(tls) => {
            let (client, mut connection) = connect(&config.url, tls).await?;
            let driver = tokio::spawn(async move {
                let mut messages = poll_fn(move |cx| connection.poll_message(cx));
                loop {
                    match messages.try_next().await {
                        Ok(Some(AsyncMessage::Notification(notification))) => {
                            if notify_tx.send(notification).is_err() {
                                return;
                            }
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => return,
                        Err(err) => {
                            tracing::debug!("Listener connection error: {}", err);
                            return;
                        }
                    }
                }
            });
            (client, driver)
        }
        SslMode::NativeTls(tls) => {
            let (client, mut connection) = connect(&config.url, tls).await?;
            let driver = tokio::spawn(async move {
                let mut messages = poll_fn(move |cx| connection.poll_message(cx));
                loop {
                    match messages.try_next().await {
                        Ok(Some(AsyncMessage::Notification(notification))) => {
                            if notify_tx.send(notification).is_err() {
                                return;
                            }
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => return,
                        Err(err) => {
                            tracing::debug!("Listener connection error: {}", err);
                            return;
                        }
                    }
                }
            });
            (client, driver)
        }
    };

    let result = async {
        if let Some(schema) = config.schema.as_ref() {
            client
                .batch_execute(&format!(r#"SET search_path TO "{schema}""#))
                .await?;
        }

        client
            .batch_execute(&format!("LISTEN {TOPIC_CHANGED_CHANNEL}"))
            .await?;

        cache.enable();
        tracing::info!("Topic change listener connected, content cache enabled");

        let mut last_activity = Instant::now();
        let mut ping = interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Ok(());
                }
                notification = notify_rx.recv() => {
                    match notification {
                        Some(notification) => {
                            last_activity = Instant::now();
                            handle_notification(cache, &notification);
                        }
                        // Driver ended: the socket is gone
                        None => {
                            return Err(ListenerError::ConnectionClosed);
                        }
                    }
                }
                _ = ping.tick() => {
                    if last_activity.elapsed() > MAX_SILENCE {
                        tracing::warn!(
                            "No listener traffic for {:?}, treating the connection as dead",
                            last_activity.elapsed()
                        );
                        return Err(ListenerError::Silent);
                    }

                    client
                        .batch_execute(&format!(
                            "SELECT pg_notify('{TOPIC_CHANGED_CHANNEL}', '{PING_PAYLOAD}')"
                        ))
                        .await?;
                }
            }
        }
    }
    .await;

    driver.abort();
    result
}
