//! Simple blocking connection pool
//!
//! Connections are created lazily up to a configured size and handed out as
//! RAII guards. A connection can be flagged stale (broken socket, poisoned
//! transaction state); stale connections are discarded instead of being
//! reused.

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Pool error
#[derive(Debug, thiserror::Error)]
pub enum Error<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Mutex poison error
    #[error("Internal: PoisonError")]
    Poison,

    /// Timed out waiting for a free connection
    #[error("Timed out waiting for a resource")]
    Timeout,

    /// Driver error while creating a connection
    #[error(transparent)]
    Resource(#[from] E),
}

/// Pool sizing configuration
pub trait DatabaseConfig: Clone + Debug + Send + Sync {
    /// Maximum pooled connections
    fn max_size(&self) -> usize;

    /// How long `get` waits for a free connection
    fn default_timeout(&self) -> Duration;
}

/// Connection factory for a pool
pub trait DatabasePool: Debug {
    /// The pooled connection type
    type Connection: Debug + Send;

    /// Configuration needed to create connections
    type Config: DatabaseConfig;

    /// Error creating a connection
    type Error: Debug + std::error::Error + Send + Sync + 'static;

    /// Creates a new connection.
    ///
    /// When `stale` becomes true the connection is considered broken and is
    /// dropped instead of being reused.
    fn new_resource(
        config: &Self::Config,
        stale: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Result<Self::Connection, Error<Self::Error>>;

    /// Called when a connection is discarded
    fn drop(_resource: Self::Connection) {}
}

/// Generic pool of database connections
#[derive(Debug)]
pub struct Pool<RM>
where
    RM: DatabasePool,
{
    config: RM::Config,
    queue: Mutex<Vec<(Arc<AtomicBool>, RM::Connection)>>,
    in_use: AtomicUsize,
    max_size: usize,
    default_timeout: Duration,
    waiter: Condvar,
}

/// A checked-out connection; returns to the pool on drop
pub struct PooledResource<RM>
where
    RM: DatabasePool,
{
    resource: Option<(Arc<AtomicBool>, RM::Connection)>,
    pool: Arc<Pool<RM>>,
}

impl<RM> Debug for PooledResource<RM>
where
    RM: DatabasePool,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Resource: {:?}", self.resource)
    }
}

impl<RM> PooledResource<RM>
where
    RM: DatabasePool,
{
    /// Flag the connection as broken so the pool discards it instead of
    /// handing it out again. Dropping an open transaction this way lets the
    /// server roll it back on disconnect.
    pub fn mark_stale(&self) {
        if let Some((stale, _)) = self.resource.as_ref() {
            stale.store(true, Ordering::SeqCst);
        }
    }
}

impl<RM> Drop for PooledResource<RM>
where
    RM: DatabasePool,
{
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            let mut active_resource = self.pool.queue.lock().expect("active_resource");
            active_resource.push(resource);
            self.pool.in_use.fetch_sub(1, Ordering::AcqRel);

            // Notify a waiting thread
            self.pool.waiter.notify_one();
        }
    }
}

impl<RM> Deref for PooledResource<RM>
where
    RM: DatabasePool,
{
    type Target = RM::Connection;

    fn deref(&self) -> &Self::Target {
        &self.resource.as_ref().expect("resource already dropped").1
    }
}

impl<RM> DerefMut for PooledResource<RM>
where
    RM: DatabasePool,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.resource.as_mut().expect("resource already dropped").1
    }
}

impl<RM> Pool<RM>
where
    RM: DatabasePool,
{
    /// Creates a new pool
    pub fn new(config: RM::Config) -> Arc<Self> {
        Arc::new(Self {
            default_timeout: config.default_timeout(),
            max_size: config.max_size(),
            config,
            queue: Default::default(),
            in_use: Default::default(),
            waiter: Default::default(),
        })
    }

    /// Like [`Pool::get_timeout`] with the configured default timeout
    #[inline(always)]
    pub fn get(self: &Arc<Self>) -> Result<PooledResource<RM>, Error<RM::Error>> {
        self.get_timeout(self.default_timeout)
    }

    /// Returns a free connection, creating one if there is still room, or
    /// waits until another caller returns one.
    pub fn get_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledResource<RM>, Error<RM::Error>> {
        let mut resources = self.queue.lock().map_err(|_| Error::Poison)?;
        let started = Instant::now();

        loop {
            while let Some((stale, resource)) = resources.pop() {
                if stale.load(Ordering::SeqCst) {
                    RM::drop(resource);
                    continue;
                }

                // Count before releasing the mutex so racing callers see the
                // slot as taken and wait instead of over-allocating.
                self.in_use.fetch_add(1, Ordering::AcqRel);
                drop(resources);

                return Ok(PooledResource {
                    resource: Some((stale, resource)),
                    pool: self.clone(),
                });
            }

            if self.in_use.load(Ordering::Relaxed) < self.max_size {
                self.in_use.fetch_add(1, Ordering::AcqRel);
                drop(resources);
                let stale: Arc<AtomicBool> = Arc::new(false.into());
                match RM::new_resource(&self.config, stale.clone(), timeout) {
                    Ok(new_resource) => {
                        return Ok(PooledResource {
                            resource: Some((stale, new_resource)),
                            pool: self.clone(),
                        });
                    }
                    Err(e) => {
                        self.in_use.fetch_sub(1, Ordering::AcqRel);
                        return Err(e);
                    }
                }
            }

            resources = self
                .waiter
                .wait_timeout(resources, timeout)
                .map_err(|_| Error::Poison)
                .and_then(|(lock, timeout_result)| {
                    if timeout_result.timed_out() {
                        tracing::warn!(
                            "Timeout waiting for a pooled connection (pool size: {}). Waited {} ms",
                            self.max_size,
                            started.elapsed().as_millis()
                        );
                        Err(Error::Timeout)
                    } else {
                        Ok(lock)
                    }
                })?;
        }
    }
}

impl<RM> Drop for Pool<RM>
where
    RM: DatabasePool,
{
    fn drop(&mut self) {
        if let Ok(mut resources) = self.queue.lock() {
            loop {
                while let Some(resource) = resources.pop() {
                    RM::drop(resource.1);
                }

                if self.in_use.load(Ordering::Relaxed) == 0 {
                    break;
                }

                resources = if let Ok(resources) = self.waiter.wait(resources) {
                    resources
                } else {
                    break;
                };
            }
        }
    }
}
