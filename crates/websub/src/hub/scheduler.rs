//! Scheduler and worker pool
//!
//! One loop per hub process: poll the repository for claimable work up to
//! the concurrency headroom, run each claimed unit in its own task, and on
//! shutdown stop claiming and drain what is in flight. Multiple processes
//! can run this loop against the same repository; the claim/lease rules
//! keep them from stepping on each other.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Hub;

/// The per-process work loop
#[derive(Debug)]
pub struct Scheduler {
    hub: Arc<Hub>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler over the hub
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until the shutdown token fires, then drains in-flight work
    pub async fn run(self) {
        let max_concurrent = self.hub.config().max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut workers = JoinSet::new();

        let mut poll = interval(self.hub.config().poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Scheduler started (node {}, {} workers)",
            self.hub.node_id(),
            max_concurrent
        );

        loop {
            // Reap finished workers without blocking
            while let Some(result) = workers.try_join_next() {
                if let Err(err) = result {
                    tracing::error!("Worker task panicked: {}", err);
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = poll.tick() => {}
            }

            let headroom = semaphore.available_permits();
            if headroom == 0 {
                continue;
            }

            let items = match self.hub.work_feed(headroom).await {
                Ok(items) => items,
                Err(err) => {
                    tracing::warn!("Claiming work failed: {}", err);
                    continue;
                }
            };

            if !items.is_empty() {
                tracing::debug!("Claimed {} work items", items.len());
            }

            for item in items {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    // Semaphore is never closed while we run
                    Err(_) => break,
                };

                let hub = Arc::clone(&self.hub);
                workers.spawn(async move {
                    let _permit = permit;
                    hub.process(item).await;
                });
            }
        }

        tracing::info!("Scheduler stopping, draining {} in-flight tasks", workers.len());
        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                tracing::error!("Worker task panicked during drain: {}", err);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}
