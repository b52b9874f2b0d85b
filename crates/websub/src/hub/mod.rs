//! The hub aggregate
//!
//! [`Hub`] owns the storage handle, the shared outbound HTTP client and the
//! engine configuration, and exposes the three work processors plus the
//! ingress-facing operations. Each hub process gets a random node id used
//! as its work claimant, so claims from a crashed process are recognizably
//! stale and lapse on their own.

use std::sync::Arc;

use uuid::Uuid;
use websub_common::database::HubDatabase;

use crate::config::HubConfig;
use crate::error::Error;
use crate::http_client::HttpClient;

mod deliver;
mod fetch;
pub mod ingest;
pub mod scheduler;
mod verify;

/// Denial reason used when a topic has been disowned by the hub
pub(crate) const REASON_TOPIC_GONE: &str = "Gone: topic no longer valid on this hub.";

/// One claimed unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// Fetch a topic's content
    Fetch(Uuid),
    /// Drive a verification to completion
    Verify(Uuid),
    /// Deliver current content to a subscription
    Deliver(Uuid),
}

/// The WebSub hub engine
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    db: Arc<dyn HubDatabase>,
    http: HttpClient,
    node_id: Uuid,
}

impl Hub {
    /// Creates a hub over the given storage
    pub fn new(config: HubConfig, db: Arc<dyn HubDatabase>) -> Result<Self, Error> {
        let http = HttpClient::new(&config.user_agent, config.request_timeout)?;

        Ok(Self {
            config,
            db,
            http,
            node_id: Uuid::new_v4(),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Storage handle
    pub fn db(&self) -> &Arc<dyn HubDatabase> {
        &self.db
    }

    /// This process's claimant id
    pub fn node_id(&self) -> &Uuid {
        &self.node_id
    }

    /// Claims up to `wanted` units of work, fetches first so content is
    /// current before verification and fanout.
    pub(crate) async fn work_feed(&self, wanted: usize) -> Result<Vec<WorkItem>, Error> {
        let lease = self.config.claim_lease_seconds;
        let mut items = Vec::with_capacity(wanted);

        for topic_id in self
            .db
            .topic_fetch_claim(wanted, lease, &self.node_id)
            .await?
        {
            items.push(WorkItem::Fetch(topic_id));
        }

        if items.len() < wanted {
            for verification_id in self
                .db
                .verification_claim(wanted - items.len(), lease, &self.node_id)
                .await?
            {
                items.push(WorkItem::Verify(verification_id));
            }
        }

        if items.len() < wanted {
            for subscription_id in self
                .db
                .subscription_delivery_claim(wanted - items.len(), lease, &self.node_id)
                .await?
            {
                items.push(WorkItem::Deliver(subscription_id));
            }
        }

        Ok(items)
    }

    /// Runs one claimed work item, folding failures into logs; lost claims
    /// are expected when a lease lapsed mid-flight and stay quiet.
    pub(crate) async fn process(&self, item: WorkItem) {
        let result = match item {
            WorkItem::Fetch(topic_id) => self.process_topic_fetch(topic_id).await,
            WorkItem::Verify(verification_id) => self.process_verification(verification_id).await,
            WorkItem::Deliver(subscription_id) => self.process_delivery(subscription_id).await,
        };

        match result {
            Ok(()) => {}
            Err(err) if err.is_claim_lost() => {
                tracing::debug!("Lost claim while processing {:?}: {}", item, err);
            }
            Err(err) => {
                tracing::error!("Failed processing {:?}: {}", item, err);
            }
        }
    }

    /// Claim one topic fetch and run it inline. A failed claim (someone
    /// else got the row, or it is not fetchable) returns `false` quietly.
    pub async fn topic_fetch_claim_and_process(&self, topic_id: &Uuid) -> Result<bool, Error> {
        if !self
            .db
            .topic_fetch_claim_by_id(topic_id, self.config.claim_lease_seconds, &self.node_id)
            .await?
        {
            return Ok(false);
        }

        self.process(WorkItem::Fetch(*topic_id)).await;
        Ok(true)
    }

    /// Claim one verification and run it inline
    pub async fn verification_claim_and_process(
        &self,
        verification_id: &Uuid,
    ) -> Result<bool, Error> {
        if !self
            .db
            .verification_claim_by_id(
                verification_id,
                self.config.claim_lease_seconds,
                &self.node_id,
            )
            .await?
        {
            return Ok(false);
        }

        self.process(WorkItem::Verify(*verification_id)).await;
        Ok(true)
    }

    /// Claim one delivery and run it inline
    pub async fn subscription_delivery_claim_and_process(
        &self,
        subscription_id: &Uuid,
    ) -> Result<bool, Error> {
        if !self
            .db
            .subscription_delivery_claim_by_id(
                subscription_id,
                self.config.claim_lease_seconds,
                &self.node_id,
            )
            .await?
        {
            return Ok(false);
        }

        self.process(WorkItem::Deliver(*subscription_id)).await;
        Ok(true)
    }
}
