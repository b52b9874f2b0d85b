//! Abstract repository traits
//!
//! Reads and claim primitives live on [`HubDatabase`]; every mutation goes
//! through a [`HubTransaction`] so composite operations (content update plus
//! history row, subscription upsert plus verification scrub) commit or roll
//! back as one unit.
//!
//! Claim semantics: a row is claimable when its eligibility predicate holds
//! and it carries no live lease (`claimant IS NULL OR claim_expires <= now`).
//! Claiming is a single conditional update, so concurrent nodes never win
//! the same row, and a crashed node's claims lapse back into the pool once
//! the lease expires. Claim-guarded writes that match no rows surface
//! [`Error::ClaimLost`](super::Error::ClaimLost).

use std::fmt::Debug;

use async_trait::async_trait;
use uuid::Uuid;

use super::Error;
use crate::subscription::{Subscription, SubscriptionUpsert};
use crate::topic::{Topic, TopicContent, TopicContentHistory, TopicContentUpdate, TopicCreate};
use crate::verification::{Verification, VerificationCreate, VerificationMode};

/// Hub storage
#[async_trait]
pub trait HubDatabase: Debug + Send + Sync {
    /// Begin a transaction for mutating operations
    async fn begin(&self) -> Result<Box<dyn HubTransaction + Send + Sync>, Error>;

    /// Cheap liveness check, used by health endpoints
    async fn ping(&self) -> Result<(), Error>;

    /// Load a topic by id
    async fn get_topic(&self, topic_id: &Uuid) -> Result<Option<Topic>, Error>;

    /// Load a topic by its URL
    async fn get_topic_by_url(&self, url: &str) -> Result<Option<Topic>, Error>;

    /// Load a topic's current payload
    async fn get_topic_content(&self, topic_id: &Uuid) -> Result<Option<TopicContent>, Error>;

    /// Content change audit rows for a topic, newest first
    async fn get_topic_content_history(
        &self,
        topic_id: &Uuid,
    ) -> Result<Vec<TopicContentHistory>, Error>;

    /// Load a subscription by id
    async fn get_subscription(&self, subscription_id: &Uuid)
        -> Result<Option<Subscription>, Error>;

    /// Load a subscription by its unique `(topic, callback)` pair
    async fn get_subscription_by_callback(
        &self,
        topic_id: &Uuid,
        callback: &str,
    ) -> Result<Option<Subscription>, Error>;

    /// How many subscriptions a topic still has
    async fn subscription_count(&self, topic_id: &Uuid) -> Result<u64, Error>;

    /// Load a verification by id
    async fn get_verification(
        &self,
        verification_id: &Uuid,
    ) -> Result<Option<Verification>, Error>;

    /// Claim up to `wanted` fetchable topics for `lease_seconds`
    async fn topic_fetch_claim(
        &self,
        wanted: usize,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<Vec<Uuid>, Error>;

    /// Claim one specific topic for fetching; false when the row is not
    /// fetchable or another node already holds it
    async fn topic_fetch_claim_by_id(
        &self,
        topic_id: &Uuid,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<bool, Error>;

    /// Claim up to `wanted` processable verifications
    async fn verification_claim(
        &self,
        wanted: usize,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<Vec<Uuid>, Error>;

    /// Claim one specific verification
    async fn verification_claim_by_id(
        &self,
        verification_id: &Uuid,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<bool, Error>;

    /// Claim up to `wanted` deliverable subscriptions
    async fn subscription_delivery_claim(
        &self,
        wanted: usize,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<Vec<Uuid>, Error>;

    /// Claim one specific subscription for delivery
    async fn subscription_delivery_claim_by_id(
        &self,
        subscription_id: &Uuid,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<bool, Error>;
}

/// Mutations, committed atomically
#[async_trait]
pub trait HubTransaction: Debug + Send {
    /// Create a topic, or return the existing row's id when the URL is
    /// already known. Lease bounds are validated here.
    async fn add_topic(&mut self, topic: TopicCreate) -> Result<Uuid, Error>;

    /// Record a publish announcement, making the topic fetchable
    async fn topic_publish_received(&mut self, topic_id: &Uuid, now: u64) -> Result<(), Error>;

    /// Soft-delete a topic
    async fn set_topic_deleted(&mut self, topic_id: &Uuid) -> Result<(), Error>;

    /// Physically delete a soft-deleted topic once no subscriptions remain;
    /// returns whether the row went away
    async fn topic_pending_delete(&mut self, topic_id: &Uuid) -> Result<bool, Error>;

    /// Store newly fetched content: payload, hash, conditional-fetch hints,
    /// `content_updated = now`, a history row, activation, and fetch-claim
    /// completion, all in this transaction.
    async fn topic_content_update(
        &mut self,
        topic_id: &Uuid,
        claimant: &Uuid,
        update: TopicContentUpdate,
    ) -> Result<(), Error>;

    /// The fetched topic no longer lists this hub: soft-delete it and bump
    /// `content_updated` so subscribers get one final (denial) notification.
    async fn topic_delisted(&mut self, topic_id: &Uuid, claimant: &Uuid) -> Result<(), Error>;

    /// Fetch finished without a content change: clear the claim and reset
    /// the attempt counter
    async fn topic_fetch_complete(&mut self, topic_id: &Uuid, claimant: &Uuid)
        -> Result<(), Error>;

    /// Fetch failed: clear the claim, bump the attempt counter and schedule
    /// the retry
    async fn topic_fetch_incomplete(
        &mut self,
        topic_id: &Uuid,
        claimant: &Uuid,
        retry_delays: &[u64],
    ) -> Result<(), Error>;

    /// Drop subscriptions whose lease ran out; returns how many went away
    async fn delete_expired_subscriptions(
        &mut self,
        topic_id: &Uuid,
        now: u64,
    ) -> Result<u64, Error>;

    /// Create or renew a subscription after a successful subscribe
    /// verification; `expires_at` is computed from `verified_at + lease`.
    async fn upsert_subscription(&mut self, subscription: SubscriptionUpsert)
        -> Result<(), Error>;

    /// Remove a subscription; returns whether a row existed
    async fn delete_subscription(&mut self, topic_id: &Uuid, callback: &str)
        -> Result<bool, Error>;

    /// Delivery succeeded: record the delivered content version, clear the
    /// claim, reset the attempt counter
    async fn subscription_delivery_complete(
        &mut self,
        subscription_id: &Uuid,
        claimant: &Uuid,
        content_updated: u64,
    ) -> Result<(), Error>;

    /// Callback answered 410: drop the subscription outright
    async fn subscription_delivery_gone(&mut self, subscription_id: &Uuid) -> Result<(), Error>;

    /// Delivery failed: clear the claim, bump the attempt counter and
    /// schedule the retry
    async fn subscription_delivery_incomplete(
        &mut self,
        subscription_id: &Uuid,
        claimant: &Uuid,
        retry_delays: &[u64],
    ) -> Result<(), Error>;

    /// Insert a verification row
    async fn add_verification(&mut self, verification: VerificationCreate) -> Result<Uuid, Error>;

    /// Rewrite a verification in place (publisher denial path)
    async fn verification_update(
        &mut self,
        verification_id: &Uuid,
        mode: VerificationMode,
        reason: Option<String>,
        is_publisher_validated: bool,
    ) -> Result<(), Error>;

    /// Scrub this verification and every sibling for the same
    /// `(callback, topic)` pair, so a settled intent obsoletes stale ones
    async fn verification_complete(&mut self, topic_id: &Uuid, callback: &str)
        -> Result<(), Error>;

    /// Verification attempt failed: clear the claim, bump the attempt
    /// counter and schedule the retry
    async fn verification_incomplete(
        &mut self,
        verification_id: &Uuid,
        claimant: &Uuid,
        retry_delays: &[u64],
    ) -> Result<(), Error>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<(), Error>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}
