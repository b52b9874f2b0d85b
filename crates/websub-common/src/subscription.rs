//! Subscription records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::HashAlg;

/// Longest accepted delivery secret, in bytes
pub const MAX_SECRET_BYTES: usize = 199;

/// An active `(callback, topic)` binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Row id
    pub id: Uuid,
    /// Topic this subscription belongs to
    pub topic_id: Uuid,
    /// Where content gets POSTed; unique per topic
    pub callback: String,
    /// When the subscriber last passed intent verification
    pub verified_at: u64,
    /// `verified_at + lease_seconds`; deliveries stop past this point
    pub expires_at: u64,
    /// Optional shared secret enabling signed delivery
    pub secret: Option<Vec<u8>>,
    /// Algorithm for the delivery signature header
    pub signature_algorithm: HashAlg,
    /// The topic `content_updated` value last delivered successfully
    pub latest_content_delivered: Option<u64>,
    /// Consecutive failed delivery attempts
    pub delivery_attempts_since_success: u32,
    /// When the next delivery attempt becomes eligible
    pub delivery_next_attempt: Option<u64>,
}

/// Parameters for creating or renewing a subscription after a successful
/// subscribe verification.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpsert {
    /// Topic being subscribed to
    pub topic_id: Uuid,
    /// Subscriber callback URL
    pub callback: String,
    /// Verification completion time
    pub verified_at: u64,
    /// Granted lease
    pub lease_seconds: u32,
    /// Optional delivery secret
    pub secret: Option<Vec<u8>>,
    /// Delivery signature algorithm
    pub signature_algorithm: HashAlg,
}

impl SubscriptionUpsert {
    /// The expiry this upsert will produce
    pub fn expires_at(&self) -> u64 {
        self.verified_at + u64::from(self.lease_seconds)
    }
}
