//! Topic records
//!
//! A topic is a URL whose content the hub mirrors out to subscribers. The
//! row carries the latest fetched payload metadata plus the fetch scheduling
//! state the claim queries are built on. Claim bookkeeping (claimant, lease
//! expiry) stays inside the storage layer and is not surfaced here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::HashAlg;

/// A topic as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    /// Row id, assigned on creation
    pub id: Uuid,
    /// The topic URL, unique and immutable
    pub url: String,
    /// Lease granted when a subscriber does not ask for one
    pub lease_seconds_preferred: u32,
    /// Lower clamp for requested leases
    pub lease_seconds_min: u32,
    /// Upper clamp for requested leases
    pub lease_seconds_max: u32,
    /// Optional publisher endpoint consulted before accepting subscriptions
    pub publisher_validation_url: Option<String>,
    /// Algorithm used to detect content changes
    pub content_hash_algorithm: HashAlg,
    /// False until the first successful fetch
    pub is_active: bool,
    /// Soft-delete flag; set when the hub disowns the topic
    pub is_deleted: bool,
    /// Content type of the latest payload
    pub content_type: Option<String>,
    /// Hash of the latest payload
    pub content_hash: Option<String>,
    /// ETag from the latest fetch, replayed as `If-None-Match`
    pub http_etag: Option<String>,
    /// Last-Modified from the latest fetch, replayed as `If-Modified-Since`
    pub http_last_modified: Option<String>,
    /// When the content last actually changed
    pub content_updated: Option<u64>,
    /// When the last publish request arrived
    pub last_publish: Option<u64>,
    /// When the last fetch attempt finished successfully
    pub content_fetch_last_complete: Option<u64>,
    /// When the next fetch attempt becomes eligible
    pub content_fetch_next_attempt: Option<u64>,
    /// Consecutive failed fetch attempts
    pub content_fetch_attempts_since_success: u32,
}

impl Topic {
    /// Lease bounds hold: `min <= preferred <= max`
    pub fn lease_bounds_valid(&self) -> bool {
        self.lease_seconds_min <= self.lease_seconds_preferred
            && self.lease_seconds_preferred <= self.lease_seconds_max
    }

    /// Clamp a requested lease into this topic's bounds, or substitute the
    /// preferred lease when the request carries none.
    pub fn clamp_lease(&self, requested: Option<u32>) -> u32 {
        match requested {
            None => self.lease_seconds_preferred,
            Some(lease) => lease.clamp(self.lease_seconds_min, self.lease_seconds_max),
        }
    }
}

/// The payload body for one topic, fetched separately from [`Topic`] so
/// scheduling scans never drag blobs along.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicContent {
    /// Owning topic
    pub topic_id: Uuid,
    /// The raw payload bytes, delivered verbatim to subscribers
    pub content: Vec<u8>,
    /// Content type reported by the origin
    pub content_type: Option<String>,
    /// Hash of `content`
    pub content_hash: Option<String>,
    /// When the content last changed
    pub content_updated: Option<u64>,
}

/// Append-only record of a content change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicContentHistory {
    /// Owning topic
    pub topic_id: Uuid,
    /// When the change was recorded
    pub content_updated: u64,
    /// Payload size in bytes
    pub content_size: u64,
    /// Payload hash
    pub content_hash: String,
}

/// Parameters for creating (or touching) a topic row
#[derive(Debug, Clone, PartialEq)]
pub struct TopicCreate {
    /// The topic URL
    pub url: String,
    /// Default lease
    pub lease_seconds_preferred: u32,
    /// Lease lower bound
    pub lease_seconds_min: u32,
    /// Lease upper bound
    pub lease_seconds_max: u32,
    /// Optional publisher validation endpoint
    pub publisher_validation_url: Option<String>,
    /// Content hash algorithm
    pub content_hash_algorithm: HashAlg,
}

/// The result of a successful fetch that produced new content
#[derive(Debug, Clone, PartialEq)]
pub struct TopicContentUpdate {
    /// The payload
    pub content: Vec<u8>,
    /// Content type reported by the origin
    pub content_type: Option<String>,
    /// Hash of `content` under the topic's algorithm
    pub content_hash: String,
    /// ETag response header, if any
    pub http_etag: Option<String>,
    /// Last-Modified response header, if any
    pub http_last_modified: Option<String>,
}
