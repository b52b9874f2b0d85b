//! Engine configuration

use std::time::Duration;

use websub_common::backoff::DEFAULT_RETRY_DELAYS;

/// Configuration for the hub engine
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// The hub's own public base URL; advertised as `rel="hub"` on
    /// deliveries and matched against discovered hub links
    pub public_url: String,
    /// User agent for all outbound requests
    pub user_agent: String,
    /// Whether unknown topics are created on first mention (public hub) or
    /// rejected (private hub)
    pub public_hub: bool,
    /// Drop topics whose content stops advertising this hub
    pub strict_topic_hub_link: bool,
    /// Treat a secret over a plaintext callback as an error instead of a
    /// warning
    pub strict_secrets: bool,
    /// Upper bound on concurrently processed work units
    pub max_concurrent: usize,
    /// How often the scheduler polls for claimable work
    pub poll_interval: Duration,
    /// Work claim lease; a crashed node's claims lapse after this long
    pub claim_lease_seconds: u64,
    /// Hard timeout for any single outbound HTTP request
    pub request_timeout: Duration,
    /// Lease granted when a subscriber does not ask for one
    pub lease_seconds_preferred: u32,
    /// Lower clamp for requested leases
    pub lease_seconds_min: u32,
    /// Upper clamp for requested leases
    pub lease_seconds_max: u32,
    /// Retry delay table for topic fetches
    pub fetch_retry_delays: Vec<u64>,
    /// Retry delay table for verifications
    pub verify_retry_delays: Vec<u64>,
    /// Retry delay table for deliveries
    pub delivery_retry_delays: Vec<u64>,
    /// Claim and process work inline from ingress instead of waiting for
    /// the next scheduler poll
    pub immediate_processing: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            public_url: "http://127.0.0.1:8080/".to_owned(),
            user_agent: format!(
                "websub-hub/{} (websubd)",
                option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
            ),
            public_hub: true,
            strict_topic_hub_link: false,
            strict_secrets: false,
            max_concurrent: 10,
            poll_interval: Duration::from_secs(10),
            claim_lease_seconds: 300,
            request_timeout: Duration::from_secs(120),
            lease_seconds_preferred: 86400 * 10,
            lease_seconds_min: 86400,
            lease_seconds_max: 86400 * 365,
            fetch_retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            verify_retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            delivery_retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            immediate_processing: true,
        }
    }
}
