//! Verification records
//!
//! A verification is a transient intent: a subscriber asked to subscribe or
//! unsubscribe, or the hub needs to notify a callback that its subscription
//! was denied. Rows live until the challenge round-trip settles them, at
//! which point the whole `(callback, topic)` family is scrubbed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::HashAlg;

/// What the verification intends to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Confirm a subscription request
    Subscribe,
    /// Confirm an unsubscription request
    Unsubscribe,
    /// Notify the callback that its subscription was denied
    Denied,
}

impl VerificationMode {
    /// The `hub.mode` wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMode::Subscribe => "subscribe",
            VerificationMode::Unsubscribe => "unsubscribe",
            VerificationMode::Denied => "denied",
        }
    }
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown verification mode
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown verification mode: {0}")]
pub struct ParseModeError(pub String);

impl FromStr for VerificationMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(VerificationMode::Subscribe),
            "unsubscribe" => Ok(VerificationMode::Unsubscribe),
            "denied" => Ok(VerificationMode::Denied),
            other => Err(ParseModeError(other.to_owned())),
        }
    }
}

/// A pending verification as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    /// Row id
    pub id: Uuid,
    /// Topic the intent applies to
    pub topic_id: Uuid,
    /// Subscriber callback URL
    pub callback: String,
    /// Intent
    pub mode: VerificationMode,
    /// Requested lease (subscribe only)
    pub lease_seconds: u32,
    /// Secret to copy onto the subscription on success
    pub secret: Option<Vec<u8>>,
    /// Signature algorithm to copy onto the subscription on success
    pub signature_algorithm: HashAlg,
    /// Whether the publisher validator already accepted this intent
    pub is_publisher_validated: bool,
    /// Denial reason forwarded to the callback
    pub reason: Option<String>,
    /// Consecutive failed processing attempts
    pub attempts: u32,
    /// When the next processing attempt becomes eligible
    pub next_attempt: u64,
    /// Ingress request id, for correlation in logs
    pub request_id: Option<String>,
}

/// Parameters for inserting a verification row
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationCreate {
    /// Topic the intent applies to
    pub topic_id: Uuid,
    /// Subscriber callback URL
    pub callback: String,
    /// Intent
    pub mode: VerificationMode,
    /// Requested lease (subscribe only)
    pub lease_seconds: u32,
    /// Secret to copy onto the subscription on success
    pub secret: Option<Vec<u8>>,
    /// Signature algorithm to copy onto the subscription on success
    pub signature_algorithm: HashAlg,
    /// Starts false iff the topic carries a publisher validator
    pub is_publisher_validated: bool,
    /// Denial reason, for `Denied` rows
    pub reason: Option<String>,
    /// Ingress request id
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trip() {
        for mode in [
            VerificationMode::Subscribe,
            VerificationMode::Unsubscribe,
            VerificationMode::Denied,
        ] {
            assert_eq!(Ok(mode), mode.as_str().parse());
        }
        assert!("publish".parse::<VerificationMode>().is_err());
    }
}
