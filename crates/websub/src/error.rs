//! Engine errors
//!
//! Remote and transport failures never show up here: they are captured into
//! row state (attempt counters, retry schedules) so the scheduler can retry
//! them. What remains is genuinely fatal for the task at hand.

use uuid::Uuid;

/// Engine error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Storage failure
    #[error(transparent)]
    Database(#[from] websub_common::database::Error),

    /// A claimed id no longer resolves to the row it should; the claim is
    /// abandoned and will lapse on its own
    #[error("Claimed {0} row {1} is missing")]
    MissingRow(&'static str, Uuid),

    /// Signature computation failure
    #[error(transparent)]
    Crypto(#[from] websub_common::crypto::Error),

    /// A stored URL failed to parse back
    #[error("Invalid stored URL: {0}")]
    Url(#[from] url::ParseError),

    /// The outbound HTTP client or a request could not be constructed;
    /// remote failures never surface here
    #[error("HTTP setup failed: {0}")]
    HttpSetup(reqwest::Error),
}

impl Error {
    /// Whether this is the benign lost-lease case: another node took the
    /// work over and our late write was rejected.
    pub fn is_claim_lost(&self) -> bool {
        matches!(
            self,
            Error::Database(websub_common::database::Error::ClaimLost)
        )
    }
}
