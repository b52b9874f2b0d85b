//! Hub storage interface
//!
//! The engine only ever talks to storage through [`HubDatabase`] and
//! [`HubTransaction`]; the SQL crates provide the implementations.

mod hub;

#[cfg(feature = "test")]
pub mod test;

pub use hub::{HubDatabase, HubTransaction};

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Driver-level error
    #[error(transparent)]
    Database(Box<dyn std::error::Error + Send + Sync>),

    /// Unique constraint violation
    #[error("Duplicate entry")]
    Duplicate,

    /// Row referenced by a claimed id is missing; the claim is abandoned and
    /// will lapse on its own
    #[error("Referenced row not found")]
    NotFound,

    /// A claim-guarded write matched no rows; the lease lapsed and another
    /// node took the work over
    #[error("Claim no longer held")]
    ClaimLost,

    /// Record rejected at the storage boundary
    #[error("Invalid record: {0}")]
    Invalid(String),

    /// The stored schema version is outside the supported window
    #[error("Unsupported schema version {found}, supported {min} through {max}")]
    UnsupportedSchemaVersion {
        /// Version found in the store
        found: String,
        /// Oldest supported version
        min: String,
        /// Newest supported version
        max: String,
    },

    /// A statement placeholder was never bound
    #[error("Missing placeholder: {0}")]
    MissingPlaceholder(String),

    /// Column-to-record conversion failure
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Unexpected response shape from the database worker
    #[error("Invalid database response")]
    InvalidDbResponse,

    /// Catch-all internal error
    #[error("Internal: {0}")]
    Internal(String),
}

/// Error converting database columns into records
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Row is narrower than the record needs
    #[error("Expected at least {0} columns, got {1}")]
    MissingColumn(usize, usize),

    /// Column type does not match the record field
    #[error("Expected type {0}, got {1}")]
    InvalidType(String, String),

    /// Column value cannot be converted
    #[error("Failed to convert {0} into {1}")]
    InvalidConversion(String, String),

    /// Malformed uuid column
    #[error(transparent)]
    Uuid(#[from] uuid::Error),

    /// Malformed hash algorithm name
    #[error(transparent)]
    HashAlg(#[from] crate::crypto::Error),

    /// Malformed verification mode
    #[error(transparent)]
    Mode(#[from] crate::verification::ParseModeError),
}
