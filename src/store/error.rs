//! Error types for the persistent store.

use thiserror::Error;

use crate::model::PublicationId;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON (de)serialization of an authors/sections column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An extraction referenced a PDF hash that does not match the current
    /// success acquisition for the publication.
    #[error(
        "extraction hash mismatch for {publication_id}: extraction has {extraction_sha256}, \
         current acquisition has {acquisition_sha256}"
    )]
    HashMismatch {
        /// Publication whose extraction was rejected.
        publication_id: PublicationId,
        /// SHA-256 carried by the extraction.
        extraction_sha256: String,
        /// SHA-256 of the current success acquisition.
        acquisition_sha256: String,
    },

    /// An extraction was written for a publication with no successful
    /// acquisition to validate against.
    #[error("no successful acquisition for {0}; cannot record extraction")]
    NoAcquisition(PublicationId),

    /// A row read back from the database had an unrecognized enum value.
    #[error("corrupt row: {column} held unexpected value '{value}'")]
    CorruptRow {
        /// Column with the unexpected value.
        column: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
