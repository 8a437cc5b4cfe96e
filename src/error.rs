//! Failure kinds callers need to match on.
//!
//! Everything else flows through `anyhow`; a missing record is `Ok(None)`,
//! never an error.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A chunk id can never be rebound to different content.
    #[error("chunk {id} already exists with different content")]
    ContentMismatch { id: String },

    /// Deleting a record that was never saved is caller misuse.
    #[error("record has no id")]
    MissingId,

    /// An interchange or dump document from a future (or unknown) format.
    #[error("unknown interchangeVersion: {0}")]
    UnsupportedVersion(i64),
}
