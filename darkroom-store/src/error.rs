//! Error types for darkroom-store.

use darkroom_crypto::CryptoError;
use thiserror::Error;

/// Errors that can occur in store and blob-pool operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named record does not exist.
    #[error("record not found: {name}")]
    NotFound {
        /// The record name.
        name: String,
    },

    /// The named record already exists.
    #[error("record already exists: {name}")]
    Exists {
        /// The record name.
        name: String,
    },

    /// The record is already held for update by the same caller.
    #[error("record already locked by this caller: {name}")]
    Conflict {
        /// The record name.
        name: String,
    },

    /// The record failed MAC verification or could not be decoded.
    /// Fatal for the record, not for the process.
    #[error("record corrupt: {name}")]
    Corrupt {
        /// The record name.
        name: String,
    },

    /// The record name escapes the store root or is otherwise invalid.
    #[error("invalid record name: {name}")]
    InvalidName {
        /// The offending name.
        name: String,
    },

    /// A crypto failure other than record authentication.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
