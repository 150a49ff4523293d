//! # darkroom-store
//!
//! The file-backed state store under the darkroom vault server.
//!
//! Two layers live here:
//! - [`Store`] - named, encrypted records with atomic multi-record
//!   transactions ([`Transaction`]) and crash safety via temp-file staging
//!   and atomic renames.
//! - [`BlobPool`] - content-addressed storage for large ciphertext, with
//!   reference counts kept in a [`Store`] record ([`RefCounts`]) so they
//!   move atomically with the records that hold the references.
//!
//! Every record value is encrypted with the process master key before it
//! touches disk; the store itself never sees plaintext domain data other
//! than in memory.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod blobs;
mod error;
mod store;

pub use blobs::{BlobPool, RefCounts, REFCOUNT_RECORD};
pub use error::StoreError;
pub use store::{Store, Transaction};

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
