//! # darkroom-crypto
//!
//! The master-key vault for the darkroom vault server, plus session-token
//! sealing.
//!
//! A single 32-byte master key encrypts every record the server persists.
//! On disk the key itself is wrapped under a passphrase-derived key
//! (PBKDF2-HMAC-SHA-256 + AES-256-GCM); record payloads use
//! AES-256-CBC with an HMAC-SHA-256 over the ciphertext
//! (encrypt-then-MAC). The two schemes deliberately never share a key
//! domain: the wrap key exists only while loading or saving the vault.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod master_key;
mod token;

pub use error::CryptoError;
pub use master_key::{MasterKey, ENCRYPTED_KEY_SIZE};
pub use token::{token_hash, Claims, TokenKey, SCOPE_SESSION};

/// Result alias for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
