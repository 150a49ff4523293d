//! Error types for darkroom-crypto.

use thiserror::Error;

/// Errors that can occur in vault and token operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The HMAC over an encrypted record did not verify.
    /// No partially-verified bytes are ever returned.
    #[error("invalid hmac")]
    BadMac,

    /// The input is too short to contain IV, one block and an HMAC.
    #[error("ciphertext too short")]
    ShortCiphertext,

    /// The ciphertext authenticated but its structure is invalid
    /// (bad block length or pad byte).
    #[error("malformed ciphertext")]
    Malformed,

    /// The key file could not be opened with the given passphrase.
    #[error("wrong passphrase or corrupted key file")]
    WrongPassphrase,

    /// The key file carries a version this build does not understand.
    #[error("unsupported key file version: {0}")]
    UnsupportedVersion(u8),

    /// A wrapped key had an unexpected length.
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// A session token failed to parse or authenticate.
    #[error("token rejected")]
    BadToken,

    /// A session token is past its expiry.
    #[error("token expired")]
    TokenExpired,

    /// A session token was minted for a different endpoint class.
    #[error("token scope mismatch: expected {expected}, got {actual}")]
    ScopeMismatch {
        /// The scope the endpoint requires.
        expected: String,
        /// The scope the token carries.
        actual: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
