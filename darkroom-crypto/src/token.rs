//! Session-token sealing.
//!
//! Tokens are minted under a per-user token key (generated at
//! registration, persisted wrapped by the master key). A token is an
//! AES-256-GCM seal of its JSON claims, so it is both confidential and
//! tamper-evident; the server keeps only a hash of each outstanding token
//! in the user's `valid_tokens` set.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Scope carried by tokens for authenticated endpoints.
pub const SCOPE_SESSION: &str = "session";

const GCM_NONCE_SIZE: usize = 12;

/// What a session token asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The user the token was minted for.
    pub subject: i64,
    /// The endpoint class the token is valid for.
    pub scope: String,
    /// Expiry, milliseconds since epoch.
    pub expires: i64,
}

/// A per-user AES-256 key for sealing session tokens.
pub struct TokenKey {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKey").field("key", &"[REDACTED]").finish()
    }
}

impl Drop for TokenKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl TokenKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Mint a token for `claims`.
    pub fn mint(&self, claims: &Claims) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("token key is 32 bytes");
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::Io(e.into()))?;
        let plaintext = serde_json::to_vec(claims).map_err(|_| CryptoError::BadToken)?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CryptoError::BadToken)?;

        let mut blob = Vec::with_capacity(GCM_NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Open `token` and check it carries `scope` and has not expired.
    pub fn verify(&self, token: &str, scope: &str, now_ms: i64) -> Result<Claims> {
        let blob = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CryptoError::BadToken)?;
        if blob.len() < GCM_NONCE_SIZE + 16 {
            return Err(CryptoError::BadToken);
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("token key is 32 bytes");
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&blob[..GCM_NONCE_SIZE]),
                &blob[GCM_NONCE_SIZE..],
            )
            .map_err(|_| CryptoError::BadToken)?;
        let claims: Claims =
            serde_json::from_slice(&plaintext).map_err(|_| CryptoError::BadToken)?;

        if claims.expires <= now_ms {
            return Err(CryptoError::TokenExpired);
        }
        if claims.scope != scope {
            return Err(CryptoError::ScopeMismatch {
                expected: scope.to_string(),
                actual: claims.scope,
            });
        }
        Ok(claims)
    }
}

/// The hash under which a minted token is remembered in the user's
/// `valid_tokens` set.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
