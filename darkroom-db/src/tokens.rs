//! Session-token persistence and verification.
//!
//! Token sealing itself lives in `darkroom-crypto`; this module owns the
//! store contract: the per-user `valid_tokens` set changes atomically with
//! the user record on login, logout, and password change.
//!
//! The wire form is `<user id>.<sealed claims>` so the server can pick the
//! right per-user token key before opening the sealed part.

use base64::{engine::general_purpose::STANDARD, Engine};
use darkroom_crypto::{token_hash, Claims, CryptoError, TokenKey, SCOPE_SESSION};
use darkroom_types::UserId;

use crate::{user_file, Db, DbError, Result, User};

impl Db {
    /// Unwrap a user's token key.
    pub fn token_key_for_user(&self, user: &User) -> Result<TokenKey> {
        let wrapped = STANDARD
            .decode(&user.token_key)
            .map_err(|_| DbError::Crypto(CryptoError::BadToken))?;
        Ok(TokenKey::from_bytes(self.master_key().decrypt_key(&wrapped)?))
    }

    /// Unwrap the token key of the account registered under `email`.
    /// Used by the login path, before any session exists.
    pub fn token_key_for_email(&self, email: &str) -> Result<TokenKey> {
        let user = self.user_by_email(email)?;
        self.token_key_for_user(&user)
    }

    /// Mint a session token for `user` and remember its hash in the
    /// user's `valid_tokens`, atomically with the user record.
    pub fn mint_session_token(&self, user_id: UserId, ttl_ms: i64) -> Result<String> {
        let name = user_file(user_id);
        let mut txn = self.store().open_for_update(&name)?;
        let mut user: User = txn.get(&name)?;

        let key = self.token_key_for_user(&user)?;
        let sealed = key.mint(&Claims {
            subject: user_id.as_i64(),
            scope: SCOPE_SESSION.to_string(),
            expires: self.now_ms() + ttl_ms,
        })?;
        let token = format!("{user_id}.{sealed}");

        user.valid_tokens.insert(token_hash(&token));
        txn.set(&name, &user)?;
        txn.commit()?;
        Ok(token)
    }

    /// Verify a session token and return the account it belongs to.
    ///
    /// Any failure - malformed token, unknown user, bad seal, expiry,
    /// scope mismatch, or a token that was logged out - maps to
    /// [`DbError::AuthRequired`], which the wire layer renders as a NOK
    /// carrying the logout instruction.
    pub fn check_session_token(&self, token: &str) -> Result<User> {
        let (uid_part, _) = token.split_once('.').ok_or(DbError::AuthRequired)?;
        let uid: i64 = uid_part.parse().map_err(|_| DbError::AuthRequired)?;
        let user = self
            .user_by_id(UserId::new(uid))
            .map_err(|_| DbError::AuthRequired)?;

        if !user.valid_tokens.contains(&token_hash(token)) {
            return Err(DbError::AuthRequired);
        }
        let key = self.token_key_for_user(&user)?;
        let sealed = &token[uid_part.len() + 1..];
        let claims = key
            .verify(sealed, SCOPE_SESSION, self.now_ms())
            .map_err(|_| DbError::AuthRequired)?;
        if claims.subject != uid {
            return Err(DbError::AuthRequired);
        }
        Ok(user)
    }

    /// Forget one session token (logout).
    pub fn invalidate_token(&self, user_id: UserId, token: &str) -> Result<()> {
        let name = user_file(user_id);
        let mut txn = self.store().open_for_update(&name)?;
        let mut user: User = txn.get(&name)?;
        user.valid_tokens.remove(&token_hash(token));
        txn.set(&name, &user)?;
        txn.commit()?;
        Ok(())
    }

    /// Forget every session token, optionally sparing one (password
    /// change keeps the caller's session alive).
    pub fn invalidate_all_tokens(&self, user_id: UserId, keep: Option<&str>) -> Result<()> {
        let name = user_file(user_id);
        let mut txn = self.store().open_for_update(&name)?;
        let mut user: User = txn.get(&name)?;
        let kept = keep.map(token_hash);
        user.valid_tokens.retain(|h| Some(h) == kept.as_ref());
        txn.set(&name, &user)?;
        txn.commit()?;
        Ok(())
    }
}
