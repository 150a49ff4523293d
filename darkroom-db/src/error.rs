//! Error types for darkroom-db.

use darkroom_crypto::CryptoError;
use darkroom_store::StoreError;
use darkroom_types::Response;
use thiserror::Error;

/// Errors surfaced by database operations.
///
/// The variants follow the wire error taxonomy: validation, auth,
/// permission, absence, uniqueness/contention, corruption, and I/O.
#[derive(Debug, Error)]
pub enum DbError {
    /// A request parameter failed validation.
    #[error("invalid input: {0}")]
    BadInput(String),

    /// The caller's token is missing, invalid, or has the wrong scope.
    #[error("authentication required")]
    AuthRequired,

    /// The caller is not permitted to do this.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint failed or a lock is already held.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store-level failure (includes record corruption).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Crypto failure outside record authentication.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Map this error to the wire response the HTTP adapter should send.
    ///
    /// Internal failures (I/O, corruption, crypto) are logged here and
    /// surface to the client as an anonymous internal error; auth
    /// failures instruct the client to drop its session.
    pub fn to_response(&self) -> Response {
        match self {
            DbError::BadInput(msg) => Response::nok().with_error(msg.clone()),
            DbError::AuthRequired => Response::nok_logout().with_error("authentication required"),
            DbError::Forbidden(msg) => Response::nok().with_error(msg.clone()),
            DbError::NotFound(msg) => Response::nok().with_error(msg.clone()),
            DbError::Conflict(msg) => Response::nok().with_error(msg.clone()),
            DbError::Store(StoreError::NotFound { name }) => {
                Response::nok().with_error(format!("not found: {name}"))
            }
            DbError::Store(StoreError::Exists { name }) => {
                Response::nok().with_error(format!("already exists: {name}"))
            }
            other => {
                tracing::error!("internal error: {}", other);
                Response::nok().with_error("internal error")
            }
        }
    }
}

/// Result alias for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_instruct_logout() {
        let r = DbError::AuthRequired.to_response();
        assert_eq!(r.status, "nok");
        assert_eq!(r.parts.get("logout").unwrap(), "1");
    }

    #[test]
    fn validation_errors_carry_the_message() {
        let r = DbError::BadInput("albumId is required".into()).to_response();
        assert_eq!(r.errors, vec!["albumId is required".to_string()]);
        assert!(r.parts.get("logout").is_none());
    }

    #[test]
    fn internal_errors_are_anonymous() {
        let r = DbError::Store(StoreError::Corrupt {
            name: "users.dat".into(),
        })
        .to_response();
        assert_eq!(r.errors, vec!["internal error".to_string()]);
    }
}
