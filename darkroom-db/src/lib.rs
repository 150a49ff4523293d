//! # darkroom-db
//!
//! The data model of the darkroom vault server: user accounts, contact
//! lists, albums, file sets, and the sync delta engine, all persisted
//! through the encrypted object store in `darkroom-store`.
//!
//! Every mutation runs inside a single multi-record transaction covering
//! each manifest, file set and refcount record it touches, so concurrent
//! callers observe only serial outcomes and a crash never leaves a
//! half-applied operation.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod albums;
mod config;
mod error;
mod files;
mod sync;
mod tokens;
mod users;

pub use albums::{Album, AlbumManifest, AlbumRef, AddAlbumParams};
pub use config::{Config, ConfigError};
pub use error::{DbError, Result};
pub use files::{FileSet, FileSpec, FsFile, MoveFileParams};
pub use sync::{CursorSet, Updates};
pub use users::{AddUserParams, Contact, ContactList, User, UserEntry};

use darkroom_crypto::MasterKey;
use darkroom_store::{BlobPool, Store};
use darkroom_types::UserId;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the encrypted user directory record.
pub(crate) const USER_LIST: &str = "users.dat";

pub(crate) fn user_file(id: UserId) -> String {
    format!("home/{id}/user.dat")
}

pub(crate) fn contacts_file(id: UserId) -> String {
    format!("home/{id}/contact-list.dat")
}

pub(crate) fn manifest_file(id: UserId) -> String {
    format!("home/{id}/album-manifest.dat")
}

pub(crate) fn gallery_file(id: UserId) -> String {
    format!("home/{id}/gallery.dat")
}

pub(crate) fn trash_file(id: UserId) -> String {
    format!("home/{id}/trash.dat")
}

pub(crate) fn album_file(owner: UserId, album_id: &darkroom_types::AlbumId) -> String {
    format!("home/{owner}/album/{album_id}.dat")
}

pub(crate) fn home_dir(id: UserId) -> String {
    format!("home/{id}")
}

/// The vault database: the single entry point for all state changes.
pub struct Db {
    store: Store,
    blobs: BlobPool,
    master_key: Arc<MasterKey>,
    // 0 means "use the system clock"; anything else is a frozen test time.
    test_time_ms: AtomicI64,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("root", &self.store.root())
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Open the database rooted at `root` with an already-loaded master
    /// key.
    pub fn open(root: impl AsRef<Path>, master_key: MasterKey) -> Result<Self> {
        let master_key = Arc::new(master_key);
        let store = Store::open(root.as_ref(), master_key.clone())?;
        let blobs = BlobPool::new(root.as_ref());
        tracing::info!("database opened at {:?}", root.as_ref());
        Ok(Self {
            store,
            blobs,
            master_key,
            test_time_ms: AtomicI64::new(0),
        })
    }

    /// Open the database described by `config`, loading the wrapped
    /// master key with `passphrase` - or creating and saving one on first
    /// boot when the configuration allows it.
    pub fn with_config(config: &Config, passphrase: &str) -> Result<Self> {
        let key_path = config.master_key_path();
        let master_key = if key_path.exists() {
            MasterKey::read(passphrase, &key_path)?
        } else if config.allow_create_key {
            tracing::info!("no master key at {:?}, creating one", key_path);
            let key = MasterKey::create()?;
            key.save(passphrase, &key_path)?;
            key
        } else {
            return Err(DbError::NotFound(format!(
                "master key file {:?} does not exist",
                key_path
            )));
        };
        Self::open(&config.root, master_key)
    }

    /// The underlying object store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The blob pool.
    pub fn blobs(&self) -> &BlobPool {
        &self.blobs
    }

    pub(crate) fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    /// Current time in milliseconds since epoch.
    pub(crate) fn now_ms(&self) -> i64 {
        let frozen = self.test_time_ms.load(Ordering::Relaxed);
        if frozen != 0 {
            return frozen;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Freeze the clock for deterministic tests.
    pub fn set_time_for_testing(&self, ms: i64) {
        self.test_time_ms.store(ms, Ordering::Relaxed);
    }
}
