//! Content-addressed storage for large ciphertext.
//!
//! Blobs (encrypted file bodies and thumbnails) are addressed by the
//! BLAKE3 hash of their content and sharded by the first two hex
//! characters: `blobs/<2 hex>/<hex hash>`. Identical content lands on the
//! same path, so duplicate uploads dedup for free.
//!
//! Reference counts live in a [`Store`](crate::Store) record
//! ([`REFCOUNT_RECORD`]) so they can be mutated inside whatever
//! transaction adds or removes the references; the blob files themselves
//! are only unlinked after that transaction commits.

use darkroom_types::BlobId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// The store record holding the blob reference counts.
pub const REFCOUNT_RECORD: &str = "blobs/refcount.dat";

/// Content-addressed blob storage under `<root>/blobs`.
#[derive(Debug, Clone)]
pub struct BlobPool {
    root: PathBuf,
}

impl BlobPool {
    /// Create a pool rooted at `<store_root>/blobs`.
    pub fn new(store_root: impl AsRef<Path>) -> Self {
        Self {
            root: store_root.as_ref().join("blobs"),
        }
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(id.shard()).join(id.as_str())
    }

    /// Stream `reader` into the pool and return the content address.
    ///
    /// The bytes go to a temp file first and are only moved into place
    /// once fully written and hashed, so a crash mid-upload leaves no
    /// partial blob behind.
    pub fn put<R: Read>(&self, reader: &mut R) -> Result<BlobId> {
        fs::create_dir_all(&self.root)?;
        let mut staging = tempfile::NamedTempFile::new_in(&self.root)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            staging.write_all(&buf[..n])?;
        }
        staging.as_file().sync_all()?;

        let id = BlobId::new(hex::encode(hasher.finalize().as_bytes()));
        let path = self.blob_path(&id);
        if path.exists() {
            // Duplicate content: already stored under this address.
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        staging
            .persist(&path)
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(id)
    }

    /// Move an already-staged file into the pool by content address.
    ///
    /// Used by uploads that stream to a staging path before any record
    /// lock is taken.
    pub fn adopt(&self, staged: &Path) -> Result<BlobId> {
        let mut file = File::open(staged)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        drop(file);

        let id = BlobId::new(hex::encode(hasher.finalize().as_bytes()));
        let path = self.blob_path(&id);
        if path.exists() {
            fs::remove_file(staged)?;
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staged, &path)?;
        Ok(id)
    }

    /// Open a blob for reading.
    pub fn open(&self, id: &BlobId) -> Result<File> {
        File::open(self.blob_path(id)).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound {
                    name: id.to_string(),
                }
            } else {
                e.into()
            }
        })
    }

    /// True when the blob exists on disk.
    pub fn contains(&self, id: &BlobId) -> bool {
        self.blob_path(id).exists()
    }

    /// Unlink a blob whose reference count reached zero.
    pub fn remove(&self, id: &BlobId) -> Result<()> {
        match fs::remove_file(self.blob_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The reference-count table, persisted as the [`REFCOUNT_RECORD`] store
/// record and mutated inside the transaction that changes the references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefCounts {
    counts: BTreeMap<String, i64>,
    /// Blob ids whose count hit zero since this value was loaded. The
    /// caller unlinks these after its transaction commits.
    #[serde(skip)]
    zeroed: Vec<BlobId>,
}

impl RefCounts {
    /// Adjust the count for `id` by `delta` (which may be negative) and
    /// return the new count. A count reaching zero drops the entry and
    /// queues the id for unlinking.
    pub fn apply(&mut self, id: &BlobId, delta: i64) -> i64 {
        let count = self.counts.entry(id.as_str().to_string()).or_insert(0);
        *count += delta;
        let now = *count;
        if now <= 0 {
            if now < 0 {
                tracing::error!("refcount for blob {} went negative: {}", id, now);
            }
            self.counts.remove(id.as_str());
            self.zeroed.push(id.clone());
        }
        now
    }

    /// The current count for `id` (zero when unreferenced).
    pub fn count(&self, id: &BlobId) -> i64 {
        self.counts.get(id.as_str()).copied().unwrap_or(0)
    }

    /// Take the ids queued for unlinking.
    ///
    /// An id that was re-referenced after hitting zero (a same-content
    /// re-upload inside one transaction) is filtered back out here.
    pub fn take_zeroed(&mut self) -> Vec<BlobId> {
        let zeroed = std::mem::take(&mut self.zeroed);
        zeroed.into_iter().filter(|id| self.count(id) == 0).collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when nothing is referenced.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
