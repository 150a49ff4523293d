//! Named, encrypted records with multi-record transactions.
//!
//! Records are JSON documents encrypted under the master key, one file per
//! record under the store root. Updates stage ciphertext to `<name>.tmp`
//! siblings, fsync, then rename into place; a crash before the renames
//! leaves every live record untouched, and leftover `*.tmp` staging is
//! swept the next time the store opens.
//!
//! Locking is two-level: an OS advisory lock on a `<name>.lock` sibling
//! serializes holders across threads and processes, and an in-process
//! registry keyed by path turns a nested acquisition of the same record by
//! the same thread into an error instead of a self-deadlock. Multi-record
//! transactions acquire their locks in lexicographic name order, so two
//! transactions over overlapping sets always order themselves the same way
//! and cannot deadlock.

use dashmap::DashMap;
use darkroom_crypto::{CryptoError, MasterKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::{Result, StoreError};

/// The encrypted object store.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    master_key: Arc<MasterKey>,
    locks: Arc<DashMap<PathBuf, ThreadId>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("held_locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open a store rooted at `root`, creating the directory if needed and
    /// sweeping any `*.tmp` staging left by an interrupted commit.
    pub fn open(root: impl Into<PathBuf>, master_key: Arc<MasterKey>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let swept = sweep_tmp(&root)?;
        if swept > 0 {
            tracing::warn!("swept {} stale temp file(s) under {:?}", swept, root);
        }
        Ok(Self {
            root,
            master_key,
            locks: Arc::new(DashMap::new()),
        })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        let rel = Path::new(name);
        let clean = !name.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StoreError::InvalidName { name: name.into() });
        }
        Ok(self.root.join(rel))
    }

    fn decode<T: DeserializeOwned>(&self, name: &str, ciphertext: &[u8]) -> Result<T> {
        let plain = self.decrypt_record(name, ciphertext)?;
        serde_json::from_slice(&plain).map_err(|e| {
            tracing::error!("record {} failed to decode: {}", name, e);
            StoreError::Corrupt { name: name.into() }
        })
    }

    fn decrypt_record(&self, name: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.master_key.decrypt(ciphertext).map_err(|e| match e {
            CryptoError::BadMac | CryptoError::ShortCiphertext | CryptoError::Malformed => {
                tracing::error!("record {} failed authentication", name);
                StoreError::Corrupt { name: name.into() }
            }
            other => StoreError::Crypto(other),
        })
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let plain = serde_json::to_vec(value)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        Ok(self.master_key.encrypt(&plain)?)
    }

    /// Read and decrypt the named record.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.record_path(name)?;
        let ciphertext = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { name: name.into() })
            }
            Err(e) => return Err(e.into()),
        };
        self.decode(name, &ciphertext)
    }

    /// Encrypt and atomically write the named record, replacing any
    /// previous value.
    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.record_path(name)?;
        let ciphertext = self.encode(value)?;
        write_atomic(&path, &ciphertext)
    }

    /// Create the named record with an initial value; fails with
    /// [`StoreError::Exists`] if it is already present.
    pub fn create_empty<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.record_path(name)?;
        if path.exists() {
            return Err(StoreError::Exists { name: name.into() });
        }
        let ciphertext = self.encode(value)?;
        write_atomic(&path, &ciphertext)
    }

    /// Remove the named record and its lock-file sibling. The caller is
    /// expected to hold no transaction over it.
    pub fn remove_record(&self, name: &str) -> Result<()> {
        let path = self.record_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { name: name.into() })
            }
            Err(e) => return Err(e.into()),
        }
        let _ = fs::remove_file(lock_path(&path));
        Ok(())
    }

    /// Remove a whole subtree of records (a user's home directory, an
    /// album directory). Missing trees are fine.
    pub fn remove_dir(&self, name: &str) -> Result<()> {
        let path = self.record_path(name)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// True when the named record exists.
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.record_path(name)?.exists())
    }

    /// Open one record for exclusive update.
    pub fn open_for_update(&self, name: &str) -> Result<Transaction<'_>> {
        self.open_many_for_update(&[name.to_string()])
    }

    /// Open a set of records for exclusive update.
    ///
    /// Locks are acquired in lexicographic name order; the commit renames
    /// all staged values in the same order, all or nothing. Re-opening a
    /// name this thread already holds is refused with
    /// [`StoreError::Conflict`].
    pub fn open_many_for_update(&self, names: &[String]) -> Result<Transaction<'_>> {
        let mut sorted: Vec<String> = names.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut txn = Transaction {
            store: self,
            entries: Vec::with_capacity(sorted.len()),
            tmp_written: Vec::new(),
            committed: false,
        };
        for name in sorted {
            txn.acquire(name)?;
        }
        Ok(txn)
    }
}

/// An exclusive, all-or-nothing update over a set of records.
///
/// Dropping the transaction without [`commit`](Transaction::commit)
/// releases every lock and discards all staged values; this is the
/// rollback path, and it is what an unwinding (cancelled) caller gets for
/// free.
pub struct Transaction<'a> {
    store: &'a Store,
    entries: Vec<TxnEntry>,
    tmp_written: Vec<PathBuf>,
    committed: bool,
}

struct TxnEntry {
    name: String,
    path: PathBuf,
    // Holds the OS advisory lock for the lifetime of the transaction.
    _lock_file: File,
    current: Option<Vec<u8>>,
    staged: Staged,
}

enum Staged {
    Unchanged,
    Write(Vec<u8>),
    Delete,
}

impl<'a> Transaction<'a> {
    fn acquire(&mut self, name: String) -> Result<()> {
        let path = self.store.record_path(&name)?;
        let me = thread::current().id();
        if let Some(holder) = self.store.locks.get(&path) {
            if *holder == me {
                return Err(StoreError::Conflict { name });
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(&path))?;
        lock_file.lock()?;
        self.store.locks.insert(path.clone(), me);

        let loaded = match fs::read(&path) {
            Ok(ciphertext) => self.store.decrypt_record(&name, &ciphertext).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        let current = match loaded {
            Ok(current) => current,
            Err(e) => {
                self.store.locks.remove_if(&path, |_, holder| *holder == me);
                return Err(e);
            }
        };
        self.entries.push(TxnEntry {
            name,
            path,
            _lock_file: lock_file,
            current,
            staged: Staged::Unchanged,
        });
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<&TxnEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| StoreError::NotFound { name: name.into() })
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut TxnEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| StoreError::NotFound { name: name.into() })
    }

    /// Decode the value of a record held by this transaction, staged value
    /// winning over the loaded snapshot.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let entry = self.entry(name)?;
        let bytes = match &entry.staged {
            Staged::Write(plain) => plain,
            Staged::Delete => return Err(StoreError::NotFound { name: name.into() }),
            Staged::Unchanged => entry
                .current
                .as_ref()
                .ok_or_else(|| StoreError::NotFound { name: name.into() })?,
        };
        serde_json::from_slice(bytes).map_err(|_| StoreError::Corrupt { name: name.into() })
    }

    /// Like [`get`](Self::get), but an absent record decodes to the
    /// default value.
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        match self.get(name) {
            Ok(v) => Ok(v),
            Err(StoreError::NotFound { .. }) => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    /// True when the record existed when the transaction opened (or has a
    /// staged write).
    pub fn is_present(&self, name: &str) -> Result<bool> {
        let entry = self.entry(name)?;
        Ok(match &entry.staged {
            Staged::Write(_) => true,
            Staged::Delete => false,
            Staged::Unchanged => entry.current.is_some(),
        })
    }

    /// Stage a new value for a record held by this transaction.
    pub fn set<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        let plain = serde_json::to_vec(value)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        self.entry_mut(name)?.staged = Staged::Write(plain);
        Ok(())
    }

    /// Stage the removal of a record held by this transaction.
    pub fn stage_delete(&mut self, name: &str) -> Result<()> {
        self.entry_mut(name)?.staged = Staged::Delete;
        Ok(())
    }

    /// Apply every staged change, all or nothing.
    ///
    /// Prepare phase: encrypt and write each staged value to a `.tmp`
    /// sibling, fsync each. Commit phase: rename the temps into place in
    /// canonical order, then fsync the containing directories. A crash
    /// during prepare touches no live record; a crash between renames is
    /// repaired at next startup only in the sense that staging is swept -
    /// rename order is the canonical record order, so observers never see
    /// a torn individual record.
    pub fn commit(mut self) -> Result<()> {
        // Prepare.
        for i in 0..self.entries.len() {
            if let Staged::Write(plain) = &self.entries[i].staged {
                let ciphertext = self.store.master_key.encrypt(plain)?;
                let tmp = tmp_path(&self.entries[i].path);
                write_and_sync(&tmp, &ciphertext)?;
                self.tmp_written.push(tmp);
            }
        }
        // Commit: rename / unlink in canonical (sorted) order.
        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in &self.entries {
            match &entry.staged {
                Staged::Write(_) => {
                    fs::rename(tmp_path(&entry.path), &entry.path)?;
                }
                Staged::Delete => {
                    let _ = fs::remove_file(&entry.path);
                }
                Staged::Unchanged => continue,
            }
            if let Some(parent) = entry.path.parent() {
                if !dirs.contains(&parent.to_path_buf()) {
                    dirs.push(parent.to_path_buf());
                }
            }
        }
        for dir in dirs {
            sync_dir(&dir);
        }
        self.tmp_written.clear();
        self.committed = true;
        Ok(())
    }

    /// Release every lock without writing anything.
    pub fn rollback(self) {
        // Drop does the work.
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            for tmp in &self.tmp_written {
                let _ = fs::remove_file(tmp);
            }
        }
        let me = thread::current().id();
        for entry in &self.entries {
            self.store
                .locks
                .remove_if(&entry.path, |_, holder| *holder == me);
        }
        // OS locks release when the lock files drop.
    }
}

fn lock_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.tmp", path.display()))
}

fn write_and_sync(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    std::io::Write::write_all(&mut file, data)?;
    file.sync_all()?;
    Ok(())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    write_and_sync(&tmp, data)?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
    Ok(())
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

fn sweep_tmp(dir: &Path) -> std::io::Result<usize> {
    let mut swept = 0;
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let path = dirent.path();
        if dirent.file_type()?.is_dir() {
            swept += sweep_tmp(&path)?;
        } else if path.extension().is_some_and(|ext| ext == "tmp") {
            fs::remove_file(&path)?;
            swept += 1;
        }
    }
    Ok(swept)
}
