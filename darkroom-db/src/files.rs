//! File sets: Gallery, Trash, and per-album file collections.

use darkroom_types::{
    AlbumId, BlobId, DeleteEvent, DeleteEventKind, UserId, ALBUM_SET, GALLERY_SET, TRASH_SET,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use crate::{album_file, gallery_file, trash_file, Db, DbError, Result};
use darkroom_store::{RefCounts, REFCOUNT_RECORD};

/// One file inside a file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsFile {
    /// Filename (client-chosen, unique within the set).
    pub file: String,
    /// Client file-format version.
    pub version: String,
    /// Client-encrypted headers (filename, keys, dimensions - opaque).
    pub headers: String,
    /// Creation time, ms.
    pub date_created: i64,
    /// Last modification time, ms.
    pub date_modified: i64,
    /// Owning album, empty for Gallery and Trash.
    #[serde(default)]
    pub album_id: AlbumId,
    /// Content address of the encrypted file body.
    pub store_file: BlobId,
    /// Content address of the encrypted thumbnail.
    pub store_thumb: BlobId,
}

/// A mapping from filename to file record, plus its gravestones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSet {
    /// The live files, keyed by filename.
    #[serde(default)]
    pub files: BTreeMap<String, FsFile>,
    /// File gravestones for sync.
    #[serde(default)]
    pub deletes: Vec<DeleteEvent>,
}

/// An upload that has already been staged to disk, lock-free, and is ready
/// to enter a file set.
#[derive(Debug, Clone)]
pub struct FileSpec {
    /// Client-encrypted headers.
    pub headers: String,
    /// Client file-format version.
    pub version: String,
    /// Creation time, ms.
    pub date_created: i64,
    /// Modification time, ms.
    pub date_modified: i64,
    /// Staged path of the encrypted file body.
    pub store_file: PathBuf,
    /// Staged path of the encrypted thumbnail.
    pub store_thumb: PathBuf,
}

/// Parameters of a move/copy between file sets.
#[derive(Debug, Clone)]
pub struct MoveFileParams {
    /// Source set tag.
    pub set_from: String,
    /// Destination set tag.
    pub set_to: String,
    /// Source album, when `set_from` is the album set.
    pub album_id_from: AlbumId,
    /// Destination album, when `set_to` is the album set.
    pub album_id_to: AlbumId,
    /// True to move (remove from the source), false to copy.
    pub is_moving: bool,
    /// The files to move; all must live in the source set.
    pub filenames: Vec<String>,
    /// Replacement headers, parallel to `filenames`, supplied by the
    /// client whenever either side is an album (the client re-encrypts
    /// the headers from the source key to the destination key; the server
    /// only swaps them in). Empty to keep the stored headers.
    pub headers: Vec<String>,
    /// New filename; only valid when moving exactly one file.
    pub rename: Option<String>,
}

/// Where a file-set lives and how the caller relates to it.
struct SetRef {
    record: String,
    album_id: AlbumId,
    /// None for Gallery/Trash; for albums, whether the caller owns it and
    /// the permission mask otherwise.
    album: Option<(bool, darkroom_types::Permissions)>,
}

impl Db {
    fn resolve_set(&self, user_id: UserId, set: &str, album_id: &AlbumId) -> Result<SetRef> {
        match set {
            GALLERY_SET => Ok(SetRef {
                record: gallery_file(user_id),
                album_id: AlbumId::default(),
                album: None,
            }),
            TRASH_SET => Ok(SetRef {
                record: trash_file(user_id),
                album_id: AlbumId::default(),
                album: None,
            }),
            ALBUM_SET => {
                if album_id.is_empty() {
                    return Err(DbError::BadInput("albumId is required".into()));
                }
                let album = self.album(user_id, album_id)?;
                Ok(SetRef {
                    record: album_file(album.owner_id, album_id),
                    album_id: album_id.clone(),
                    album: Some((album.owner_id == user_id, album.permissions)),
                })
            }
            other => Err(DbError::BadInput(format!("unknown set: {other}"))),
        }
    }

    /// Add a staged upload to a file set, bumping blob reference counts in
    /// the same transaction.
    ///
    /// The blobs were staged before any lock was taken; if the transaction
    /// fails they are swept back out of the pool below.
    pub fn add_file(
        &self,
        user_id: UserId,
        spec: FileSpec,
        filename: &str,
        set: &str,
        album_id: &AlbumId,
    ) -> Result<()> {
        if filename.is_empty() {
            return Err(DbError::BadInput("filename is required".into()));
        }
        let dst = self.resolve_set(user_id, set, album_id)?;
        if let Some((is_owner, ref perms)) = dst.album {
            if !is_owner && !perms.allow_add() {
                return Err(DbError::Forbidden("adding to this album is not allowed".into()));
            }
        }

        let store_file = self.blobs().adopt(&spec.store_file)?;
        let store_thumb = self.blobs().adopt(&spec.store_thumb)?;

        let result = self.insert_file(&dst, filename, &spec, &store_file, &store_thumb);
        if result.is_err() {
            // The transaction never counted the staged blobs; drop them
            // unless something else already references them.
            self.sweep_unreferenced(&[store_file, store_thumb]);
        }
        result
    }

    fn insert_file(
        &self,
        dst: &SetRef,
        filename: &str,
        spec: &FileSpec,
        store_file: &BlobId,
        store_thumb: &BlobId,
    ) -> Result<()> {
        let names = vec![dst.record.clone(), REFCOUNT_RECORD.to_string()];
        let mut txn = self.store().open_many_for_update(&names)?;
        let mut set: FileSet = match txn.get(&dst.record) {
            Ok(set) => set,
            Err(darkroom_store::StoreError::NotFound { .. }) => {
                return Err(DbError::NotFound("no such file set".into()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut counts: RefCounts = txn.get_or_default(REFCOUNT_RECORD)?;

        if let Some(old) = set.files.insert(
            filename.to_string(),
            FsFile {
                file: filename.to_string(),
                version: spec.version.clone(),
                headers: spec.headers.clone(),
                date_created: spec.date_created,
                date_modified: spec.date_modified,
                album_id: dst.album_id.clone(),
                store_file: store_file.clone(),
                store_thumb: store_thumb.clone(),
            },
        ) {
            counts.apply(&old.store_file, -1);
            counts.apply(&old.store_thumb, -1);
        }
        counts.apply(store_file, 1);
        counts.apply(store_thumb, 1);

        let zeroed = counts.take_zeroed();
        txn.set(&dst.record, &set)?;
        txn.set(REFCOUNT_RECORD, &counts)?;
        txn.commit()?;
        for blob in zeroed {
            self.blobs().remove(&blob)?;
        }
        Ok(())
    }

    fn sweep_unreferenced(&self, blobs: &[BlobId]) {
        let counts: RefCounts = self
            .store()
            .read(REFCOUNT_RECORD)
            .unwrap_or_default();
        for blob in blobs {
            if counts.count(blob) == 0 {
                if let Err(e) = self.blobs().remove(blob) {
                    tracing::error!("failed to sweep staged blob {}: {}", blob, e);
                }
            }
        }
    }

    /// Move or copy files between sets.
    ///
    /// Preconditions, in order, each with its own error: the move must go
    /// somewhere; moving out of someone else's album is denied; adding to
    /// someone else's album needs `allow_add`; copying out of someone
    /// else's album needs `allow_copy`; the Trash never takes part in a
    /// copy; a rename applies to exactly one file.
    pub fn move_file(&self, user_id: UserId, params: MoveFileParams) -> Result<()> {
        if params.filenames.is_empty() {
            return Err(DbError::BadInput("no files to move".into()));
        }
        if params.set_from == params.set_to
            && params.album_id_from == params.album_id_to
            && params.rename.is_none()
        {
            return Err(DbError::BadInput(
                "source and destination are the same".into(),
            ));
        }

        let src = self.resolve_set(user_id, &params.set_from, &params.album_id_from)?;
        if let Some((is_owner, ref perms)) = src.album {
            if !is_owner {
                if params.is_moving {
                    return Err(DbError::Forbidden(
                        "moving out of a shared album is not allowed".into(),
                    ));
                }
                if !perms.allow_copy() {
                    return Err(DbError::Forbidden(
                        "copying out of this album is not allowed".into(),
                    ));
                }
            }
        }

        let dst = self.resolve_set(user_id, &params.set_to, &params.album_id_to)?;
        if let Some((is_owner, ref perms)) = dst.album {
            if !is_owner && !perms.allow_add() {
                return Err(DbError::Forbidden(
                    "adding to this album is not allowed".into(),
                ));
            }
        }

        if !params.is_moving
            && (params.set_to == TRASH_SET || params.set_from == TRASH_SET)
        {
            return Err(DbError::BadInput("the Trash cannot take part in a copy".into()));
        }
        if params.rename.is_some() && params.filenames.len() != 1 {
            return Err(DbError::BadInput(
                "rename applies to exactly one file".into(),
            ));
        }
        if !params.headers.is_empty() && params.headers.len() != params.filenames.len() {
            return Err(DbError::BadInput(
                "headers do not match the file list".into(),
            ));
        }

        let same_set = src.record == dst.record;
        let mut names = vec![src.record.clone(), REFCOUNT_RECORD.to_string()];
        if !same_set {
            names.push(dst.record.clone());
        }
        let mut txn = self.store().open_many_for_update(&names)?;

        let mut src_set: FileSet = txn.get_or_default(&src.record)?;
        let mut dst_set: FileSet = if same_set {
            FileSet::default() // unused; the source instance is both sides
        } else {
            txn.get_or_default(&dst.record)?
        };
        let mut counts: RefCounts = txn.get_or_default(REFCOUNT_RECORD)?;
        let now = self.now_ms();

        let src_gone_kind = match params.set_from.as_str() {
            GALLERY_SET => DeleteEventKind::Gallery,
            TRASH_SET => DeleteEventKind::Trash,
            _ => DeleteEventKind::AlbumFileMovedOut,
        };

        for (i, filename) in params.filenames.iter().enumerate() {
            let entry = if params.is_moving {
                src_set.files.remove(filename)
            } else {
                src_set.files.get(filename).cloned()
            };
            let mut entry = entry
                .ok_or_else(|| DbError::NotFound(format!("no file {filename}")))?;

            if let Some(headers) = params.headers.get(i) {
                entry.headers = headers.clone();
            }
            let key = params.rename.clone().unwrap_or_else(|| filename.clone());
            entry.file = key.clone();
            entry.album_id = dst.album_id.clone();
            entry.date_modified = now;

            if params.is_moving {
                src_set.deletes.push(DeleteEvent {
                    file: filename.clone(),
                    album_id: src.album_id.clone(),
                    date: now,
                    kind: src_gone_kind,
                });
            } else {
                // A copy creates a second reference to the same content.
                counts.apply(&entry.store_file, 1);
                counts.apply(&entry.store_thumb, 1);
            }

            let target = if same_set { &mut src_set } else { &mut dst_set };
            if let Some(old) = target.files.insert(key, entry) {
                counts.apply(&old.store_file, -1);
                counts.apply(&old.store_thumb, -1);
            }
        }

        let zeroed = counts.take_zeroed();
        txn.set(&src.record, &src_set)?;
        if !same_set {
            txn.set(&dst.record, &dst_set)?;
        }
        txn.set(REFCOUNT_RECORD, &counts)?;
        txn.commit()?;
        for blob in zeroed {
            self.blobs().remove(&blob)?;
        }
        Ok(())
    }

    /// Permanently remove named files from the Trash, releasing their
    /// blobs.
    pub fn delete_files(&self, user_id: UserId, filenames: &[String]) -> Result<()> {
        let trash_name = trash_file(user_id);
        let names = vec![trash_name.clone(), REFCOUNT_RECORD.to_string()];
        let mut txn = self.store().open_many_for_update(&names)?;
        let mut trash: FileSet = txn.get_or_default(&trash_name)?;
        let mut counts: RefCounts = txn.get_or_default(REFCOUNT_RECORD)?;
        let now = self.now_ms();

        for filename in filenames {
            if let Some(gone) = trash.files.remove(filename) {
                counts.apply(&gone.store_file, -1);
                counts.apply(&gone.store_thumb, -1);
                trash.deletes.push(DeleteEvent {
                    file: filename.clone(),
                    album_id: AlbumId::default(),
                    date: now,
                    kind: DeleteEventKind::Trash,
                });
            }
        }

        let zeroed = counts.take_zeroed();
        txn.set(&trash_name, &trash)?;
        txn.set(REFCOUNT_RECORD, &counts)?;
        txn.commit()?;
        for blob in zeroed {
            self.blobs().remove(&blob)?;
        }
        Ok(())
    }

    /// Remove every Trash file created at or before `cutoff_ms`, releasing
    /// their blobs.
    pub fn empty_trash(&self, user_id: UserId, cutoff_ms: i64) -> Result<()> {
        let trash_name = trash_file(user_id);
        let names = vec![trash_name.clone(), REFCOUNT_RECORD.to_string()];
        let mut txn = self.store().open_many_for_update(&names)?;
        let mut trash: FileSet = txn.get_or_default(&trash_name)?;
        let mut counts: RefCounts = txn.get_or_default(REFCOUNT_RECORD)?;
        let now = self.now_ms();

        let (gone, kept): (Vec<FsFile>, BTreeMap<String, FsFile>) = {
            let mut gone = Vec::new();
            let mut kept = BTreeMap::new();
            for (name, file) in std::mem::take(&mut trash.files) {
                if file.date_created <= cutoff_ms {
                    gone.push(file);
                } else {
                    kept.insert(name, file);
                }
            }
            (gone, kept)
        };
        trash.files = kept;
        for file in &gone {
            counts.apply(&file.store_file, -1);
            counts.apply(&file.store_thumb, -1);
            trash.deletes.push(DeleteEvent {
                file: file.file.clone(),
                album_id: AlbumId::default(),
                date: now,
                kind: DeleteEventKind::Trash,
            });
        }

        let zeroed = counts.take_zeroed();
        txn.set(&trash_name, &trash)?;
        txn.set(REFCOUNT_RECORD, &counts)?;
        txn.commit()?;
        for blob in zeroed {
            self.blobs().remove(&blob)?;
        }
        Ok(())
    }

    /// Load a file set visible to `user_id`.
    pub fn file_set(&self, user_id: UserId, set: &str, album_id: &AlbumId) -> Result<FileSet> {
        let set_ref = self.resolve_set(user_id, set, album_id)?;
        match self.store().read(&set_ref.record) {
            Ok(set) => Ok(set),
            Err(darkroom_store::StoreError::NotFound { .. }) => {
                Err(DbError::NotFound("no such file set".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open the blob behind a file for download. Membership of a shared
    /// album is sufficient to read its files.
    pub fn download_file(
        &self,
        user_id: UserId,
        set: &str,
        album_id: &AlbumId,
        filename: &str,
        thumb: bool,
    ) -> Result<File> {
        let file_set = self.file_set(user_id, set, album_id)?;
        let entry = file_set
            .files
            .get(filename)
            .ok_or_else(|| DbError::NotFound(format!("no file {filename}")))?;
        let blob = if thumb {
            &entry.store_thumb
        } else {
            &entry.store_file
        };
        Ok(self.blobs().open(blob)?)
    }
}
