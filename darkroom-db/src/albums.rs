//! Albums: the per-user manifest, sharing, and membership.
//!
//! An album's full record lives in its owner's manifest; members carry
//! only an [`AlbumRef`] (plus their wrapped sharing key) in their own
//! manifest's `remote_albums` view, never a duplicate of the album. The
//! album's file set is a separate record under the owner's home
//! (`home/<owner>/album/<albumID>.dat`).

use darkroom_types::{AlbumId, DeleteEvent, DeleteEventKind, Permissions, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{album_file, manifest_file, Db, DbError, FileSet, Result};

/// An album, as stored in its owner's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    /// Album identifier (client-chosen).
    pub album_id: AlbumId,
    /// The owning user.
    pub owner_id: UserId,
    /// Creation time, ms.
    pub date_created: i64,
    /// Last modification time, ms.
    pub date_modified: i64,
    /// The album key wrapped for the owner. Opaque client material.
    pub enc_private_key: String,
    /// The album public key. Opaque client material.
    pub public_key: String,
    /// Client-encrypted album metadata (name etc).
    pub metadata: String,
    /// Whether the album is currently shared.
    pub is_shared: bool,
    /// Client-owned display flag.
    pub is_hidden: bool,
    /// Client-owned display flag.
    pub is_locked: bool,
    /// Permission bitmask for non-owner members.
    pub permissions: Permissions,
    /// Cover file selector, client-owned.
    pub cover: String,
    /// Every member's user id, owner included while shared.
    pub members: BTreeSet<i64>,
    /// The album key wrapped for each non-owner member.
    pub sharing_keys: BTreeMap<i64, String>,
}

impl Album {
    /// Comma-joined ascending member list, the wire form.
    pub fn members_string(&self) -> String {
        let ids: Vec<String> = self.members.iter().map(|id| id.to_string()).collect();
        ids.join(",")
    }
}

/// A member's handle on an album they do not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    /// The album.
    pub album_id: AlbumId,
    /// Whose manifest holds the album record.
    pub owner_id: UserId,
    /// The album key wrapped for this member (their sharing key).
    pub enc_private_key: String,
}

/// A user's album state (`album-manifest.dat`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlbumManifest {
    /// Albums this user owns, keyed by album id.
    #[serde(default)]
    pub albums: BTreeMap<String, Album>,
    /// Albums shared with this user, keyed by album id.
    #[serde(default)]
    pub remote_albums: BTreeMap<String, AlbumRef>,
    /// Album gravestones for sync.
    #[serde(default)]
    pub deletes: Vec<DeleteEvent>,
}

/// Parameters for creating an album.
#[derive(Debug, Clone)]
pub struct AddAlbumParams {
    /// Client-chosen album id.
    pub album_id: AlbumId,
    /// Creation time, ms.
    pub date_created: i64,
    /// Modification time, ms.
    pub date_modified: i64,
    /// The album key wrapped for the owner.
    pub enc_private_key: String,
    /// The album public key.
    pub public_key: String,
    /// Client-encrypted metadata.
    pub metadata: String,
}

impl Db {
    /// Create an empty album owned by `user_id`.
    pub fn add_album(&self, user_id: UserId, params: AddAlbumParams) -> Result<Album> {
        if params.album_id.is_empty() {
            return Err(DbError::BadInput("albumId is required".into()));
        }
        let manifest_name = manifest_file(user_id);
        let fileset_name = album_file(user_id, &params.album_id);

        let names = vec![manifest_name.clone(), fileset_name.clone()];
        let mut txn = self.store().open_many_for_update(&names)?;
        let mut manifest: AlbumManifest = txn.get_or_default(&manifest_name)?;
        if manifest.albums.contains_key(params.album_id.as_str())
            || manifest.remote_albums.contains_key(params.album_id.as_str())
            || txn.is_present(&fileset_name)?
        {
            return Err(DbError::Conflict("album already exists".into()));
        }

        let album = Album {
            album_id: params.album_id.clone(),
            owner_id: user_id,
            date_created: params.date_created,
            date_modified: params.date_modified,
            enc_private_key: params.enc_private_key,
            public_key: params.public_key,
            metadata: params.metadata,
            is_shared: false,
            is_hidden: false,
            is_locked: false,
            permissions: Permissions::default(),
            cover: String::new(),
            members: BTreeSet::new(),
            sharing_keys: BTreeMap::new(),
        };
        manifest
            .albums
            .insert(params.album_id.as_str().to_string(), album.clone());
        txn.set(&manifest_name, &manifest)?;
        txn.set(&fileset_name, &FileSet::default())?;
        txn.commit()?;
        Ok(album)
    }

    /// Delete an album the caller owns.
    ///
    /// Every file still in the album releases its blob references; every
    /// member's manifest loses its handle and gains an album gravestone,
    /// as does the owner's.
    pub fn delete_album(&self, user_id: UserId, album_id: &AlbumId) -> Result<()> {
        let manifest_name = manifest_file(user_id);
        let fileset_name = album_file(user_id, album_id);

        // Learn the member set first; the lock-holding pass re-validates.
        // The notification loop below walks this same set, never the
        // post-lock one, so it only touches manifests it actually locked.
        let preview: AlbumManifest = self.store().read(&manifest_name)?;
        let members: Vec<i64> = preview
            .albums
            .get(album_id.as_str())
            .ok_or_else(|| self.album_not_found(&preview, album_id))?
            .members
            .iter()
            .copied()
            .filter(|&m| m != user_id.as_i64())
            .collect();

        let mut names = vec![
            manifest_name.clone(),
            fileset_name.clone(),
            darkroom_store::REFCOUNT_RECORD.to_string(),
        ];
        for &member in &members {
            names.push(manifest_file(UserId::new(member)));
        }
        let mut txn = self.store().open_many_for_update(&names)?;

        let mut manifest: AlbumManifest = txn.get_or_default(&manifest_name)?;
        manifest
            .albums
            .remove(album_id.as_str())
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))?;

        let now = self.now_ms();
        let mut counts: darkroom_store::RefCounts =
            txn.get_or_default(darkroom_store::REFCOUNT_RECORD)?;
        let fileset: FileSet = txn.get_or_default(&fileset_name)?;
        for file in fileset.files.values() {
            counts.apply(&file.store_file, -1);
            counts.apply(&file.store_thumb, -1);
        }

        manifest.deletes.push(album_delete_event(album_id, now));
        txn.set(&manifest_name, &manifest)?;
        txn.stage_delete(&fileset_name)?;

        for &member in &members {
            let member_name = manifest_file(UserId::new(member));
            let mut member_manifest: AlbumManifest = txn.get_or_default(&member_name)?;
            member_manifest.remote_albums.remove(album_id.as_str());
            member_manifest
                .deletes
                .push(album_delete_event(album_id, now));
            txn.set(&member_name, &member_manifest)?;
        }

        let zeroed = counts.take_zeroed();
        txn.set(darkroom_store::REFCOUNT_RECORD, &counts)?;
        txn.commit()?;
        for blob in zeroed {
            self.blobs().remove(&blob)?;
        }
        Ok(())
    }

    /// Change the album cover selector. Owner only.
    pub fn change_album_cover(
        &self,
        user_id: UserId,
        album_id: &AlbumId,
        cover: &str,
    ) -> Result<()> {
        self.edit_owned_album(user_id, album_id, |album| {
            album.cover = cover.to_string();
            Ok(())
        })
    }

    /// Replace the album metadata (the client-encrypted name). Owner only.
    pub fn rename_album(&self, user_id: UserId, album_id: &AlbumId, metadata: &str) -> Result<()> {
        self.edit_owned_album(user_id, album_id, |album| {
            album.metadata = metadata.to_string();
            Ok(())
        })
    }

    /// Replace the permission bitmask. Owner only.
    pub fn edit_perms(
        &self,
        user_id: UserId,
        album_id: &AlbumId,
        permissions: Permissions,
    ) -> Result<()> {
        if !permissions.is_valid() {
            return Err(DbError::BadInput("malformed permissions".into()));
        }
        self.edit_owned_album(user_id, album_id, |album| {
            album.permissions = permissions;
            Ok(())
        })
    }

    fn edit_owned_album<F>(&self, user_id: UserId, album_id: &AlbumId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Album) -> Result<()>,
    {
        let manifest_name = manifest_file(user_id);
        let mut txn = self.store().open_for_update(&manifest_name)?;
        let mut manifest: AlbumManifest = txn.get_or_default(&manifest_name)?;
        let album = match manifest.albums.get_mut(album_id.as_str()) {
            Some(album) => album,
            None => return Err(self.album_not_found(&manifest, album_id)),
        };
        edit(album)?;
        album.date_modified = self.now_ms();
        txn.set(&manifest_name, &manifest)?;
        txn.commit()?;
        Ok(())
    }

    fn album_not_found(&self, manifest: &AlbumManifest, album_id: &AlbumId) -> DbError {
        if manifest.remote_albums.contains_key(album_id.as_str()) {
            DbError::Forbidden("only the album owner can do this".into())
        } else {
            DbError::NotFound(format!("no album {album_id}"))
        }
    }

    /// Share an album, or extend an existing share with more members.
    ///
    /// The owner may always share; a member may re-share only when the
    /// album's `allow_share` bit is set, and a re-share never alters the
    /// permission field. Each new member's manifest gains the album (with
    /// the member-supplied sharing key as their `enc_private_key`), and
    /// everyone involved becomes mutual contacts.
    pub fn share_album(
        &self,
        caller_id: UserId,
        album_id: &AlbumId,
        members: &[UserId],
        sharing_keys: &BTreeMap<i64, String>,
        permissions: Option<Permissions>,
    ) -> Result<Album> {
        let owner_id = self.resolve_owner(caller_id, album_id)?;

        // Who ends up in the member set determines the records we lock:
        // the owner's manifest, every new member's manifest, and the
        // contact lists of everyone involved.
        let preview: AlbumManifest = self.store().read(&manifest_file(owner_id))?;
        let album = preview
            .albums
            .get(album_id.as_str())
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))?;

        let mut proposed: BTreeSet<i64> = members.iter().map(|m| m.as_i64()).collect();
        proposed.insert(owner_id.as_i64());
        let new_members: BTreeSet<i64> = proposed
            .iter()
            .copied()
            .filter(|m| *m != owner_id.as_i64() && !album.members.contains(m))
            .collect();
        if new_members.is_empty() && album.is_shared {
            return Err(DbError::BadInput("nothing to share".into()));
        }

        let mut participants: BTreeSet<i64> = album.members.clone();
        participants.extend(new_members.iter().copied());
        participants.insert(owner_id.as_i64());

        let mut names = vec![manifest_file(owner_id)];
        for &member in &new_members {
            names.push(manifest_file(UserId::new(member)));
        }
        for &id in &participants {
            names.push(crate::contacts_file(UserId::new(id)));
        }
        let mut txn = self.store().open_many_for_update(&names)?;

        let manifest_name = manifest_file(owner_id);
        let mut manifest: AlbumManifest = txn.get_or_default(&manifest_name)?;
        let album = manifest
            .albums
            .get_mut(album_id.as_str())
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))?;

        if caller_id != owner_id {
            if !album.members.contains(&caller_id.as_i64()) {
                return Err(DbError::Forbidden("not a member of this album".into()));
            }
            if !album.permissions.allow_share() {
                return Err(DbError::Forbidden("sharing is not allowed".into()));
            }
        }

        let now = self.now_ms();
        album.is_shared = true;
        album.members.insert(owner_id.as_i64());
        for &member in &new_members {
            let key = sharing_keys.get(&member).ok_or_else(|| {
                DbError::BadInput(format!("missing sharing key for member {member}"))
            })?;
            album.members.insert(member);
            album.sharing_keys.insert(member, key.clone());
        }
        if caller_id == owner_id {
            if let Some(perms) = permissions {
                if !perms.is_valid() {
                    return Err(DbError::BadInput("malformed permissions".into()));
                }
                album.permissions = perms;
            }
        }
        album.date_modified = now;
        let shared = album.clone();
        txn.set(&manifest_name, &manifest)?;

        for &member in &new_members {
            let member_name = manifest_file(UserId::new(member));
            let mut member_manifest: AlbumManifest = txn.get_or_default(&member_name)?;
            member_manifest.remote_albums.insert(
                album_id.as_str().to_string(),
                AlbumRef {
                    album_id: album_id.clone(),
                    owner_id,
                    enc_private_key: shared.sharing_keys[&member].clone(),
                },
            );
            txn.set(&member_name, &member_manifest)?;
        }

        self.add_cross_contacts(&mut txn, &participants)?;
        txn.commit()?;
        Ok(shared)
    }

    /// Revert an album to unshared. Owner only.
    ///
    /// Every former member's manifest loses its handle and gains an album
    /// gravestone; the owner's copy keeps its permission string but clears
    /// members and sharing keys.
    pub fn unshare_album(&self, user_id: UserId, album_id: &AlbumId) -> Result<()> {
        let manifest_name = manifest_file(user_id);
        // The notification loop walks the previewed member set the lock
        // list was built from, never the post-lock one, so it only
        // touches manifests it actually locked.
        let preview: AlbumManifest = self.store().read(&manifest_name)?;
        let former: Vec<i64> = preview
            .albums
            .get(album_id.as_str())
            .ok_or_else(|| self.album_not_found(&preview, album_id))?
            .members
            .iter()
            .copied()
            .filter(|&m| m != user_id.as_i64())
            .collect();

        let mut names = vec![manifest_name.clone()];
        for &member in &former {
            names.push(manifest_file(UserId::new(member)));
        }
        let mut txn = self.store().open_many_for_update(&names)?;

        let mut manifest: AlbumManifest = txn.get_or_default(&manifest_name)?;
        let album = manifest
            .albums
            .get_mut(album_id.as_str())
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))?;
        let now = self.now_ms();
        album.is_shared = false;
        album.members.clear();
        album.sharing_keys.clear();
        album.date_modified = now;
        txn.set(&manifest_name, &manifest)?;

        for member in former {
            let member_name = manifest_file(UserId::new(member));
            let mut member_manifest: AlbumManifest = txn.get_or_default(&member_name)?;
            member_manifest.remote_albums.remove(album_id.as_str());
            member_manifest
                .deletes
                .push(album_delete_event(album_id, now));
            txn.set(&member_name, &member_manifest)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// A member detaches themselves from a shared album.
    pub fn leave_album(&self, user_id: UserId, album_id: &AlbumId) -> Result<()> {
        let my_manifest: AlbumManifest = self.store().read(&manifest_file(user_id))?;
        let album_ref = my_manifest
            .remote_albums
            .get(album_id.as_str())
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))?;
        self.detach_member(album_ref.owner_id, album_id, user_id)
    }

    /// The owner removes a member from a shared album.
    pub fn remove_album_member(
        &self,
        user_id: UserId,
        album_id: &AlbumId,
        member_id: UserId,
    ) -> Result<()> {
        if member_id == user_id {
            return Err(DbError::BadInput(
                "the owner cannot be removed; delete or unshare instead".into(),
            ));
        }
        let manifest: AlbumManifest = self.store().read(&manifest_file(user_id))?;
        if !manifest.albums.contains_key(album_id.as_str()) {
            return Err(self.album_not_found(&manifest, album_id));
        }
        self.detach_member(user_id, album_id, member_id)
    }

    fn detach_member(
        &self,
        owner_id: UserId,
        album_id: &AlbumId,
        member_id: UserId,
    ) -> Result<()> {
        let owner_name = manifest_file(owner_id);
        let member_name = manifest_file(member_id);
        let names = vec![owner_name.clone(), member_name.clone()];
        let mut txn = self.store().open_many_for_update(&names)?;

        let mut owner_manifest: AlbumManifest = txn.get_or_default(&owner_name)?;
        let album = owner_manifest
            .albums
            .get_mut(album_id.as_str())
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))?;
        let now = self.now_ms();
        album.members.remove(&member_id.as_i64());
        album.sharing_keys.remove(&member_id.as_i64());
        album.date_modified = now;
        txn.set(&owner_name, &owner_manifest)?;

        let mut member_manifest: AlbumManifest = txn.get_or_default(&member_name)?;
        member_manifest.remote_albums.remove(album_id.as_str());
        member_manifest
            .deletes
            .push(album_delete_event(album_id, now));
        txn.set(&member_name, &member_manifest)?;

        txn.commit()?;
        Ok(())
    }

    /// Every album visible to `user_id`, mapped to its owner.
    pub fn album_refs(&self, user_id: UserId) -> Result<Vec<(AlbumId, UserId)>> {
        let manifest: AlbumManifest = match self.store().read(&manifest_file(user_id)) {
            Ok(m) => m,
            Err(darkroom_store::StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out: Vec<(AlbumId, UserId)> = manifest
            .albums
            .values()
            .map(|a| (a.album_id.clone(), a.owner_id))
            .collect();
        out.extend(
            manifest
                .remote_albums
                .values()
                .map(|r| (r.album_id.clone(), r.owner_id)),
        );
        Ok(out)
    }

    /// Load an album visible to `user_id`, whether owned or shared.
    pub fn album(&self, user_id: UserId, album_id: &AlbumId) -> Result<Album> {
        let manifest: AlbumManifest = self.store().read(&manifest_file(user_id))?;
        if let Some(album) = manifest.albums.get(album_id.as_str()) {
            return Ok(album.clone());
        }
        let album_ref = manifest
            .remote_albums
            .get(album_id.as_str())
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))?;
        let owner_manifest: AlbumManifest =
            self.store().read(&manifest_file(album_ref.owner_id))?;
        owner_manifest
            .albums
            .get(album_id.as_str())
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))
    }

    /// Resolve which user's manifest holds the album record.
    pub(crate) fn resolve_owner(&self, user_id: UserId, album_id: &AlbumId) -> Result<UserId> {
        let manifest: AlbumManifest = self.store().read(&manifest_file(user_id))?;
        if manifest.albums.contains_key(album_id.as_str()) {
            return Ok(user_id);
        }
        manifest
            .remote_albums
            .get(album_id.as_str())
            .map(|r| r.owner_id)
            .ok_or_else(|| DbError::NotFound(format!("no album {album_id}")))
    }
}

fn album_delete_event(album_id: &AlbumId, now: i64) -> DeleteEvent {
    DeleteEvent {
        file: String::new(),
        album_id: album_id.clone(),
        date: now,
        kind: DeleteEventKind::Album,
    }
}
