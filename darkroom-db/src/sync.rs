//! The sync delta engine: "everything that changed since these cursors".

use darkroom_types::{
    number, AlbumId, AlbumPart, ContactPart, DeletePart, FilePart, Response, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    contacts_file, gallery_file, manifest_file, trash_file, Album, AlbumManifest, Contact,
    ContactList, Db, FileSet, FsFile, Result,
};

/// The six per-stream cursors a client supplies, each the largest
/// modification timestamp it has already seen on that stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSet {
    /// Cursor for the `albums` stream.
    pub albums: i64,
    /// Cursor for the Gallery `files` stream.
    pub files: i64,
    /// Cursor for the `trash` stream.
    pub trash: i64,
    /// Cursor for the `albumFiles` stream.
    pub album_files: i64,
    /// Cursor for the `contacts` stream.
    pub contacts: i64,
    /// Cursor for the `deletes` stream.
    pub deletes: i64,
}

/// Everything newer than the supplied cursors, in wire shape.
#[derive(Debug, Clone, Default)]
pub struct Updates {
    /// Albums visible to the user, owner's and shared.
    pub albums: Vec<AlbumPart>,
    /// Gallery files.
    pub files: Vec<FilePart>,
    /// Trash files.
    pub trash: Vec<FilePart>,
    /// Files inside visible albums.
    pub album_files: Vec<FilePart>,
    /// Contact list entries.
    pub contacts: Vec<ContactPart>,
    /// Gravestones across every stream.
    pub deletes: Vec<DeletePart>,
}

impl Updates {
    /// Assemble the wire envelope. Streams with nothing new are omitted,
    /// matching what the external client expects.
    pub fn to_response(&self) -> Response {
        let mut r = Response::ok();
        if !self.albums.is_empty() {
            r = r.with_part_list("albums", &self.albums);
        }
        if !self.files.is_empty() {
            r = r.with_part_list("files", &self.files);
        }
        if !self.trash.is_empty() {
            r = r.with_part_list("trash", &self.trash);
        }
        if !self.album_files.is_empty() {
            r = r.with_part_list("albumFiles", &self.album_files);
        }
        if !self.contacts.is_empty() {
            r = r.with_part_list("contacts", &self.contacts);
        }
        if !self.deletes.is_empty() {
            r = r.with_part_list("deletes", &self.deletes);
        }
        r
    }
}

fn file_part(file: &FsFile) -> FilePart {
    FilePart {
        file: file.file.clone(),
        version: file.version.clone(),
        headers: file.headers.clone(),
        date_created: number(file.date_created),
        date_modified: number(file.date_modified),
        album_id: file.album_id.to_string(),
    }
}

fn album_part(album: &Album, viewer: UserId, enc_private_key: &str) -> AlbumPart {
    AlbumPart {
        album_id: album.album_id.to_string(),
        date_created: number(album.date_created),
        date_modified: number(album.date_modified),
        enc_private_key: enc_private_key.to_string(),
        public_key: album.public_key.clone(),
        metadata: album.metadata.clone(),
        is_owner: flag(album.owner_id == viewer),
        is_shared: flag(album.is_shared),
        is_hidden: flag(album.is_hidden),
        is_locked: flag(album.is_locked),
        permissions: album.permissions.as_str().to_string(),
        members: album.members_string(),
        cover: album.cover.clone(),
    }
}

fn flag(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

impl Db {
    /// Compute the client's view of everything changed since `cursors`.
    ///
    /// All source records are read up front, so the result is a consistent
    /// snapshot: concurrent commits are either entirely visible or
    /// entirely absent. Each stream is ordered by modification time
    /// ascending with a stable secondary key, so a client can resume from
    /// the largest timestamp it received.
    pub fn get_updates(&self, user_id: UserId, cursors: CursorSet) -> Result<Updates> {
        // Snapshot.
        let gallery: FileSet = self.store().read(&gallery_file(user_id))?;
        let trash: FileSet = self.store().read(&trash_file(user_id))?;
        let manifest: AlbumManifest = self.store().read(&manifest_file(user_id))?;
        let contact_list: ContactList = self.store().read(&contacts_file(user_id))?;

        // Owner manifests backing the albums shared with this user.
        let mut owner_manifests: BTreeMap<i64, AlbumManifest> = BTreeMap::new();
        for album_ref in manifest.remote_albums.values() {
            let owner = album_ref.owner_id.as_i64();
            if !owner_manifests.contains_key(&owner) {
                // An owner mid-deletion reads as empty; the member's
                // gravestone is already in flight.
                let loaded = match self.store().read(&manifest_file(album_ref.owner_id)) {
                    Ok(m) => m,
                    Err(darkroom_store::StoreError::NotFound { .. }) => AlbumManifest::default(),
                    Err(e) => return Err(e.into()),
                };
                owner_manifests.insert(owner, loaded);
            }
        }

        let mut updates = Updates::default();

        // Albums stream: own albums plus projections of shared ones.
        let mut albums: Vec<AlbumPart> = Vec::new();
        for album in manifest.albums.values() {
            if album.date_modified > cursors.albums {
                albums.push(album_part(album, user_id, &album.enc_private_key));
            }
        }
        for album_ref in manifest.remote_albums.values() {
            let Some(album) = owner_manifests[&album_ref.owner_id.as_i64()]
                .albums
                .get(album_ref.album_id.as_str())
            else {
                // The owner side is being torn down; the gravestone for
                // this member is already in flight.
                continue;
            };
            if album.date_modified > cursors.albums {
                albums.push(album_part(album, user_id, &album_ref.enc_private_key));
            }
        }
        albums.sort_by(|a, b| {
            (parse_ms(&a.date_modified), &a.album_id).cmp(&(parse_ms(&b.date_modified), &b.album_id))
        });
        updates.albums = albums;

        // Gallery and Trash file streams.
        updates.files = fresh_files(&gallery, cursors.files);
        updates.trash = fresh_files(&trash, cursors.trash);

        // Files of every visible album, and their gravestones.
        let mut album_files: Vec<FilePart> = Vec::new();
        let mut deletes: Vec<&darkroom_types::DeleteEvent> = Vec::new();
        let mut visible_album_sets: Vec<FileSet> = Vec::new();
        let mut visible: Vec<(AlbumId, UserId)> = manifest
            .albums
            .values()
            .map(|a| (a.album_id.clone(), a.owner_id))
            .collect();
        visible.extend(
            manifest
                .remote_albums
                .values()
                .map(|r| (r.album_id.clone(), r.owner_id)),
        );
        for (album_id, owner) in &visible {
            let name = crate::album_file(*owner, album_id);
            match self.store().read::<FileSet>(&name) {
                Ok(set) => visible_album_sets.push(set),
                Err(darkroom_store::StoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        for set in &visible_album_sets {
            for file in set.files.values() {
                if file.date_modified > cursors.album_files {
                    album_files.push(file_part(file));
                }
            }
        }
        album_files.sort_by(|a, b| {
            (parse_ms(&a.date_modified), &a.file, &a.album_id)
                .cmp(&(parse_ms(&b.date_modified), &b.file, &b.album_id))
        });
        updates.album_files = album_files;

        // Contacts stream.
        let mut fresh_contacts: Vec<&Contact> = contact_list
            .contacts
            .values()
            .filter(|c| c.date_modified > cursors.contacts)
            .collect();
        fresh_contacts
            .sort_by(|a, b| (a.date_modified, &a.email).cmp(&(b.date_modified, &b.email)));
        updates.contacts = fresh_contacts.into_iter().map(Contact::to_part).collect();

        // Deletes stream: gravestones from every source the user sees.
        for event in gallery
            .deletes
            .iter()
            .chain(trash.deletes.iter())
            .chain(manifest.deletes.iter())
            .chain(contact_list.deletes.iter())
            .chain(visible_album_sets.iter().flat_map(|s| s.deletes.iter()))
        {
            if event.date > cursors.deletes {
                deletes.push(event);
            }
        }
        let mut delete_parts: Vec<DeletePart> =
            deletes.into_iter().map(|e| e.to_part()).collect();
        delete_parts.sort_by(|a, b| {
            (parse_ms(&a.date), &a.file, &a.album_id).cmp(&(parse_ms(&b.date), &b.file, &b.album_id))
        });
        updates.deletes = delete_parts;

        Ok(updates)
    }
}

fn fresh_files(set: &FileSet, cursor: i64) -> Vec<FilePart> {
    let mut fresh: Vec<&FsFile> = set
        .files
        .values()
        .filter(|f| f.date_modified > cursor)
        .collect();
    fresh.sort_by(|a, b| (a.date_modified, &a.file).cmp(&(b.date_modified, &b.file)));
    fresh.into_iter().map(file_part).collect()
}

fn parse_ms(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}
