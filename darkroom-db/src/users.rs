//! User accounts, the user directory, and contact lists.

use base64::{engine::general_purpose::STANDARD, Engine};
use darkroom_types::{number, ContactPart, DeleteEvent, DeleteEventKind, UserId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    contacts_file, gallery_file, home_dir, manifest_file, trash_file, user_file, AlbumManifest,
    Db, DbError, FileSet, Result, USER_LIST,
};

/// One row of the encrypted user directory (`users.dat`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// The user's id.
    pub user_id: UserId,
    /// The user's unique email.
    pub email: String,
}

/// Everything the server persists about one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The unique user id.
    pub user_id: UserId,
    /// The unique email address.
    pub email: String,
    /// Hash of the user's password (opaque, client-defined scheme).
    pub hashed_password: String,
    /// Salt the client used for the password hash.
    pub salt: String,
    /// Client-visible home-folder token (keyed hash of the email).
    pub home_folder: String,
    /// The user's key bundle: public key and, when backed up, the
    /// encrypted secret key. Opaque client material.
    pub key_bundle: String,
    /// `"1"` when the key bundle carries the encrypted secret key.
    /// Client-owned; preserved verbatim on update.
    pub is_backup: String,
    /// The public half of the user's long-term key, standard base64.
    pub public_key: String,
    /// The server's per-user secret key, wrapped by the master key
    /// (base64 of a 96-byte encrypted key).
    pub server_key: String,
    /// The per-user session-token key, wrapped by the master key
    /// (base64 of a 96-byte encrypted key).
    pub token_key: String,
    /// Hashes of the session tokens currently considered valid.
    #[serde(default)]
    pub valid_tokens: BTreeSet<String>,
}

/// One entry of a user's contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// The contact's user id.
    pub user_id: UserId,
    /// The contact's email.
    pub email: String,
    /// The contact's long-term public key, standard base64.
    pub public_key: String,
    /// Last time the contact was used for sharing, ms. Zero when unknown.
    #[serde(default)]
    pub date_used: i64,
    /// When the contact was added or modified, ms.
    pub date_modified: i64,
}

impl Contact {
    /// The wire shape for the `contacts` stream.
    pub fn to_part(&self) -> ContactPart {
        ContactPart {
            user_id: self.user_id.to_string(),
            email: self.email.clone(),
            public_key: self.public_key.clone(),
            date_modified: number(self.date_modified),
        }
    }
}

/// A user's contact state (`contact-list.dat`).
///
/// Invariant: `a.contacts` contains `b` exactly when `b.ins` contains `a`;
/// both sides are always created and removed in one transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactList {
    /// The user's contacts, keyed by user id.
    #[serde(default)]
    pub contacts: BTreeMap<i64, Contact>,
    /// Users who hold *this* user in their contact list.
    #[serde(default, rename = "in")]
    pub ins: BTreeSet<i64>,
    /// Contact gravestones for sync.
    #[serde(default)]
    pub deletes: Vec<DeleteEvent>,
}

/// Parameters for registering a user.
#[derive(Debug, Clone)]
pub struct AddUserParams {
    /// Unique email address.
    pub email: String,
    /// Hash of the password, client-defined scheme.
    pub hashed_password: String,
    /// Salt for the password hash.
    pub salt: String,
    /// Opaque key bundle.
    pub key_bundle: String,
    /// `"1"` when the bundle carries the encrypted secret key.
    pub is_backup: String,
    /// The user's long-term public key, standard base64.
    pub public_key: String,
}

impl Db {
    /// Register a new account.
    ///
    /// The user id is sampled inside the user-directory transaction so two
    /// concurrent registrations can neither collide on the id nor race on
    /// the email uniqueness check. Registration also provisions the
    /// per-user server and token keys (stored wrapped) and the four empty
    /// home records.
    pub fn add_user(&self, params: AddUserParams) -> Result<User> {
        if params.email.is_empty() {
            return Err(DbError::BadInput("email is required".into()));
        }

        let mut txn = self.store().open_for_update(USER_LIST)?;
        let mut list: Vec<UserEntry> = txn.get_or_default(USER_LIST)?;
        if list.iter().any(|e| e.email == params.email) {
            return Err(DbError::Conflict("email is already registered".into()));
        }

        let taken: BTreeSet<i64> = list.iter().map(|e| e.user_id.as_i64()).collect();
        let mut rng = rand::thread_rng();
        let user_id = loop {
            let id = rng.gen_range(darkroom_types::MIN_USER_ID..i64::from(i32::MAX));
            if !taken.contains(&id) {
                break UserId::new(id);
            }
        };

        let user = User {
            user_id,
            email: params.email.clone(),
            hashed_password: params.hashed_password,
            salt: params.salt,
            home_folder: hex::encode(self.master_key().hash(params.email.as_bytes())),
            key_bundle: params.key_bundle,
            is_backup: params.is_backup,
            public_key: params.public_key,
            server_key: STANDARD.encode(self.master_key().new_encrypted_key()?),
            token_key: STANDARD.encode(self.master_key().new_encrypted_key()?),
            valid_tokens: BTreeSet::new(),
        };

        self.store().create_empty(&user_file(user_id), &user)?;
        self.store()
            .create_empty(&gallery_file(user_id), &FileSet::default())?;
        self.store()
            .create_empty(&trash_file(user_id), &FileSet::default())?;
        self.store()
            .create_empty(&manifest_file(user_id), &AlbumManifest::default())?;
        self.store()
            .create_empty(&contacts_file(user_id), &ContactList::default())?;

        list.push(UserEntry {
            user_id,
            email: user.email.clone(),
        });
        txn.set(USER_LIST, &list)?;
        txn.commit()?;

        tracing::info!("registered user {} ({})", user_id, user.email);
        Ok(user)
    }

    /// Replace a user record. `is_backup` and the key bundle are
    /// client-owned and stored verbatim.
    pub fn update_user(&self, user: &User) -> Result<()> {
        let name = user_file(user.user_id);
        let mut txn = self.store().open_for_update(&name)?;
        // Refuse to resurrect a deleted account.
        let _: User = txn.get(&name)?;
        txn.set(&name, user)?;
        txn.commit()?;
        Ok(())
    }

    /// Look up a user by id.
    pub fn user_by_id(&self, id: UserId) -> Result<User> {
        self.store()
            .read(&user_file(id))
            .map_err(|e| match e {
                darkroom_store::StoreError::NotFound { .. } => {
                    DbError::NotFound(format!("no user {id}"))
                }
                e => e.into(),
            })
    }

    /// Look up a user by email.
    pub fn user_by_email(&self, email: &str) -> Result<User> {
        let list: Vec<UserEntry> = match self.store().read(USER_LIST) {
            Ok(list) => list,
            Err(darkroom_store::StoreError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let entry = list
            .iter()
            .find(|e| e.email == email)
            .ok_or_else(|| DbError::NotFound(format!("no user for {email}")))?;
        self.user_by_id(entry.user_id)
    }

    /// Change a user's email address, keeping the directory consistent.
    pub fn change_email(&self, user_id: UserId, new_email: &str) -> Result<User> {
        if new_email.is_empty() {
            return Err(DbError::BadInput("email is required".into()));
        }
        let names = vec![USER_LIST.to_string(), user_file(user_id)];
        let mut txn = self.store().open_many_for_update(&names)?;
        let mut list: Vec<UserEntry> = txn.get_or_default(USER_LIST)?;
        if list
            .iter()
            .any(|e| e.email == new_email && e.user_id != user_id)
        {
            return Err(DbError::Conflict("email is already registered".into()));
        }
        let mut user: User = txn.get(&user_file(user_id))?;
        for entry in &mut list {
            if entry.user_id == user_id {
                entry.email = new_email.to_string();
            }
        }
        user.email = new_email.to_string();
        user.home_folder = hex::encode(self.master_key().hash(new_email.as_bytes()));
        txn.set(USER_LIST, &list)?;
        txn.set(&user_file(user_id), &user)?;
        txn.commit()?;
        Ok(user)
    }

    /// Delete an account and everything attached to it.
    ///
    /// Cascades: drops the directory entry, severs every contact edge
    /// (with gravestones on both sides), deletes owned albums (emitting
    /// gravestones to members), leaves joined albums, releases every blob
    /// referenced from Gallery and Trash, then removes the home records.
    pub fn delete_user(&self, user: &User) -> Result<()> {
        let user_id = user.user_id;
        {
            let mut txn = self.store().open_for_update(USER_LIST)?;
            let mut list: Vec<UserEntry> = txn.get_or_default(USER_LIST)?;
            list.retain(|e| e.user_id != user_id);
            txn.set(USER_LIST, &list)?;
            txn.commit()?;
        }

        self.remove_all_contacts(user)?;

        for (album_id, owner) in self.album_refs(user_id)? {
            if owner == user_id {
                self.delete_album(user_id, &album_id)?;
            } else {
                self.leave_album(user_id, &album_id)?;
            }
        }

        self.release_home_filesets(user_id)?;

        for name in [
            user_file(user_id),
            gallery_file(user_id),
            trash_file(user_id),
            manifest_file(user_id),
            contacts_file(user_id),
        ] {
            match self.store().remove_record(&name) {
                Ok(()) | Err(darkroom_store::StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.store().remove_dir(&home_dir(user_id))?;
        tracing::info!("deleted user {}", user_id);
        Ok(())
    }

    fn release_home_filesets(&self, user_id: UserId) -> Result<()> {
        let names = vec![
            gallery_file(user_id),
            trash_file(user_id),
            darkroom_store::REFCOUNT_RECORD.to_string(),
        ];
        let mut txn = self.store().open_many_for_update(&names)?;
        let mut counts: darkroom_store::RefCounts =
            txn.get_or_default(darkroom_store::REFCOUNT_RECORD)?;
        for name in [gallery_file(user_id), trash_file(user_id)] {
            let set: FileSet = txn.get_or_default(&name)?;
            for file in set.files.values() {
                counts.apply(&file.store_file, -1);
                counts.apply(&file.store_thumb, -1);
            }
        }
        let zeroed = counts.take_zeroed();
        txn.set(darkroom_store::REFCOUNT_RECORD, &counts)?;
        txn.commit()?;
        for blob in zeroed {
            self.blobs().remove(&blob)?;
        }
        Ok(())
    }

    /// Add the user with `contact_email` to `user`'s contact list,
    /// inserting the back-edge on the contact's side in the same
    /// transaction.
    pub fn add_contact(&self, user: &User, contact_email: &str) -> Result<Contact> {
        let peer = self.user_by_email(contact_email)?;
        if peer.user_id == user.user_id {
            return Err(DbError::BadInput("cannot add yourself as a contact".into()));
        }
        let now = self.now_ms();

        let names = vec![contacts_file(user.user_id), contacts_file(peer.user_id)];
        let mut txn = self.store().open_many_for_update(&names)?;
        let mut mine: ContactList = txn.get_or_default(&contacts_file(user.user_id))?;
        let mut theirs: ContactList = txn.get_or_default(&contacts_file(peer.user_id))?;

        let contact = Contact {
            user_id: peer.user_id,
            email: peer.email.clone(),
            public_key: peer.public_key.clone(),
            date_used: 0,
            date_modified: now,
        };
        mine.contacts.insert(peer.user_id.as_i64(), contact.clone());
        theirs.ins.insert(user.user_id.as_i64());

        txn.set(&contacts_file(user.user_id), &mine)?;
        txn.set(&contacts_file(peer.user_id), &theirs)?;
        txn.commit()?;
        Ok(contact)
    }

    /// Sever every contact edge touching `user`, in one transaction over
    /// the user's list and every counterparty's list. Both sides receive
    /// a contact gravestone.
    pub fn remove_all_contacts(&self, user: &User) -> Result<()> {
        let user_id = user.user_id;
        let mine: ContactList = match self.store().read(&contacts_file(user_id)) {
            Ok(cl) => cl,
            Err(darkroom_store::StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut peers: BTreeSet<i64> = mine.contacts.keys().copied().collect();
        peers.extend(mine.ins.iter().copied());
        peers.remove(&user_id.as_i64());

        let mut names: Vec<String> = peers
            .iter()
            .map(|&id| contacts_file(UserId::new(id)))
            .collect();
        names.push(contacts_file(user_id));
        let mut txn = self.store().open_many_for_update(&names)?;

        let now = self.now_ms();
        let mut mine: ContactList = txn.get_or_default(&contacts_file(user_id))?;
        for &peer_id in &peers {
            let peer_name = contacts_file(UserId::new(peer_id));
            let mut peer: ContactList = txn.get_or_default(&peer_name)?;
            peer.contacts.remove(&user_id.as_i64());
            peer.ins.remove(&user_id.as_i64());
            peer.deletes.push(contact_delete_event(user_id, now));
            txn.set(&peer_name, &peer)?;

            mine.contacts.remove(&peer_id);
            mine.ins.remove(&peer_id);
            mine.deletes
                .push(contact_delete_event(UserId::new(peer_id), now));
        }
        txn.set(&contacts_file(user_id), &mine)?;
        txn.commit()?;
        Ok(())
    }

    /// Changes to `user`'s contact list newer than `since`, in wire shape,
    /// ordered by modification time then email.
    pub fn contact_updates(&self, user_id: UserId, since: i64) -> Result<Vec<ContactPart>> {
        let list: ContactList = self.store().read(&contacts_file(user_id))?;
        let mut fresh: Vec<&Contact> = list
            .contacts
            .values()
            .filter(|c| c.date_modified > since)
            .collect();
        fresh.sort_by(|a, b| {
            (a.date_modified, &a.email).cmp(&(b.date_modified, &b.email))
        });
        Ok(fresh.into_iter().map(Contact::to_part).collect())
    }

    /// Make every user in `ids` a contact of every other, skipping pairs
    /// that already know each other. Used when an album is shared.
    pub(crate) fn add_cross_contacts(
        &self,
        txn: &mut darkroom_store::Transaction<'_>,
        ids: &BTreeSet<i64>,
    ) -> Result<()> {
        let now = self.now_ms();
        let mut users: BTreeMap<i64, User> = BTreeMap::new();
        for &id in ids {
            users.insert(id, self.user_by_id(UserId::new(id))?);
        }
        for &a in ids {
            let name = contacts_file(UserId::new(a));
            let mut list: ContactList = txn.get_or_default(&name)?;
            let mut changed = false;
            for &b in ids {
                if a == b {
                    continue;
                }
                if !list.contacts.contains_key(&b) {
                    let peer = &users[&b];
                    list.contacts.insert(
                        b,
                        Contact {
                            user_id: peer.user_id,
                            email: peer.email.clone(),
                            public_key: peer.public_key.clone(),
                            date_used: 0,
                            date_modified: now,
                        },
                    );
                    changed = true;
                }
                if list.ins.insert(b) {
                    changed = true;
                }
            }
            if changed {
                txn.set(&name, &list)?;
            }
        }
        Ok(())
    }
}

fn contact_delete_event(gone: UserId, now: i64) -> DeleteEvent {
    DeleteEvent {
        file: gone.to_string(),
        album_id: Default::default(),
        date: now,
        kind: DeleteEventKind::Contact,
    }
}
