//! Shared helpers for the darkroom-db integration suites.

// Not every suite uses every helper.
#![allow(dead_code)]

use darkroom_crypto::MasterKey;
use darkroom_db::{AddUserParams, Db, FileSpec, User};
use darkroom_types::AlbumId;
use tempfile::TempDir;

/// A database on a throwaway root. The directory lives as long as the
/// handle.
pub struct TestDb {
    pub db: Db,
    pub dir: TempDir,
}

pub fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db = Db::open(dir.path(), MasterKey::create().expect("create master key"))
        .expect("open db");
    TestDb { db, dir }
}

pub fn register(db: &Db, email: &str) -> User {
    db.add_user(AddUserParams {
        email: email.to_string(),
        hashed_password: format!("{email}-hashed"),
        salt: format!("{email}-salt"),
        key_bundle: format!("{email}-bundle"),
        is_backup: "0".to_string(),
        public_key: format!("{email}-pk"),
    })
    .expect("register user")
}

/// Stage two distinct blobs on disk and add the file to a set.
pub fn upload(
    t: &TestDb,
    user: &User,
    filename: &str,
    set: &str,
    album_id: &AlbumId,
) -> Result<(), darkroom_db::DbError> {
    let staged_file = t.dir.path().join(format!("upload-{filename}"));
    let staged_thumb = t.dir.path().join(format!("upload-thumb-{filename}"));
    std::fs::write(&staged_file, format!("content of {filename}")).unwrap();
    std::fs::write(&staged_thumb, format!("thumb of {filename}")).unwrap();
    t.db.add_file(
        user.user_id,
        FileSpec {
            headers: format!("{filename}-headers"),
            version: "1".to_string(),
            date_created: 1,
            date_modified: 2,
            store_file: staged_file,
            store_thumb: staged_thumb,
        },
        filename,
        set,
        album_id,
    )
}

pub fn set_len(t: &TestDb, user: &User, set: &str, album_id: &AlbumId) -> usize {
    t.db.file_set(user.user_id, set, album_id)
        .expect("load file set")
        .files
        .len()
}
