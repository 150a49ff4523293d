//! File sets: upload, move, trash, permanent deletion, refcounts.

mod common;

use common::{register, set_len, test_db, upload};
use darkroom_db::{AddAlbumParams, DbError, FileSet, MoveFileParams};
use darkroom_store::{RefCounts, REFCOUNT_RECORD};
use darkroom_types::{AlbumId, Permissions, ALBUM_SET, GALLERY_SET, TRASH_SET};
use std::collections::BTreeMap;

const NO_ALBUM: &str = "";

fn gallery() -> AlbumId {
    AlbumId::new(NO_ALBUM)
}

fn move_params(set_from: &str, set_to: &str, filenames: &[&str], moving: bool) -> MoveFileParams {
    MoveFileParams {
        set_from: set_from.to_string(),
        set_to: set_to.to_string(),
        album_id_from: AlbumId::new(NO_ALBUM),
        album_id_to: AlbumId::new(NO_ALBUM),
        is_moving: moving,
        filenames: filenames.iter().map(|f| f.to_string()).collect(),
        headers: Vec::new(),
        rename: None,
    }
}

#[test]
fn gallery_to_trash_to_empty() {
    let t = test_db();
    t.db.set_time_for_testing(10_000);
    let alice = register(&t.db, "alice@example.org");

    for i in 0..10 {
        upload(&t, &alice, &format!("file{i}"), GALLERY_SET, &gallery()).unwrap();
    }
    assert_eq!(set_len(&t, &alice, GALLERY_SET, &gallery()), 10);
    assert_eq!(set_len(&t, &alice, TRASH_SET, &gallery()), 0);

    // Move 4 files from Gallery to Trash.
    t.db.move_file(
        alice.user_id,
        move_params(
            GALLERY_SET,
            TRASH_SET,
            &["file1", "file2", "file3", "file4"],
            true,
        ),
    )
    .unwrap();
    assert_eq!(set_len(&t, &alice, GALLERY_SET, &gallery()), 6);
    assert_eq!(set_len(&t, &alice, TRASH_SET, &gallery()), 4);

    // Permanently delete two of them.
    t.db.delete_files(alice.user_id, &["file1".to_string(), "file2".to_string()])
        .unwrap();
    assert_eq!(set_len(&t, &alice, GALLERY_SET, &gallery()), 6);
    assert_eq!(set_len(&t, &alice, TRASH_SET, &gallery()), 2);

    // Empty the Trash; everything created before now goes.
    let trash_before: FileSet = t
        .db
        .file_set(alice.user_id, TRASH_SET, &gallery())
        .unwrap();
    let doomed: Vec<_> = trash_before.files.values().cloned().collect();

    t.db.empty_trash(alice.user_id, 10_000).unwrap();
    assert_eq!(set_len(&t, &alice, GALLERY_SET, &gallery()), 6);
    assert_eq!(set_len(&t, &alice, TRASH_SET, &gallery()), 0);

    // The emptied files' blobs hit refcount zero and left the disk.
    let counts: RefCounts = t.db.store().read(REFCOUNT_RECORD).unwrap();
    for file in &doomed {
        assert_eq!(counts.count(&file.store_file), 0);
        assert_eq!(counts.count(&file.store_thumb), 0);
        assert!(!t.db.blobs().contains(&file.store_file));
        assert!(!t.db.blobs().contains(&file.store_thumb));
    }
    // Gallery survivors still have their blobs.
    let survivors: FileSet = t
        .db
        .file_set(alice.user_id, GALLERY_SET, &gallery())
        .unwrap();
    for file in survivors.files.values() {
        assert_eq!(counts.count(&file.store_file), 1);
        assert!(t.db.blobs().contains(&file.store_file));
    }
}

#[test]
fn upload_to_missing_album_is_not_found() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    let err = upload(
        &t,
        &alice,
        "fileX",
        ALBUM_SET,
        &AlbumId::new("NonExistentAlbum"),
    )
    .unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[test]
fn duplicate_upload_content_dedups_with_refcounts() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");

    // Stage identical content under two filenames.
    for name in ["a", "b"] {
        let staged = t.dir.path().join(format!("upload-{name}"));
        let thumb = t.dir.path().join(format!("upload-thumb-{name}"));
        std::fs::write(&staged, "same bytes").unwrap();
        std::fs::write(&thumb, format!("thumb {name}")).unwrap();
        t.db.add_file(
            alice.user_id,
            darkroom_db::FileSpec {
                headers: "h".into(),
                version: "1".into(),
                date_created: 1,
                date_modified: 2,
                store_file: staged,
                store_thumb: thumb,
            },
            name,
            GALLERY_SET,
            &gallery(),
        )
        .unwrap();
    }

    let set: FileSet = t
        .db
        .file_set(alice.user_id, GALLERY_SET, &gallery())
        .unwrap();
    let blob = &set.files["a"].store_file;
    assert_eq!(blob, &set.files["b"].store_file);
    let counts: RefCounts = t.db.store().read(REFCOUNT_RECORD).unwrap();
    assert_eq!(counts.count(blob), 2);

    // Re-uploading the same content under an existing name keeps the
    // shared blob alive and the count stable.
    let staged = t.dir.path().join("upload-a2");
    let thumb = t.dir.path().join("upload-thumb-a2");
    std::fs::write(&staged, "same bytes").unwrap();
    std::fs::write(&thumb, "thumb a").unwrap();
    t.db.add_file(
        alice.user_id,
        darkroom_db::FileSpec {
            headers: "h2".into(),
            version: "1".into(),
            date_created: 1,
            date_modified: 3,
            store_file: staged,
            store_thumb: thumb,
        },
        "a",
        GALLERY_SET,
        &gallery(),
    )
    .unwrap();
    let counts: RefCounts = t.db.store().read(REFCOUNT_RECORD).unwrap();
    assert_eq!(counts.count(blob), 2);
    assert!(t.db.blobs().contains(blob));
    // The thumbnail's count dipped to zero and back inside the
    // transaction; the blob must survive.
    let set: FileSet = t
        .db
        .file_set(alice.user_id, GALLERY_SET, &gallery())
        .unwrap();
    assert!(t.db.blobs().contains(&set.files["a"].store_thumb));
    assert_eq!(counts.count(&set.files["a"].store_thumb), 1);

    // Deleting one reference keeps the shared blob alive.
    t.db.move_file(alice.user_id, move_params(GALLERY_SET, TRASH_SET, &["a"], true))
        .unwrap();
    t.db.delete_files(alice.user_id, &["a".to_string()]).unwrap();
    let counts: RefCounts = t.db.store().read(REFCOUNT_RECORD).unwrap();
    assert_eq!(counts.count(blob), 1);
    assert!(t.db.blobs().contains(blob));
}

#[test]
fn intra_user_move_does_not_change_refcounts() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    upload(&t, &alice, "photo", GALLERY_SET, &gallery()).unwrap();

    let set: FileSet = t
        .db
        .file_set(alice.user_id, GALLERY_SET, &gallery())
        .unwrap();
    let blob = set.files["photo"].store_file.clone();

    t.db.move_file(
        alice.user_id,
        move_params(GALLERY_SET, TRASH_SET, &["photo"], true),
    )
    .unwrap();
    t.db.move_file(
        alice.user_id,
        move_params(TRASH_SET, GALLERY_SET, &["photo"], true),
    )
    .unwrap();

    let counts: RefCounts = t.db.store().read(REFCOUNT_RECORD).unwrap();
    assert_eq!(counts.count(&blob), 1);
}

#[test]
fn copy_to_album_adds_a_reference() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    t.db.add_album(
        alice.user_id,
        AddAlbumParams {
            album_id: AlbumId::new("album"),
            date_created: 1000,
            date_modified: 1000,
            enc_private_key: "k".into(),
            public_key: "p".into(),
            metadata: "m".into(),
        },
    )
    .unwrap();
    upload(&t, &alice, "photo", GALLERY_SET, &gallery()).unwrap();

    let mut params = move_params(GALLERY_SET, ALBUM_SET, &["photo"], false);
    params.album_id_to = AlbumId::new("album");
    params.headers = vec!["re-encrypted headers".to_string()];
    t.db.move_file(alice.user_id, params).unwrap();

    // Present in both places, one blob, two references.
    assert_eq!(set_len(&t, &alice, GALLERY_SET, &gallery()), 1);
    let album_set = t
        .db
        .file_set(alice.user_id, ALBUM_SET, &AlbumId::new("album"))
        .unwrap();
    assert_eq!(album_set.files.len(), 1);
    assert_eq!(album_set.files["photo"].headers, "re-encrypted headers");
    assert_eq!(album_set.files["photo"].album_id.as_str(), "album");

    let counts: RefCounts = t.db.store().read(REFCOUNT_RECORD).unwrap();
    assert_eq!(counts.count(&album_set.files["photo"].store_file), 2);
}

#[test]
fn move_rejects_same_source_and_destination() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    upload(&t, &alice, "photo", GALLERY_SET, &gallery()).unwrap();
    assert!(matches!(
        t.db.move_file(
            alice.user_id,
            move_params(GALLERY_SET, GALLERY_SET, &["photo"], true),
        ),
        Err(DbError::BadInput(_))
    ));
}

#[test]
fn trash_never_takes_part_in_a_copy() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    upload(&t, &alice, "photo", GALLERY_SET, &gallery()).unwrap();

    assert!(matches!(
        t.db.move_file(
            alice.user_id,
            move_params(GALLERY_SET, TRASH_SET, &["photo"], false),
        ),
        Err(DbError::BadInput(_))
    ));

    t.db.move_file(
        alice.user_id,
        move_params(GALLERY_SET, TRASH_SET, &["photo"], true),
    )
    .unwrap();
    assert!(matches!(
        t.db.move_file(
            alice.user_id,
            move_params(TRASH_SET, GALLERY_SET, &["photo"], false),
        ),
        Err(DbError::BadInput(_))
    ));
}

#[test]
fn rename_applies_to_exactly_one_file() {
    let t = test_db();
    t.db.set_time_for_testing(5000);
    let alice = register(&t.db, "alice@example.org");
    upload(&t, &alice, "old-name", GALLERY_SET, &gallery()).unwrap();
    upload(&t, &alice, "other", GALLERY_SET, &gallery()).unwrap();

    let mut params = move_params(GALLERY_SET, TRASH_SET, &["old-name", "other"], true);
    params.rename = Some("new-name".to_string());
    assert!(matches!(
        t.db.move_file(alice.user_id, params),
        Err(DbError::BadInput(_))
    ));

    let mut params = move_params(GALLERY_SET, TRASH_SET, &["old-name"], true);
    params.rename = Some("new-name".to_string());
    t.db.move_file(alice.user_id, params).unwrap();

    let trash: FileSet = t
        .db
        .file_set(alice.user_id, TRASH_SET, &gallery())
        .unwrap();
    assert!(trash.files.contains_key("new-name"));
    assert_eq!(trash.files["new-name"].file, "new-name");
    assert_eq!(trash.files["new-name"].date_modified, 5000);
}

#[test]
fn permission_bits_gate_non_owner_add_and_copy() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    let bob = register(&t.db, "bob@example.org");

    t.db.add_album(
        alice.user_id,
        AddAlbumParams {
            album_id: AlbumId::new("album"),
            date_created: 1000,
            date_modified: 1000,
            enc_private_key: "k".into(),
            public_key: "p".into(),
            metadata: "m".into(),
        },
    )
    .unwrap();
    upload(&t, &alice, "shared-photo", ALBUM_SET, &AlbumId::new("album")).unwrap();

    // Share with nothing allowed.
    let sharing_keys: BTreeMap<i64, String> =
        [(bob.user_id.as_i64(), "Bob's Key".to_string())].into();
    t.db.share_album(
        alice.user_id,
        &AlbumId::new("album"),
        &[bob.user_id],
        &sharing_keys,
        Some(Permissions::new("1000")),
    )
    .unwrap();

    // Bob cannot upload into the album.
    let err = upload(&t, &bob, "bobs-photo", ALBUM_SET, &AlbumId::new("album")).unwrap_err();
    assert!(matches!(err, DbError::Forbidden(_)));

    // Bob cannot copy a file out of the album.
    let mut params = move_params(ALBUM_SET, GALLERY_SET, &["shared-photo"], false);
    params.album_id_from = AlbumId::new("album");
    assert!(matches!(
        t.db.move_file(bob.user_id, params),
        Err(DbError::Forbidden(_))
    ));

    // Bob cannot move a file out either; moving from a non-owned album
    // is denied before the copy bit is even consulted.
    let mut params = move_params(ALBUM_SET, GALLERY_SET, &["shared-photo"], true);
    params.album_id_from = AlbumId::new("album");
    assert!(matches!(
        t.db.move_file(bob.user_id, params),
        Err(DbError::Forbidden(_))
    ));

    // Bob can still view the album and leave it.
    assert_eq!(set_len(&t, &bob, ALBUM_SET, &AlbumId::new("album")), 1);
    t.db.leave_album(bob.user_id, &AlbumId::new("album")).unwrap();

    // With copy allowed, copying out works.
    t.db.share_album(
        alice.user_id,
        &AlbumId::new("album"),
        &[bob.user_id],
        &sharing_keys,
        Some(Permissions::new("1001")),
    )
    .unwrap();
    let mut params = move_params(ALBUM_SET, GALLERY_SET, &["shared-photo"], false);
    params.album_id_from = AlbumId::new("album");
    t.db.move_file(bob.user_id, params).unwrap();
    assert_eq!(set_len(&t, &bob, GALLERY_SET, &gallery()), 1);
}

#[test]
fn download_streams_the_blob_back() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    upload(&t, &alice, "photo", GALLERY_SET, &gallery()).unwrap();

    let mut reader = t
        .db
        .download_file(alice.user_id, GALLERY_SET, &gallery(), "photo", false)
        .unwrap();
    let mut out = String::new();
    std::io::Read::read_to_string(&mut reader, &mut out).unwrap();
    assert_eq!(out, "content of photo");

    let mut thumb = t
        .db
        .download_file(alice.user_id, GALLERY_SET, &gallery(), "photo", true)
        .unwrap();
    let mut out = String::new();
    std::io::Read::read_to_string(&mut thumb, &mut out).unwrap();
    assert_eq!(out, "thumb of photo");
}

#[test]
fn deleting_from_gallery_is_refused() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    upload(&t, &alice, "photo", GALLERY_SET, &gallery()).unwrap();

    // delete_files only touches the Trash; a Gallery file is untouched.
    t.db.delete_files(alice.user_id, &["photo".to_string()]).unwrap();
    assert_eq!(set_len(&t, &alice, GALLERY_SET, &gallery()), 1);
}
