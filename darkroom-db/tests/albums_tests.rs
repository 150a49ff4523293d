//! Album lifecycle: create, delete, share, re-share, unshare, membership.

mod common;

use common::{register, test_db};
use darkroom_db::{AddAlbumParams, Db, DbError, User};
use darkroom_types::{AlbumId, Permissions, UserId};
use std::collections::BTreeMap;

fn add_album(db: &Db, user: &User, album_id: &str, ts: i64) {
    db.add_album(
        user.user_id,
        AddAlbumParams {
            album_id: AlbumId::new(album_id),
            date_created: ts,
            date_modified: ts,
            enc_private_key: format!("{album_id} encPrivateKey"),
            public_key: format!("{album_id} publicKey"),
            metadata: format!("{album_id} metadata"),
        },
    )
    .expect("add album");
}

fn share(
    db: &Db,
    caller: &User,
    album_id: &str,
    members: &[&User],
    keys: &[(&User, &str)],
    perms: Option<&str>,
) -> Result<darkroom_db::Album, DbError> {
    let member_ids: Vec<UserId> = members.iter().map(|u| u.user_id).collect();
    let sharing_keys: BTreeMap<i64, String> = keys
        .iter()
        .map(|(u, k)| (u.user_id.as_i64(), k.to_string()))
        .collect();
    db.share_album(
        caller.user_id,
        &AlbumId::new(album_id),
        &member_ids,
        &sharing_keys,
        perms.map(Permissions::new),
    )
}

#[test]
fn add_then_delete_album_leaves_a_gravestone() {
    let t = test_db();
    t.db.set_time_for_testing(1000);
    let alice = register(&t.db, "alice@example.org");
    add_album(&t.db, &alice, "album1", 1000);

    let album = t
        .db
        .album(alice.user_id, &AlbumId::new("album1"))
        .unwrap();
    assert_eq!(album.owner_id, alice.user_id);
    assert!(!album.is_shared);
    assert_eq!(album.metadata, "album1 metadata");

    t.db.set_time_for_testing(2000);
    t.db.delete_album(alice.user_id, &AlbumId::new("album1"))
        .unwrap();

    assert!(matches!(
        t.db.album(alice.user_id, &AlbumId::new("album1")),
        Err(DbError::NotFound(_))
    ));
    let updates = t
        .db
        .get_updates(alice.user_id, Default::default())
        .unwrap();
    assert!(updates.albums.is_empty());
    assert_eq!(updates.deletes.len(), 1);
    assert_eq!(updates.deletes[0].album_id, "album1");
    assert_eq!(updates.deletes[0].date, "2000");
    assert_eq!(updates.deletes[0].kind, "4");
}

#[test]
fn duplicate_album_id_is_a_conflict() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    add_album(&t.db, &alice, "album1", 1000);
    let err = t
        .db
        .add_album(
            alice.user_id,
            AddAlbumParams {
                album_id: AlbumId::new("album1"),
                date_created: 2000,
                date_modified: 2000,
                enc_private_key: "k".into(),
                public_key: "p".into(),
                metadata: "m".into(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));
}

#[test]
fn share_reshare_unshare_round() {
    let t = test_db();
    t.db.set_time_for_testing(1000);
    let alice = register(&t.db, "alice@example.org");
    let bob = register(&t.db, "bob@example.org");
    let carol = register(&t.db, "carol@example.org");
    add_album(&t.db, &alice, "album", 1000);

    // Share with bob, all permissions.
    t.db.set_time_for_testing(2000);
    share(
        &t.db,
        &alice,
        "album",
        &[&alice, &bob],
        &[(&bob, "Bob's Sharing Key")],
        Some("1111"),
    )
    .unwrap();

    let bob_view = t.db.album(bob.user_id, &AlbumId::new("album")).unwrap();
    assert!(bob_view.is_shared);
    assert_eq!(bob_view.date_modified, 2000);
    let expected_members: Vec<i64> = {
        let mut m = vec![alice.user_id.as_i64(), bob.user_id.as_i64()];
        m.sort();
        m
    };
    assert_eq!(
        bob_view.members.iter().copied().collect::<Vec<i64>>(),
        expected_members
    );

    // Bob's manifest carries his sharing key as the album key.
    let bob_updates = t.db.get_updates(bob.user_id, Default::default()).unwrap();
    assert_eq!(bob_updates.albums.len(), 1);
    assert_eq!(bob_updates.albums[0].enc_private_key, "Bob's Sharing Key");
    assert_eq!(bob_updates.albums[0].is_owner, "0");
    assert_eq!(bob_updates.albums[0].metadata, "album metadata");
    // Sharing made alice and bob mutual contacts.
    assert_eq!(bob_updates.contacts.len(), 1);
    assert_eq!(bob_updates.contacts[0].email, "alice@example.org");
    assert_eq!(bob_updates.contacts[0].date_modified, "2000");

    // Bob re-shares to carol; allowed by "1111", permissions untouched.
    t.db.set_time_for_testing(3000);
    share(
        &t.db,
        &bob,
        "album",
        &[&carol],
        &[(&carol, "Carol's Sharing Key")],
        Some("1000"), // a non-owner cannot change the mask
    )
    .unwrap();

    let carol_updates = t.db.get_updates(carol.user_id, Default::default()).unwrap();
    assert_eq!(carol_updates.albums.len(), 1);
    let carol_album = &carol_updates.albums[0];
    assert_eq!(carol_album.enc_private_key, "Carol's Sharing Key");
    assert_eq!(carol_album.permissions, "1111");
    assert_eq!(carol_album.date_modified, "3000");
    let mut all_three = vec![
        alice.user_id.as_i64(),
        bob.user_id.as_i64(),
        carol.user_id.as_i64(),
    ];
    all_three.sort();
    assert_eq!(
        carol_album.members,
        all_three
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    );
    // Carol now knows both alice and bob.
    assert_eq!(carol_updates.contacts.len(), 2);

    // Alice unshares; bob and carol each get an album gravestone.
    t.db.set_time_for_testing(4000);
    t.db.unshare_album(alice.user_id, &AlbumId::new("album"))
        .unwrap();

    let alice_album = t.db.album(alice.user_id, &AlbumId::new("album")).unwrap();
    assert!(!alice_album.is_shared);
    assert!(alice_album.members.is_empty());
    assert!(alice_album.sharing_keys.is_empty());
    assert_eq!(alice_album.permissions.as_str(), "1111");

    for member in [&bob, &carol] {
        let updates = t.db.get_updates(member.user_id, Default::default()).unwrap();
        assert!(updates.albums.is_empty(), "album still visible");
        let album_deletes: Vec<_> = updates
            .deletes
            .iter()
            .filter(|d| d.kind == "4")
            .collect();
        assert_eq!(album_deletes.len(), 1);
        assert_eq!(album_deletes[0].album_id, "album");
        assert_eq!(album_deletes[0].date, "4000");
    }
}

#[test]
fn reshare_without_allow_share_is_forbidden() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    let bob = register(&t.db, "bob@example.org");
    let carol = register(&t.db, "carol@example.org");
    add_album(&t.db, &alice, "album", 1000);
    share(
        &t.db,
        &alice,
        "album",
        &[&bob],
        &[(&bob, "Bob's Key")],
        Some("1100"), // add yes, share no
    )
    .unwrap();

    let err = share(
        &t.db,
        &bob,
        "album",
        &[&carol],
        &[(&carol, "Carol's Key")],
        None,
    )
    .unwrap_err();
    assert!(matches!(err, DbError::Forbidden(_)));
}

#[test]
fn share_requires_a_key_for_every_new_member() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    let bob = register(&t.db, "bob@example.org");
    add_album(&t.db, &alice, "album", 1000);

    let err = share(&t.db, &alice, "album", &[&bob], &[], Some("1111")).unwrap_err();
    assert!(matches!(err, DbError::BadInput(_)));
}

#[test]
fn member_can_leave_and_owner_can_remove() {
    let t = test_db();
    t.db.set_time_for_testing(1000);
    let alice = register(&t.db, "alice@example.org");
    let bob = register(&t.db, "bob@example.org");
    let carol = register(&t.db, "carol@example.org");
    add_album(&t.db, &alice, "album", 1000);
    share(
        &t.db,
        &alice,
        "album",
        &[&bob, &carol],
        &[(&bob, "BK"), (&carol, "CK")],
        Some("1111"),
    )
    .unwrap();

    t.db.set_time_for_testing(5000);
    t.db.leave_album(carol.user_id, &AlbumId::new("album"))
        .unwrap();
    t.db.remove_album_member(alice.user_id, &AlbumId::new("album"), bob.user_id)
        .unwrap();

    let album = t.db.album(alice.user_id, &AlbumId::new("album")).unwrap();
    assert_eq!(
        album.members.iter().copied().collect::<Vec<i64>>(),
        vec![alice.user_id.as_i64()]
    );
    assert!(album.is_shared);

    for member in [&bob, &carol] {
        let updates = t.db.get_updates(member.user_id, Default::default()).unwrap();
        assert!(updates.albums.is_empty());
        assert!(updates
            .deletes
            .iter()
            .any(|d| d.kind == "4" && d.album_id == "album" && d.date == "5000"));
    }
}

#[test]
fn owner_cannot_remove_themselves() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    add_album(&t.db, &alice, "album", 1000);
    assert!(matches!(
        t.db.remove_album_member(alice.user_id, &AlbumId::new("album"), alice.user_id),
        Err(DbError::BadInput(_))
    ));
}

#[test]
fn album_edits_stamp_modification_time() {
    let t = test_db();
    t.db.set_time_for_testing(1000);
    let alice = register(&t.db, "alice@example.org");
    add_album(&t.db, &alice, "album", 1000);

    t.db.set_time_for_testing(2000);
    t.db.change_album_cover(alice.user_id, &AlbumId::new("album"), "new-cover")
        .unwrap();
    t.db.set_time_for_testing(3000);
    t.db.rename_album(alice.user_id, &AlbumId::new("album"), "new-metadata")
        .unwrap();
    t.db.set_time_for_testing(4000);
    t.db.edit_perms(alice.user_id, &AlbumId::new("album"), Permissions::new("1101"))
        .unwrap();

    let album = t.db.album(alice.user_id, &AlbumId::new("album")).unwrap();
    assert_eq!(album.cover, "new-cover");
    assert_eq!(album.metadata, "new-metadata");
    assert_eq!(album.permissions.as_str(), "1101");
    assert_eq!(album.date_created, 1000);
    assert_eq!(album.date_modified, 4000);
}

#[test]
fn only_the_owner_edits_an_album() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    let bob = register(&t.db, "bob@example.org");
    add_album(&t.db, &alice, "album", 1000);
    share(&t.db, &alice, "album", &[&bob], &[(&bob, "BK")], Some("1111")).unwrap();

    assert!(matches!(
        t.db.rename_album(bob.user_id, &AlbumId::new("album"), "hijacked"),
        Err(DbError::Forbidden(_))
    ));
    assert!(matches!(
        t.db.unshare_album(bob.user_id, &AlbumId::new("album")),
        Err(DbError::Forbidden(_))
    ));
    assert!(matches!(
        t.db.delete_album(bob.user_id, &AlbumId::new("album")),
        Err(DbError::Forbidden(_))
    ));
}

#[test]
fn malformed_permissions_are_rejected() {
    let t = test_db();
    let alice = register(&t.db, "alice@example.org");
    add_album(&t.db, &alice, "album", 1000);
    for bad in ["11", "2111", "11111", "1a01"] {
        assert!(
            matches!(
                t.db.edit_perms(alice.user_id, &AlbumId::new("album"), Permissions::new(bad)),
                Err(DbError::BadInput(_))
            ),
            "{bad:?} was accepted"
        );
    }
}
