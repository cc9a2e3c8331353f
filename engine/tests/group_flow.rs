//! Group access: class enrollment, membership changes, the last-holder
//! invariant, and ownership transfer into a group.

mod common;

use common::TestVault;
use vault_engine::store::Store;
use vault_engine::{ActorId, VaultError};

#[test]
fn members_reach_group_owned_entries() {
    let (tv, class) = TestVault::with_class(3, 2);
    let u1 = tv.user_with_factors(&[0, 1]);
    let u2 = tv.user_with_factors(&[1, 2]);
    let outsider = tv.user_with_factors(&[0, 1]);
    let group = tv.directory.add_group(&[u1, u2]);

    tv.engine.group_keys(group).unwrap().add_security_class(&class).unwrap();
    let entry = tv
        .engine
        .entries()
        .create(u1, ActorId::Group(group), class, "wifi", "", b"hunter2")
        .unwrap();

    for member in [u1, u2] {
        let mut session = tv.engine.entries().open(member, &entry).unwrap();
        assert_eq!(session.read_payload().unwrap().as_slice(), b"hunter2");
    }
    let err = tv.engine.entries().open(outsider, &entry).unwrap_err();
    assert!(matches!(err, VaultError::PermissionDenied(_)));
}

#[test]
fn add_security_class_requires_all_members_eligible() {
    let (tv, class) = TestVault::with_class(2, 2);
    let u1 = tv.user_with_factors(&[0, 1]);
    let u2 = tv.directory.add_user();
    let group = tv.directory.add_group(&[u1, u2]);

    // u2 never enrolled anything.
    let err = tv
        .engine
        .group_keys(group)
        .unwrap()
        .add_security_class(&class)
        .unwrap_err();
    assert!(matches!(err, VaultError::Eligibility(_)));
}

#[test]
fn new_member_gains_access_to_existing_entries() {
    let (tv, class) = TestVault::with_class(2, 2);
    let u1 = tv.user_with_factors(&[0, 1]);
    let group = tv.directory.add_group(&[u1]);
    tv.engine.group_keys(group).unwrap().add_security_class(&class).unwrap();

    let entry = tv
        .engine
        .entries()
        .create(u1, ActorId::Group(group), class, "api", "", b"token")
        .unwrap();

    let u3 = tv.user_with_factors(&[0, 1]);
    tv.directory.set_members(group, &[u1, u3]);
    tv.engine.group_keys(group).unwrap().add_member(&u3, &u1).unwrap();

    let mut session = tv.engine.entries().open(u3, &entry).unwrap();
    assert_eq!(session.read_payload().unwrap().as_slice(), b"token");
}

#[test]
fn removed_member_loses_access() {
    let (tv, class) = TestVault::with_class(2, 2);
    let u1 = tv.user_with_factors(&[0, 1]);
    let u2 = tv.user_with_factors(&[0, 1]);
    let group = tv.directory.add_group(&[u1, u2]);
    tv.engine.group_keys(group).unwrap().add_security_class(&class).unwrap();

    let entry = tv
        .engine
        .entries()
        .create(u1, ActorId::Group(group), class, "api", "", b"token")
        .unwrap();

    tv.engine.group_keys(group).unwrap().remove_member(&u2).unwrap();
    tv.directory.set_members(group, &[u1]);

    let err = tv.engine.entries().open(u2, &entry).unwrap_err();
    assert!(matches!(err, VaultError::PermissionDenied(_)));
    // Removal is idempotent once the shares are gone.
    tv.engine.group_keys(group).unwrap().remove_member(&u2).unwrap();
}

#[test]
fn last_holder_cannot_be_removed() {
    let (tv, class) = TestVault::with_class(2, 2);
    let u1 = tv.user_with_factors(&[0, 1]);
    let group = tv.directory.add_group(&[u1]);
    tv.engine.group_keys(group).unwrap().add_security_class(&class).unwrap();

    let err = tv
        .engine
        .group_keys(group)
        .unwrap()
        .remove_member(&u1)
        .unwrap_err();
    assert!(matches!(err, VaultError::Invariant(_)));
}

#[test]
fn ownership_transfer_to_group() {
    let (tv, class) = TestVault::with_class(2, 2);
    let u1 = tv.user_with_factors(&[0, 1]);
    let u2 = tv.user_with_factors(&[0, 1]);
    let group = tv.directory.add_group(&[u1, u2]);
    tv.engine.group_keys(group).unwrap().add_security_class(&class).unwrap();

    let entry = tv
        .engine
        .entries()
        .create(u1, ActorId::User(u1), class, "cert", "", b"pem")
        .unwrap();

    let mut session = tv.engine.entries().open(u1, &entry).unwrap();
    tv.engine
        .entries()
        .change_owner(&mut session, ActorId::Group(group))
        .unwrap();

    let stored = tv.engine.store().require_entry(&entry).unwrap();
    assert_eq!(stored.owner, ActorId::Group(group));
    // u1's direct records are gone, but membership still provides the path.
    assert!(tv.backend.user_access(&u1, &entry).unwrap().is_empty());
    for member in [u1, u2] {
        let mut session = tv.engine.entries().open(member, &entry).unwrap();
        assert_eq!(session.read_payload().unwrap().as_slice(), b"pem");
    }
}

#[test]
fn migration_drops_groups_not_enrolled_in_new_class() {
    let (tv, classes) = TestVault::with_classes(2, &[(&[0, 1], 2), (&[0, 1], 2)]);
    let (old_class, new_class) = (classes[0], classes[1]);
    let owner = tv.user_with_factors(&[0, 1]);
    let member_a = tv.user_with_factors(&[0, 1]);
    let member_b = tv.user_with_factors(&[0, 1]);
    let group_a = tv.directory.add_group(&[member_a]);
    let group_b = tv.directory.add_group(&[member_b]);

    tv.engine.group_keys(group_a).unwrap().add_security_class(&old_class).unwrap();
    tv.engine.group_keys(group_b).unwrap().add_security_class(&old_class).unwrap();
    tv.engine.group_keys(group_b).unwrap().add_security_class(&new_class).unwrap();

    let entry_id = tv
        .engine
        .entries()
        .create(owner, ActorId::User(owner), old_class, "doc", "", b"v1")
        .unwrap();
    let mut session = tv.engine.entries().open(owner, &entry_id).unwrap();
    tv.engine.entries().share_with_group(&mut session, group_a).unwrap();
    tv.engine.entries().share_with_group(&mut session, group_b).unwrap();

    let mut session = tv.engine.entries().open(owner, &entry_id).unwrap();
    tv.engine
        .entries()
        .set_security_class(&mut session, new_class)
        .unwrap();

    let stored = tv.engine.store().require_entry(&entry_id).unwrap();
    assert_eq!(stored.security_class, new_class);
    // group_a holds no key pair for the new class and was dropped.
    assert!(!stored.shared_groups.contains(&group_a));
    let err = tv.engine.entries().open(member_a, &entry_id).unwrap_err();
    assert!(matches!(err, VaultError::PermissionDenied(_)));
    // group_b is enrolled in both classes: its access was re-wrapped.
    assert!(stored.shared_groups.contains(&group_b));
    let mut session = tv.engine.entries().open(member_b, &entry_id).unwrap();
    assert_eq!(session.read_payload().unwrap().as_slice(), b"v1");
}

#[test]
fn remove_security_class_cascades_owned_entries() {
    let (tv, class) = TestVault::with_class(2, 2);
    let u1 = tv.user_with_factors(&[0, 1]);
    let u2 = tv.user_with_factors(&[0, 1]);
    let group = tv.directory.add_group(&[u1]);
    tv.engine.group_keys(group).unwrap().add_security_class(&class).unwrap();

    let owned = tv
        .engine
        .entries()
        .create(u1, ActorId::Group(group), class, "owned", "", b"a")
        .unwrap();
    let shared = tv
        .engine
        .entries()
        .create(u2, ActorId::User(u2), class, "shared", "", b"b")
        .unwrap();
    let mut session = tv.engine.entries().open(u2, &shared).unwrap();
    tv.engine.entries().share_with_group(&mut session, group).unwrap();

    tv.engine
        .group_keys(group)
        .unwrap()
        .remove_security_class(&class)
        .unwrap();

    // The group-owned entry is gone with its full cascade.
    assert!(tv.engine.store().get_entry(&owned).unwrap().is_none());
    // The user-owned entry survives; only the group's access path is gone.
    let mut session = tv.engine.entries().open(u2, &shared).unwrap();
    assert_eq!(session.read_payload().unwrap().as_slice(), b"b");
    let err = tv.engine.entries().open(u1, &shared).unwrap_err();
    assert!(matches!(err, VaultError::PermissionDenied(_)));
    // The group's key material for the class is deleted.
    assert!(tv
        .engine
        .group_keys(group)
        .unwrap()
        .security_classes()
        .unwrap()
        .is_empty());
}

#[test]
fn shared_group_entry_revocable_by_owner() {
    let (tv, class) = TestVault::with_class(2, 2);
    let owner = tv.user_with_factors(&[0, 1]);
    let member = tv.user_with_factors(&[0, 1]);
    let group = tv.directory.add_group(&[member]);
    tv.engine.group_keys(group).unwrap().add_security_class(&class).unwrap();

    let entry = tv
        .engine
        .entries()
        .create(owner, ActorId::User(owner), class, "doc", "", b"v1")
        .unwrap();

    let mut session = tv.engine.entries().open(owner, &entry).unwrap();
    tv.engine.entries().share_with_group(&mut session, group).unwrap();
    assert!(tv.engine.entries().open(member, &entry).is_ok());

    let mut session = tv.engine.entries().open(owner, &entry).unwrap();
    tv.engine.entries().revoke_group_access(&mut session, group).unwrap();
    let err = tv.engine.entries().open(member, &entry).unwrap_err();
    assert!(matches!(err, VaultError::PermissionDenied(_)));
}
