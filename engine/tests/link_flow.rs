//! Capability links: bearer tokens, use counting, passwords, expiry, and
//! deactivation on ownership transfer.

mod common;

use chrono::{Duration, Utc};
use common::TestVault;
use vault_engine::{ActorId, CallerContext, LinkOptions, VaultError};

fn anonymous() -> CallerContext {
    CallerContext {
        user: None,
        agent: "test-agent".to_string(),
    }
}

#[test]
fn single_use_link_deactivates_after_one_call() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();

    let grant = tv
        .engine
        .links()
        .create(
            alice,
            &entry,
            LinkOptions {
                max_calls: Some(1),
                ..Default::default()
            },
        )
        .unwrap();

    let payload = tv
        .engine
        .links()
        .get_password(&grant.link, &grant.token, None, &anonymous())
        .unwrap();
    assert_eq!(payload.as_slice(), b"secret");

    let err = tv
        .engine
        .links()
        .get_password(&grant.link, &grant.token, None, &anonymous())
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidKey));
    assert!(!tv.engine.store().require_link(&grant.link).unwrap().active);
}

#[test]
fn wrong_token_does_not_consume_the_budget() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();
    let grant = tv
        .engine
        .links()
        .create(
            alice,
            &entry,
            LinkOptions {
                max_calls: Some(1),
                ..Default::default()
            },
        )
        .unwrap();

    let err = tv
        .engine
        .links()
        .get_password(&grant.link, b"not the token", None, &anonymous())
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidKey));

    // The failed attempt left the single allowed call available.
    assert!(tv
        .engine
        .links()
        .get_password(&grant.link, &grant.token, None, &anonymous())
        .is_ok());
}

#[test]
fn password_protected_link_requires_the_password() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();
    let grant = tv
        .engine
        .links()
        .create(
            alice,
            &entry,
            LinkOptions {
                password: Some("correct horse".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let links = tv.engine.links();
    let err = links
        .get_password(&grant.link, &grant.token, None, &anonymous())
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidKey));
    let err = links
        .get_password(&grant.link, &grant.token, Some("wrong"), &anonymous())
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidKey));

    let payload = links
        .get_password(&grant.link, &grant.token, Some("correct horse"), &anonymous())
        .unwrap();
    assert_eq!(payload.as_slice(), b"secret");
}

#[test]
fn expired_link_is_refused_and_deactivated() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();
    let grant = tv
        .engine
        .links()
        .create(
            alice,
            &entry,
            LinkOptions {
                valid_until: Some(Utc::now() - Duration::minutes(1)),
                ..Default::default()
            },
        )
        .unwrap();

    let err = tv
        .engine
        .links()
        .get_password(&grant.link, &grant.token, None, &anonymous())
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidKey));
    assert!(!tv.engine.store().require_link(&grant.link).unwrap().active);
}

#[test]
fn entitled_caller_is_exempt_from_counting() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();
    let grant = tv
        .engine
        .links()
        .create(
            alice,
            &entry,
            LinkOptions {
                max_calls: Some(1),
                ..Default::default()
            },
        )
        .unwrap();

    let owner_caller = CallerContext {
        user: Some(alice),
        agent: "owner-browser".to_string(),
    };
    // The owner can use the link repeatedly without spending its one call.
    for _ in 0..3 {
        tv.engine
            .links()
            .get_password(&grant.link, &grant.token, None, &owner_caller)
            .unwrap();
    }

    // An anonymous caller then consumes it.
    assert!(tv
        .engine
        .links()
        .get_password(&grant.link, &grant.token, None, &anonymous())
        .is_ok());
    assert!(!tv.engine.store().require_link(&grant.link).unwrap().active);
}

#[test]
fn owner_change_deactivates_links() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let bob = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();
    let grant = tv
        .engine
        .links()
        .create(alice, &entry, LinkOptions::default())
        .unwrap();

    let mut session = tv.engine.entries().open(alice, &entry).unwrap();
    tv.engine
        .entries()
        .change_owner(&mut session, ActorId::User(bob))
        .unwrap();

    let err = tv
        .engine
        .links()
        .get_password(&grant.link, &grant.token, None, &anonymous())
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidKey));
}

#[test]
fn token_string_round_trips() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();
    let grant = tv
        .engine
        .links()
        .create(alice, &entry, LinkOptions::default())
        .unwrap();

    let token = vault_engine::link::parse_token(&grant.token_string()).unwrap();
    let payload = tv
        .engine
        .links()
        .get_password(&grant.link, &token, None, &anonymous())
        .unwrap();
    assert_eq!(payload.as_slice(), b"secret");

    let err = vault_engine::link::parse_token("not base64 !!").unwrap_err();
    assert!(matches!(err, VaultError::InvalidKey));
}

#[test]
fn non_owner_cannot_issue_links() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let mallory = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();

    let err = tv
        .engine
        .links()
        .create(mallory, &entry, LinkOptions::default())
        .unwrap_err();
    assert!(matches!(err, VaultError::PermissionDenied(_)));
}

#[test]
fn sweep_deactivates_expired_links_only() {
    let (tv, class) = TestVault::with_class(2, 1);
    let alice = tv.user_with_factors(&[0]);
    let entry = tv
        .engine
        .entries()
        .create(alice, ActorId::User(alice), class, "pw", "", b"secret")
        .unwrap();

    let expired = tv
        .engine
        .links()
        .create(
            alice,
            &entry,
            LinkOptions {
                valid_until: Some(Utc::now() - Duration::minutes(1)),
                ..Default::default()
            },
        )
        .unwrap();
    let live = tv
        .engine
        .links()
        .create(alice, &entry, LinkOptions::default())
        .unwrap();

    assert_eq!(tv.engine.links().sweep_expired().unwrap(), 1);
    assert!(!tv.engine.store().require_link(&expired.link).unwrap().active);
    assert!(tv.engine.store().require_link(&live.link).unwrap().active);
}
