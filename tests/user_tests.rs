//! User lifecycle under the authorization gate.

mod common;

use common::*;
use futures::TryStreamExt;
use gatehouse::{AuthError, NewUser, Roles, User, UserChanges, UserField};

fn roles_change(roles: Roles) -> UserChanges {
    UserChanges {
        roles: Some(roles),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bootstrap_only_on_empty_store() {
    let auth = setup().await;

    let root = auth
        .bootstrap_super_user(NewUser::with_password(ROOT_EMAIL, "Root", "Root", PASSWORD))
        .await
        .unwrap();
    assert_eq!(root.id, 1);
    assert!(root.roles.contains(Roles::SUPER));

    let again = auth
        .bootstrap_super_user(NewUser::with_password(
            "second@example.com",
            "Second",
            "Second",
            PASSWORD,
        ))
        .await;
    assert!(matches!(again, Err(AuthError::Unauthorized)));
}

#[tokio::test]
async fn test_bootstrap_validates() {
    let auth = setup().await;

    let result = auth
        .bootstrap_super_user(NewUser::with_password(ROOT_EMAIL, "Root", "Root", "short"))
        .await;
    match result {
        Err(AuthError::Validation(e)) => assert_eq!(e.field, UserField::Password),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_first_user_gets_super_through_signup() {
    let auth = setup().await;

    let first = signup(&auth, "first@example.com").await;
    let second = signup(&auth, "second@example.com").await;

    assert_eq!(first.id, 1);
    assert!(first.roles.contains(Roles::SUPER));
    assert!(second.roles.is_empty());
}

#[tokio::test]
async fn test_new_user_cannot_grant_roles() {
    let (auth, _root) = setup_with_root().await;
    let code = auth.email_verify_code("climber@example.com").await.unwrap();
    let newbie = auth.new_user_email(&code, activity()).await.unwrap();

    let mut new = NewUser::with_password("climber@example.com", "Climber", "C", PASSWORD);
    new.roles = Roles::ADMIN | Roles::SUPER;
    let user = auth.create_user(&newbie, new).await.unwrap();

    assert!(user.roles.is_empty());
}

#[tokio::test]
async fn test_admin_grants_at_most_admin() {
    let (auth, root) = setup_with_root().await;

    let mut new = NewUser::with_password("admin@example.com", "Admin", "Admin", PASSWORD);
    new.roles = Roles::ADMIN;
    auth.create_user(&root, new).await.unwrap();
    let admin = auth
        .signin_password("admin@example.com", PASSWORD, activity())
        .await
        .unwrap();
    assert!(admin.is_admin());
    assert!(!admin.is_super());

    let mut new = NewUser::with_password("staff@example.com", "Staff", "Staff", PASSWORD);
    new.roles = Roles::ADMIN | Roles::SUPER;
    let staff = auth.create_user(&admin, new).await.unwrap();
    assert_eq!(staff.roles, Roles::ADMIN);
}

#[tokio::test]
async fn test_plain_user_cannot_create() {
    let (auth, _root) = setup_with_root().await;
    let plain = signed_in(&auth, "plain@example.com").await;

    let result = auth
        .create_user(
            &plain,
            NewUser::with_password("x@example.com", "X", "X", PASSWORD),
        )
        .await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));
}

#[tokio::test]
async fn test_user_one_keeps_super() {
    let (auth, root) = setup_with_root().await;

    let result = auth.update_user(&root, 1, roles_change(Roles::ADMIN)).await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));

    let renamed = auth
        .update_user(
            &root,
            1,
            UserChanges {
                full_name: Some("Root Renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.full_name, "Root Renamed");
    assert!(renamed.roles.contains(Roles::SUPER));
}

#[tokio::test]
async fn test_authorization_checked_before_validation() {
    let (auth, _root) = setup_with_root().await;
    let plain = signed_in(&auth, "plain@example.com").await;
    let other = signup(&auth, "other@example.com").await;

    let blank_name = UserChanges {
        full_name: Some("".into()),
        ..Default::default()
    };

    // Someone else's record: rejected before the blank name is looked at
    let result = auth.update_user(&plain, other.id, blank_name.clone()).await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));

    // Own record: authorized, then validation fails
    let result = auth
        .update_user(&plain, plain.id().unwrap(), blank_name)
        .await;
    match result {
        Err(AuthError::Validation(e)) => assert_eq!(e.field, UserField::FullName),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_target_is_unauthorized() {
    let (auth, root) = setup_with_root().await;

    let result = auth.update_user(&root, 999, UserChanges::default()).await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));
    let result = auth.delete_user(&root, 999).await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));
}

#[tokio::test]
async fn test_update_to_taken_email() {
    let (auth, root) = setup_with_root().await;
    let plain = signup(&auth, "plain@example.com").await;
    signup(&auth, "taken@example.com").await;

    let result = auth
        .update_user(
            &root,
            plain.id,
            UserChanges {
                email: Some("TAKEN@example.com".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(AuthError::DuplicateEmail)));

    // The same holds for an owner holding a valid code
    let owner = auth
        .signin_password("plain@example.com", PASSWORD, activity())
        .await
        .unwrap();
    let code = auth.email_verify_code("taken@example.com").await.unwrap();
    let result = auth
        .update_user(
            &owner,
            plain.id,
            UserChanges::verified_email("taken@example.com", code),
        )
        .await;
    assert!(matches!(result, Err(AuthError::DuplicateEmail)));
}

#[tokio::test]
async fn test_own_email_change_requires_code() {
    let auth = setup().await;
    let user = signed_in(&auth, "alice@example.com").await;
    let id = user.id().unwrap();

    let unverified = UserChanges {
        email: Some("mallory@example.com".into()),
        ..Default::default()
    };
    let result = auth.update_user(&user, id, unverified).await;
    assert!(matches!(result, Err(AuthError::InvalidVerifyCode)));

    // A code for some other address does not count
    let other = auth.email_verify_code("other@example.com").await.unwrap();
    let result = auth
        .update_user(&user, id, UserChanges::verified_email("mallory@example.com", other))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidVerifyCode)));

    let stored = auth.read_user(id).await.unwrap().unwrap();
    assert_eq!(stored.email, "alice@example.com");
}

#[tokio::test]
async fn test_own_email_change_with_code() {
    let auth = setup().await;
    let user = signed_in(&auth, "alice@example.com").await;
    let id = user.id().unwrap();

    let code = auth.email_verify_code("Alice.New@example.com").await.unwrap();
    let updated = auth
        .update_user(&user, id, UserChanges::verified_email("alice.new@example.com", &code))
        .await
        .unwrap();
    assert_eq!(updated.email, "alice.new@example.com");

    assert!(
        auth.signin_password("alice.new@example.com", PASSWORD, activity())
            .await
            .is_ok()
    );

    // Codes are single use
    let result = auth
        .update_user(&user, id, UserChanges::verified_email("alice.new@example.com", &code))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidVerifyCode)));
}

#[tokio::test]
async fn test_admin_changes_email_directly() {
    let (auth, root) = setup_with_root().await;
    let user = signup(&auth, "alice@example.com").await;

    let updated = auth
        .update_user(
            &root,
            user.id,
            UserChanges {
                email: Some("alice@corp.example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.email, "alice@corp.example.com");
}

#[tokio::test]
async fn test_password_change() {
    let auth = setup().await;
    let user = signed_in(&auth, "alice@example.com").await;

    let updated = auth
        .update_user(
            &user,
            user.id().unwrap(),
            UserChanges {
                password: Some("a-brand-new-secret".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.updated_at >= updated.created_at);

    assert!(auth.verify_password("alice@example.com", PASSWORD).await.is_err());
    assert!(
        auth.verify_password("alice@example.com", "a-brand-new-secret")
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_owner_and_higher_rank_may_delete() {
    let (auth, root) = setup_with_root().await;
    let alice = signed_in(&auth, "alice@example.com").await;
    let bob = signup(&auth, "bob@example.com").await;

    let result = auth.delete_user(&alice, bob.id).await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));

    auth.delete_user(&root, bob.id).await.unwrap();
    assert!(auth.read_user(bob.id).await.unwrap().is_none());

    auth.delete_user(&alice, alice.id().unwrap()).await.unwrap();
    assert!(auth.read_user(alice.id().unwrap()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_streams() {
    let (auth, _root) = setup_with_root().await;
    let a = signup(&auth, "a@example.com").await;
    let b = signup(&auth, "b@example.com").await;
    let c = signup(&auth, "c@example.com").await;

    let picked: Vec<User> = auth
        .read_users(&[c.id, a.id, 4242])
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<i64> = picked.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![a.id, c.id]);

    let range: Vec<User> = auth.read_user_range(b.id, 10).try_collect().await.unwrap();
    let ids: Vec<i64> = range.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![b.id, c.id]);

    let empty: Vec<User> = auth.read_user_range(a.id, 0).try_collect().await.unwrap();
    assert!(empty.is_empty());

    let json = serde_json::to_value(&picked[0]).unwrap();
    assert_eq!(json["email"], "a@example.com");
    assert!(json.get("passwordHash").is_none());
    assert!(json.get("nameToUse").is_some());
}
