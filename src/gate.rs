//! Authorization rules for user record mutations.
//!
//! Pure functions of the actor, the target and the proposed change. Callers
//! check these before validating or persisting anything.

use crate::auth::AuthUser;
use crate::db::{Roles, User};
use crate::users::{NewUser, UserChanges};

fn is_owner(actor: &AuthUser, target: &User) -> bool {
    actor.id() == Some(target.id)
}

fn outranks(actor: &AuthUser, target: &User) -> bool {
    actor.roles().rank() > target.roles.rank()
}

/// Admins and supers may create users. A new user may create exactly the
/// account for their verified email.
pub fn can_create(actor: &AuthUser, target: &NewUser) -> bool {
    if actor.is_admin() || actor.is_super() {
        return true;
    }
    actor.is_new_user() && actor.email().eq_ignore_ascii_case(target.email.trim())
}

/// Roles a created user actually receives.
pub fn masked_roles(actor: &AuthUser, requested: Roles) -> Roles {
    requested & actor.grantable_roles()
}

/// The owner or a strictly higher-ranked actor may update. Role changes are
/// further restricted, and user 1 never loses SUPER.
pub fn can_update(actor: &AuthUser, target: &User, changes: &UserChanges) -> bool {
    if !is_owner(actor, target) && !outranks(actor, target) {
        return false;
    }

    let Some(roles) = changes.roles else {
        return true;
    };
    let added = roles.difference(target.roles);
    let removed = target.roles.difference(roles);

    if target.id == 1 && removed.contains(Roles::SUPER) {
        return false;
    }
    if added.contains(Roles::ADMIN) && !(actor.is_admin() || actor.is_super()) {
        return false;
    }
    if added.contains(Roles::SUPER) && !actor.is_super() {
        return false;
    }
    if !removed.is_empty() && !actor.is_super() {
        return false;
    }
    true
}

/// Users changing their own email must prove they own the new address. A
/// strictly higher-ranked actor sets it directly.
pub fn must_verify_email(actor: &AuthUser, target: &User) -> bool {
    is_owner(actor, target) && !outranks(actor, target)
}

/// The owner or a strictly higher-ranked actor may delete.
pub fn can_delete(actor: &AuthUser, target: &User) -> bool {
    is_owner(actor, target) || outranks(actor, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provider;

    fn user(id: i64, roles: Roles) -> User {
        User {
            id,
            email: format!("user{id}@example.com"),
            full_name: "Target".into(),
            name_to_use: "Target".into(),
            is_active: true,
            roles,
            authorized_provider: Provider::Email,
            created_at: 0,
            updated_at: 0,
            active_at: 0,
            password_hash: None,
        }
    }

    fn new_user(email: &str, roles: Roles) -> NewUser {
        let mut new = NewUser::with_password(email, "New", "New", "password123");
        new.roles = roles;
        new
    }

    fn roles_change(roles: Roles) -> UserChanges {
        UserChanges {
            roles: Some(roles),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_requires_admin_or_matching_new_user() {
        let admin = AuthUser::for_tests(Some(2), "admin@example.com", Roles::ADMIN);
        let plain = AuthUser::for_tests(Some(3), "plain@example.com", Roles::NONE);
        let newbie = AuthUser::for_tests(None, "new@example.com", Roles::NONE);

        assert!(can_create(&admin, &new_user("x@example.com", Roles::NONE)));
        assert!(!can_create(&plain, &new_user("x@example.com", Roles::NONE)));
        assert!(can_create(&newbie, &new_user("NEW@example.com", Roles::NONE)));
        assert!(!can_create(&newbie, &new_user("other@example.com", Roles::NONE)));
    }

    #[test]
    fn test_masked_roles() {
        let sup = AuthUser::for_tests(Some(2), "s@example.com", Roles::SUPER);
        let admin = AuthUser::for_tests(Some(3), "a@example.com", Roles::ADMIN);
        let newbie = AuthUser::for_tests(None, "n@example.com", Roles::NONE);
        let all = Roles::ADMIN | Roles::SUPER;

        assert_eq!(masked_roles(&sup, all), all);
        assert_eq!(masked_roles(&admin, all), Roles::ADMIN);
        assert_eq!(masked_roles(&newbie, all), Roles::NONE);
    }

    #[test]
    fn test_update_requires_owner_or_higher_rank() {
        let admin = AuthUser::for_tests(Some(2), "a@example.com", Roles::ADMIN);
        let other_admin = user(3, Roles::ADMIN);
        let plain = user(4, Roles::NONE);
        let rename = UserChanges {
            full_name: Some("Renamed".into()),
            ..Default::default()
        };

        assert!(can_update(&admin, &plain, &rename));
        assert!(!can_update(&admin, &other_admin, &rename));
        assert!(can_update(&admin, &user(2, Roles::ADMIN), &rename));

        let newbie = AuthUser::for_tests(None, "n@example.com", Roles::NONE);
        assert!(!can_update(&newbie, &plain, &rename));
    }

    #[test]
    fn test_role_changes() {
        let sup = AuthUser::for_tests(Some(2), "s@example.com", Roles::SUPER);
        let admin = AuthUser::for_tests(Some(3), "a@example.com", Roles::ADMIN);
        let plain = user(4, Roles::NONE);
        let plain_admin = user(5, Roles::ADMIN);

        assert!(can_update(&admin, &plain, &roles_change(Roles::ADMIN)));
        assert!(!can_update(&admin, &plain, &roles_change(Roles::SUPER)));
        assert!(can_update(&sup, &plain, &roles_change(Roles::SUPER)));

        // Removing roles needs SUPER
        assert!(!can_update(&admin, &user(3, Roles::ADMIN), &roles_change(Roles::NONE)));
        assert!(can_update(&sup, &plain_admin, &roles_change(Roles::NONE)));

        // Owners can't raise themselves
        let owner = AuthUser::for_tests(Some(4), "user4@example.com", Roles::NONE);
        assert!(!can_update(&owner, &plain, &roles_change(Roles::ADMIN)));
    }

    #[test]
    fn test_user_one_keeps_super() {
        let root = AuthUser::for_tests(Some(1), "root@example.com", Roles::SUPER);
        let target = user(1, Roles::SUPER);

        assert!(!can_update(&root, &target, &roles_change(Roles::ADMIN)));
        assert!(can_update(&root, &target, &roles_change(Roles::ADMIN | Roles::SUPER)));
    }

    #[test]
    fn test_own_email_change_needs_verification() {
        let admin = AuthUser::for_tests(Some(2), "a@example.com", Roles::ADMIN);
        let plain = AuthUser::for_tests(Some(3), "p@example.com", Roles::NONE);

        assert!(must_verify_email(&plain, &user(3, Roles::NONE)));
        assert!(must_verify_email(&admin, &user(2, Roles::ADMIN)));
        assert!(!must_verify_email(&admin, &user(3, Roles::NONE)));
    }

    #[test]
    fn test_delete() {
        let admin = AuthUser::for_tests(Some(2), "a@example.com", Roles::ADMIN);
        assert!(can_delete(&admin, &user(2, Roles::ADMIN)));
        assert!(can_delete(&admin, &user(4, Roles::NONE)));
        assert!(!can_delete(&admin, &user(5, Roles::ADMIN)));
        assert!(!can_delete(&admin, &user(1, Roles::SUPER)));

        let newbie = AuthUser::for_tests(None, "user4@example.com", Roles::NONE);
        assert!(!can_delete(&newbie, &user(4, Roles::NONE)));
    }
}
