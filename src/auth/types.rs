//! The authenticated-identity capability.

use serde::Serialize;

use crate::activity::Activity;
use crate::db::{Roles, User};
use crate::providers::Provider;
use crate::tokens::SessionTokens;

/// Proof that a request was authenticated. Only sign-in, new-user and
/// session-verify operations construct one; it is never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    id: Option<i64>,
    provider: Provider,
    email: String,
    full_name: String,
    name_to_use: String,
    roles: Roles,
    is_new_user: bool,
    session: Option<SessionTokens>,
    this_signin: Activity,
}

impl AuthUser {
    pub(crate) fn signed_in(
        user: &User,
        provider: Provider,
        session: Option<SessionTokens>,
        this_signin: Activity,
    ) -> Self {
        Self {
            id: Some(user.id),
            provider,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            name_to_use: user.name_to_use.clone(),
            roles: user.roles,
            is_new_user: false,
            session,
            this_signin,
        }
    }

    /// A verified email with no user behind it yet.
    pub(crate) fn new_user(email: String, provider: Provider, this_signin: Activity) -> Self {
        Self {
            id: None,
            provider,
            email,
            full_name: String::new(),
            name_to_use: String::new(),
            roles: Roles::NONE,
            is_new_user: true,
            session: None,
            this_signin,
        }
    }

    /// Stored user id; `None` for a new user.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn name_to_use(&self) -> &str {
        &self.name_to_use
    }

    /// Roles held. User 1 is always SUPER.
    pub fn roles(&self) -> Roles {
        if self.id == Some(1) {
            self.roles | Roles::SUPER
        } else {
            self.roles
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles().contains(Roles::ADMIN)
    }

    pub fn is_super(&self) -> bool {
        self.roles().contains(Roles::SUPER)
    }

    pub fn is_new_user(&self) -> bool {
        self.is_new_user
    }

    /// Tokens of this session. The refresh token is only present right after
    /// a sign-in or refresh.
    pub fn session(&self) -> Option<&SessionTokens> {
        self.session.as_ref()
    }

    /// Where and when this session was signed in.
    pub fn this_signin(&self) -> &Activity {
        &self.this_signin
    }

    /// Roles this identity may hand to a user it creates.
    pub fn grantable_roles(&self) -> Roles {
        let roles = self.roles();
        if roles.contains(Roles::SUPER) {
            Roles::ADMIN | Roles::SUPER
        } else if roles.contains(Roles::ADMIN) {
            Roles::ADMIN
        } else {
            Roles::NONE
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(id: Option<i64>, email: &str, roles: Roles) -> Self {
        Self {
            id,
            provider: Provider::Email,
            email: email.to_string(),
            full_name: "Test".to_string(),
            name_to_use: "Test".to_string(),
            roles,
            is_new_user: id.is_none(),
            session: None,
            this_signin: Activity {
                time: 0,
                ip: "127.0.0.1".to_string(),
                device: "Unknown device".to_string(),
            },
        }
    }
}
