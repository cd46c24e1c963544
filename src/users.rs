//! User lifecycle: create, update, delete and read user records.
//!
//! Every mutation runs authorize, then validate, then persist. A missing
//! target is reported as `Unauthorized` so callers cannot discover which ids
//! exist.

use futures::stream::{BoxStream, StreamExt};
use tracing::info;

use crate::activity::unix_now;
use crate::auth::{AuthUser, Authenticator};
use crate::db::{NewUserRecord, Roles, User, WriteOutcome};
use crate::error::{AuthError, UserField, ValidationError, from_store};
use crate::gate;
use crate::providers::Provider;

/// A user to be created.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub name_to_use: String,
    pub is_active: bool,
    /// Requested roles; masked by what the creator may grant
    pub roles: Roles,
    /// Required for `Provider::Email` users
    pub password: Option<String>,
    pub authorized_provider: Provider,
}

impl NewUser {
    /// An active Email-provider user with no roles.
    pub fn with_password(
        email: impl Into<String>,
        full_name: impl Into<String>,
        name_to_use: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            full_name: full_name.into(),
            name_to_use: name_to_use.into(),
            is_active: true,
            roles: Roles::NONE,
            password: Some(password.into()),
            authorized_provider: Provider::Email,
        }
    }
}

/// A partial update. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub name_to_use: Option<String>,
    pub is_active: Option<bool>,
    pub roles: Option<Roles>,
    pub password: Option<String>,
    /// Code from [`Authenticator::email_verify_code`] for the new email.
    /// Required when users change their own email.
    pub email_verify_code: Option<String>,
}

impl UserChanges {
    /// Change the email, proving ownership of the new address with `code`.
    pub fn verified_email(email: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            email_verify_code: Some(code.into()),
            ..Default::default()
        }
    }

    /// Fields this update touches.
    pub fn fields(&self) -> Vec<UserField> {
        let mut fields = Vec::new();
        if self.email.is_some() {
            fields.push(UserField::Email);
        }
        if self.full_name.is_some() {
            fields.push(UserField::FullName);
        }
        if self.name_to_use.is_some() {
            fields.push(UserField::NameToUse);
        }
        if self.is_active.is_some() {
            fields.push(UserField::IsActive);
        }
        if self.roles.is_some() {
            fields.push(UserField::Roles);
        }
        if self.password.is_some() {
            fields.push(UserField::Password);
        }
        fields
    }
}

fn require_text(field: UserField, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(
            field,
            format!("{} may not be blank", field.as_str()),
        ));
    }
    Ok(())
}

fn validate_password(password: &str, min_length: usize) -> Result<(), ValidationError> {
    if password.chars().count() < min_length {
        return Err(ValidationError::new(
            UserField::Password,
            format!("password must be at least {} characters", min_length),
        ));
    }
    Ok(())
}

fn validate_new_user(user: &NewUser, min_password_length: usize) -> Result<(), ValidationError> {
    require_text(UserField::Email, &user.email)?;
    require_text(UserField::FullName, &user.full_name)?;
    require_text(UserField::NameToUse, &user.name_to_use)?;
    match &user.password {
        Some(password) => validate_password(password, min_password_length)?,
        None if user.authorized_provider == Provider::Email => {
            return Err(ValidationError::new(
                UserField::Password,
                "password is required",
            ));
        }
        None => {}
    }
    Ok(())
}

fn validate_changes(changes: &UserChanges, min_password_length: usize) -> Result<(), ValidationError> {
    if let Some(email) = &changes.email {
        require_text(UserField::Email, email)?;
    }
    if let Some(full_name) = &changes.full_name {
        require_text(UserField::FullName, full_name)?;
    }
    if let Some(name_to_use) = &changes.name_to_use {
        require_text(UserField::NameToUse, name_to_use)?;
    }
    if let Some(password) = &changes.password {
        validate_password(password, min_password_length)?;
    }
    Ok(())
}

impl Authenticator {
    /// Create a user on behalf of `actor`.
    pub async fn create_user(&self, actor: &AuthUser, mut new: NewUser) -> Result<User, AuthError> {
        if !gate::can_create(actor, &new) {
            return Err(AuthError::Unauthorized);
        }
        if actor.is_new_user() {
            new.email = actor.email().to_string();
            new.authorized_provider = actor.provider();
        }
        new.roles = gate::masked_roles(actor, new.roles);

        validate_new_user(&new, self.config.min_password_length)?;

        let user = self.insert_user(&new).await?;
        info!(user_id = user.id, created_by = ?actor.id(), "User created");
        Ok(user)
    }

    /// Create the first user, with SUPER. Fails once any user exists.
    pub async fn bootstrap_super_user(&self, new: NewUser) -> Result<User, AuthError> {
        validate_new_user(&new, self.config.min_password_length)?;
        let record = self.user_record(&new).await?;

        let user = self
            .store(
                "Failed to create first user",
                self.db.users().insert_first(&record),
            )
            .await?
            .ok_or(AuthError::Unauthorized)?;
        info!(user_id = user.id, email = %user.email, "Super user created");
        Ok(user)
    }

    /// Apply `changes` to user `id` on behalf of `actor`.
    pub async fn update_user(
        &self,
        actor: &AuthUser,
        id: i64,
        changes: UserChanges,
    ) -> Result<User, AuthError> {
        let target = self
            .store("Failed to load user", self.db.users().get_by_id(id))
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !gate::can_update(actor, &target, &changes) {
            return Err(AuthError::Unauthorized);
        }

        validate_changes(&changes, self.config.min_password_length)?;

        if let Some(email) = &changes.email {
            if gate::must_verify_email(actor, &target) {
                self.check_email_code(email, changes.email_verify_code.as_deref())
                    .await?;
            }
        }

        let fields = changes.fields();
        let mut user = target;
        if let Some(email) = changes.email {
            user.email = email.trim().to_string();
        }
        if let Some(full_name) = changes.full_name {
            user.full_name = full_name.trim().to_string();
        }
        if let Some(name_to_use) = changes.name_to_use {
            user.name_to_use = name_to_use.trim().to_string();
        }
        if let Some(is_active) = changes.is_active {
            user.is_active = is_active;
        }
        if let Some(roles) = changes.roles {
            user.roles = if user.id == 1 { roles | Roles::SUPER } else { roles };
        }
        if let Some(password) = changes.password {
            user.password_hash = Some(self.hash_password(&password).await?);
        }
        user.updated_at = unix_now();

        match self
            .store("Failed to update user", self.db.users().update(&user))
            .await?
        {
            WriteOutcome::Written(true) => {
                info!(user_id = user.id, updated_by = ?actor.id(), fields = ?fields, "User updated");
                Ok(user)
            }
            WriteOutcome::Written(false) => Err(AuthError::Unauthorized),
            WriteOutcome::DuplicateEmail => Err(AuthError::DuplicateEmail),
        }
    }

    /// Delete user `id` on behalf of `actor`. Their sessions and history go
    /// with them.
    pub async fn delete_user(&self, actor: &AuthUser, id: i64) -> Result<(), AuthError> {
        let target = self
            .store("Failed to load user", self.db.users().get_by_id(id))
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !gate::can_delete(actor, &target) {
            return Err(AuthError::Unauthorized);
        }

        let deleted = self
            .store("Failed to delete user", self.db.users().delete(id))
            .await?;
        if !deleted {
            return Err(AuthError::Unauthorized);
        }
        info!(user_id = id, deleted_by = ?actor.id(), "User deleted");
        Ok(())
    }

    pub async fn read_user(&self, id: i64) -> Result<Option<User>, AuthError> {
        self.store("Failed to load user", self.db.users().get_by_id(id))
            .await
    }

    /// Lazily read the given users, ordered by id. Unknown ids are skipped.
    pub fn read_users(&self, ids: &[i64]) -> BoxStream<'_, Result<User, AuthError>> {
        self.users
            .stream_by_ids(ids)
            .map(|row| row.map_err(|e| from_store("Failed to read users", e)))
            .boxed()
    }

    /// Lazily read up to `n` users with id at or above `start`.
    pub fn read_user_range(&self, start: i64, n: u32) -> BoxStream<'_, Result<User, AuthError>> {
        self.users
            .stream_range(start, n)
            .map(|row| row.map_err(|e| from_store("Failed to read users", e)))
            .boxed()
    }

    /// Redeem `code` and check that it was issued for `email`.
    async fn check_email_code(&self, email: &str, code: Option<&str>) -> Result<(), AuthError> {
        let code = code.ok_or(AuthError::InvalidVerifyCode)?;
        let verified = self.redeem_verify_code(code, unix_now()).await?;
        if !verified.eq_ignore_ascii_case(email.trim()) {
            return Err(AuthError::InvalidVerifyCode);
        }
        Ok(())
    }

    async fn user_record(&self, new: &NewUser) -> Result<NewUserRecord, AuthError> {
        let password_hash = match &new.password {
            Some(password) => Some(self.hash_password(password).await?),
            None => None,
        };
        Ok(NewUserRecord {
            email: new.email.trim().to_string(),
            full_name: new.full_name.trim().to_string(),
            name_to_use: new.name_to_use.trim().to_string(),
            is_active: new.is_active,
            roles: new.roles,
            password_hash,
            authorized_provider: new.authorized_provider,
            now: unix_now(),
        })
    }

    async fn insert_user(&self, new: &NewUser) -> Result<User, AuthError> {
        // Cheap pre-check so a taken email doesn't pay for hashing
        let exists = self
            .store(
                "Failed to check email",
                self.db.users().email_exists(new.email.trim()),
            )
            .await?;
        if exists {
            return Err(AuthError::DuplicateEmail);
        }

        let record = self.user_record(new).await?;
        match self
            .store("Failed to create user", self.db.users().insert(&record))
            .await?
        {
            WriteOutcome::Written(user) => Ok(user),
            WriteOutcome::DuplicateEmail => Err(AuthError::DuplicateEmail),
        }
    }
}
