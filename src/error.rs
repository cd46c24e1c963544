//! Error kinds surfaced to callers of the authenticator.
//!
//! Authentication failures never say whether an email exists, authorization
//! failures never say which rule was violated, and store failures are logged
//! where they are mapped so callers only see the kind.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, warn};

/// Fields a caller may supply on a user record. Timestamps and ids are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UserField {
    Email,
    FullName,
    NameToUse,
    IsActive,
    Roles,
    Password,
}

impl UserField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserField::Email => "email",
            UserField::FullName => "fullName",
            UserField::NameToUse => "nameToUse",
            UserField::IsActive => "isActive",
            UserField::Roles => "roles",
            UserField::Password => "password",
        }
    }
}

/// A field-specific validation failure, safe to show to an end user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: UserField,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: UserField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email and password don't match")]
    InvalidCredentials,

    #[error("invalid provider token")]
    InvalidProviderToken,

    #[error("identity provider unavailable, try again")]
    ProviderUnavailable,

    #[error("invalid or expired auth token")]
    InvalidAuthToken,

    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("invalid email verification code")]
    InvalidVerifyCode,

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("email already registered")]
    DuplicateEmail,

    #[error("store unavailable, try again")]
    StoreUnavailable,

    #[error("store error: {0}")]
    StoreError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::StoreUnavailable | AuthError::ProviderUnavailable
        )
    }
}

/// Extension trait for concise store error mapping on Results.
pub trait StoreResultExt<T> {
    fn store_err(self, context: &str) -> Result<T, AuthError>;
}

impl<T> StoreResultExt<T> for Result<T, sqlx::Error> {
    fn store_err(self, context: &str) -> Result<T, AuthError> {
        self.map_err(|e| from_store(context, e))
    }
}

/// Map a store error to its kind, logging the detail.
pub fn from_store(context: &str, e: sqlx::Error) -> AuthError {
    if is_transient(&e) {
        warn!(error = %e, "{}: store unavailable", context);
        return AuthError::StoreUnavailable;
    }
    error!(error = %e, "{}", context);
    AuthError::StoreError(context.to_string())
}

/// Whether the error is a unique constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        // SQLITE_BUSY and SQLITE_LOCKED
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}

/// Run a store call under a deadline.
pub async fn bounded<T, F>(limit: Duration, context: &str, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.store_err(context),
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "{}: timed out", context);
            Err(AuthError::StoreUnavailable)
        }
    }
}
