//! Authentication policy configuration.
//!
//! Built once at startup and handed to the `Authenticator` by value. Nothing here
//! is mutated afterwards.

use std::time::Duration;

/// Maximum time an auth token stays valid without any verified activity.
pub const AUTH_TOKEN_MAX_IDLE_HOURS: u64 = 24;

/// How far in the future refresh tokens expire. Refresh tokens are also
/// consumed immediately when used.
pub const REFRESH_TOKEN_MAX_AGE_DAYS: u64 = 30;

/// How long a new user has to answer their verification email.
pub const EMAIL_VERIFICATION_MAX_AGE_HOURS: u64 = 24;

/// How long signin history is kept.
pub const SIGNIN_EVENT_MAX_AGE_DAYS: u64 = 90;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Upper bound for each store call. Elapsed calls surface as `StoreUnavailable`.
    pub store_timeout: Duration,
    /// Sliding idle window of auth tokens
    pub auth_token_max_idle: Duration,
    /// Fixed lifetime of refresh tokens
    pub refresh_token_max_age: Duration,
    pub email_verification_max_age: Duration,
    /// Signin events older than this are purged by the sweep
    pub signin_retention: Duration,
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            auth_token_max_idle: Duration::from_secs(AUTH_TOKEN_MAX_IDLE_HOURS * HOUR),
            refresh_token_max_age: Duration::from_secs(REFRESH_TOKEN_MAX_AGE_DAYS * DAY),
            email_verification_max_age: Duration::from_secs(
                EMAIL_VERIFICATION_MAX_AGE_HOURS * HOUR,
            ),
            signin_retention: Duration::from_secs(SIGNIN_EVENT_MAX_AGE_DAYS * DAY),
            min_password_length: MIN_PASSWORD_LENGTH,
        }
    }
}

impl AuthConfig {
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub(crate) fn auth_token_idle_secs(&self) -> i64 {
        self.auth_token_max_idle.as_secs() as i64
    }

    pub(crate) fn refresh_token_age_secs(&self) -> i64 {
        self.refresh_token_max_age.as_secs() as i64
    }

    pub(crate) fn email_verification_secs(&self) -> i64 {
        self.email_verification_max_age.as_secs() as i64
    }

    pub(crate) fn signin_retention_secs(&self) -> i64 {
        self.signin_retention.as_secs() as i64
    }
}
