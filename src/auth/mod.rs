//! Session and identity authentication.
//!
//! Opaque token pairs: auth tokens slide forward on every verified request
//! (24h idle), refresh tokens are single-use and expire 30 days after issue.
//! Both are stored as SHA-256 digests. A session whose device signature
//! changes is treated as hijacked.
//!
//! Every operation takes `activity.time` as the current time.

mod credentials;
mod history;
mod session;
mod types;

use std::future::Future;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::{Database, UserStore};
use crate::error::{AuthError, bounded};
use crate::password::PasswordHasher;
use crate::providers::ProviderRegistry;
use crate::tokens::generate_token;

pub use types::AuthUser;

/// Entry point for sign-in, session verification and user lifecycle calls.
///
/// Cheap to share behind an `Arc`; holds no per-request state.
pub struct Authenticator {
    pub(crate) db: Database,
    /// Kept alongside `db` so bulk reads can borrow it for the stream lifetime
    pub(crate) users: UserStore,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) hasher: Arc<dyn PasswordHasher>,
    pub(crate) config: AuthConfig,
    /// Verified against when the email is unknown, so timing matches a real user
    dummy_hash: String,
}

impl Authenticator {
    pub fn new(
        db: Database,
        registry: Arc<ProviderRegistry>,
        hasher: Arc<dyn PasswordHasher>,
        config: AuthConfig,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hasher.hash(&generate_token())?;
        Ok(Self {
            users: db.users(),
            db,
            registry,
            hasher,
            config,
            dummy_hash,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run a store call under the configured deadline.
    pub(crate) async fn store<T, F>(&self, context: &str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        bounded(self.config.store_timeout, context, fut).await
    }

    /// Hash a password off the async runtime.
    pub(crate) async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))?
    }

    /// Verify a password off the async runtime. `None` verifies against the
    /// dummy hash and always fails.
    pub(crate) async fn check_password(
        &self,
        hash: Option<&str>,
        password: &str,
    ) -> Result<bool, AuthError> {
        let known = hash.is_some();
        let hash = hash.unwrap_or(&self.dummy_hash).to_string();
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|e| AuthError::Internal(format!("password verify task failed: {e}")))?;
        Ok(known && matches)
    }
}
