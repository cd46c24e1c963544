use tracing::{debug, error, info, warn};

use super::{AuthUser, Authenticator};
use crate::activity::{Activity, unix_now};
use crate::db::{SigninOutcome, User};
use crate::error::{AuthError, UserField, ValidationError};
use crate::providers::{ExternalIdentity, Provider, ProviderTokenError};
use crate::tokens::{generate_token, hash_token};

impl Authenticator {
    /// Look up the user and check the password. Returns the user if one
    /// exists, and whether the password matched.
    async fn password_matches(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Option<User>, bool), AuthError> {
        let user = self
            .store("Failed to load user", self.db.users().get_by_email(email.trim()))
            .await?;
        let hash = user.as_ref().and_then(|u| u.password_hash.as_deref());
        let matches = self.check_password(hash, password).await?;
        Ok((user, matches))
    }

    /// Check an email and password. Every failure looks the same to the caller.
    pub async fn verify_password(&self, email: &str, password: &str) -> Result<User, AuthError> {
        match self.password_matches(email, password).await? {
            (Some(user), true) if password_signin_allowed(&user) => Ok(user),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    /// Validate a provider token and return the identity it vouches for.
    pub async fn verify_provider_token(
        &self,
        provider: Provider,
        token: &str,
    ) -> Result<ExternalIdentity, AuthError> {
        let Some(config) = self.registry.get(provider) else {
            error!(provider = %provider, "Sign-in attempted with unregistered provider");
            return Err(AuthError::InvalidProviderToken);
        };

        let verified =
            tokio::time::timeout(self.config.store_timeout, config.verifier.verify(&config.client_id, token))
                .await;

        match verified {
            Ok(Ok(identity)) => Ok(identity),
            Ok(Err(ProviderTokenError::Unavailable(e))) => {
                warn!(provider = %provider, error = %e, "Provider unavailable");
                Err(AuthError::ProviderUnavailable)
            }
            Ok(Err(e)) => {
                debug!(provider = %provider, error = %e, "Provider token rejected");
                Err(AuthError::InvalidProviderToken)
            }
            Err(_) => {
                warn!(provider = %provider, "Provider token verification timed out");
                Err(AuthError::ProviderUnavailable)
            }
        }
    }

    /// Sign in with email and password and start a new session.
    pub async fn signin_password(
        &self,
        email: &str,
        password: &str,
        activity: Activity,
    ) -> Result<AuthUser, AuthError> {
        let user = match self.password_matches(email, password).await? {
            (Some(user), true) if password_signin_allowed(&user) => user,
            (Some(user), _) => {
                self.record_signin(user.id, &activity, SigninOutcome::Failure)
                    .await;
                return Err(AuthError::InvalidCredentials);
            }
            (None, _) => return Err(AuthError::InvalidCredentials),
        };

        let tokens = self.issue_session(&user, Provider::Email, &activity).await?;
        self.record_signin(user.id, &activity, SigninOutcome::Success)
            .await;
        info!(user_id = user.id, "Password sign-in");

        Ok(AuthUser::signed_in(
            &user,
            Provider::Email,
            Some(tokens),
            activity,
        ))
    }

    /// Sign in with a token from an external provider. The user must exist, be
    /// active and be authorized for that provider.
    pub async fn signin_provider(
        &self,
        provider: Provider,
        token: &str,
        activity: Activity,
    ) -> Result<AuthUser, AuthError> {
        let identity = self.verify_provider_token(provider, token).await?;

        let user = self
            .store(
                "Failed to load user",
                self.db.users().get_by_email(&identity.email),
            )
            .await?;
        let user = match user {
            Some(user) if user.is_active && user.authorized_provider == provider => user,
            Some(user) => {
                self.record_signin(user.id, &activity, SigninOutcome::Failure)
                    .await;
                return Err(AuthError::InvalidCredentials);
            }
            None => return Err(AuthError::InvalidCredentials),
        };

        let tokens = self.issue_session(&user, provider, &activity).await?;
        self.record_signin(user.id, &activity, SigninOutcome::Success)
            .await;
        info!(user_id = user.id, provider = %provider, "Provider sign-in");

        Ok(AuthUser::signed_in(&user, provider, Some(tokens), activity))
    }

    /// Start verification of an email address. The returned code is delivered
    /// out of band and redeemed with [`Self::new_user_email`], or with an email
    /// change through [`Self::update_user`]. A code is issued whether or not
    /// the address is already registered.
    pub async fn email_verify_code(&self, email: &str) -> Result<String, AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ValidationError::new(UserField::Email, "email may not be blank").into());
        }

        let code = generate_token();
        self.store(
            "Failed to store verification code",
            self.db
                .email_verifications()
                .store(&hash_token(&code), email, unix_now()),
        )
        .await?;

        Ok(code)
    }

    /// Redeem a verification code for the right to create one user with that
    /// email.
    pub async fn new_user_email(
        &self,
        code: &str,
        activity: Activity,
    ) -> Result<AuthUser, AuthError> {
        let email = self.redeem_verify_code(code, activity.time).await?;

        let exists = self
            .store("Failed to check email", self.db.users().email_exists(&email))
            .await?;
        if exists {
            return Err(AuthError::DuplicateEmail);
        }

        Ok(AuthUser::new_user(email, Provider::Email, activity))
    }

    /// Consume a verification code issued within the validity window and
    /// return the address it verifies.
    pub(crate) async fn redeem_verify_code(&self, code: &str, now: i64) -> Result<String, AuthError> {
        let not_before = now - self.config.email_verification_secs();
        self.store(
            "Failed to redeem verification code",
            self.db
                .email_verifications()
                .take(&hash_token(code), not_before),
        )
        .await?
        .ok_or(AuthError::InvalidVerifyCode)
    }

    /// Turn a provider token for an unregistered email into the right to create
    /// that user.
    pub async fn new_user_provider(
        &self,
        provider: Provider,
        token: &str,
        activity: Activity,
    ) -> Result<AuthUser, AuthError> {
        let identity = self.verify_provider_token(provider, token).await?;

        let exists = self
            .store(
                "Failed to check email",
                self.db.users().email_exists(&identity.email),
            )
            .await?;
        if exists {
            return Err(AuthError::DuplicateEmail);
        }

        Ok(AuthUser::new_user(identity.email, provider, activity))
    }
}

fn password_signin_allowed(user: &User) -> bool {
    user.is_active && user.authorized_provider == Provider::Email && user.has_password()
}
