use tracing::{debug, info, warn};

use super::{AuthUser, Authenticator};
use crate::activity::Activity;
use crate::db::{SigninOutcome, User};
use crate::error::{AuthError, is_unique_violation};
use crate::providers::Provider;
use crate::tokens::{IssuedTokens, SessionTokens, generate_token, hash_token};

/// Digest collisions are astronomically unlikely; a few attempts is plenty.
const MAX_ISSUE_ATTEMPTS: usize = 3;

impl Authenticator {
    /// Mint a token pair for `user` and persist it as the first session of a
    /// new lineage.
    pub async fn issue_session(
        &self,
        user: &User,
        provider: Provider,
        activity: &Activity,
    ) -> Result<SessionTokens, AuthError> {
        self.issue_in_lineage(user, provider, activity, &generate_token())
            .await
    }

    async fn issue_in_lineage(
        &self,
        user: &User,
        provider: Provider,
        activity: &Activity,
        lineage_id: &str,
    ) -> Result<SessionTokens, AuthError> {
        let sessions = self.db.sessions();

        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let issued = IssuedTokens::mint(&self.config, activity.time);
            let created = self
                .store("Failed to create session", async {
                    match sessions
                        .create(user.id, lineage_id, provider, &issued, activity)
                        .await
                    {
                        Ok(id) => Ok(Some(id)),
                        Err(e) if is_unique_violation(&e) => Ok(None),
                        Err(e) => Err(e),
                    }
                })
                .await?;

            if let Some(session_id) = created {
                self.store(
                    "Failed to update activity",
                    self.db.users().touch_active(user.id, activity.time),
                )
                .await?;
                debug!(user_id = user.id, session_id, "Session issued");
                return Ok(issued.tokens);
            }
            warn!(user_id = user.id, "Token digest collision, retrying");
        }

        Err(AuthError::Internal("could not issue unique session tokens".into()))
    }

    /// Exchange a refresh token for a new session. The refresh token is
    /// consumed whether or not the rest succeeds.
    pub async fn signin_refresh(
        &self,
        refresh_token: &str,
        activity: Activity,
    ) -> Result<AuthUser, AuthError> {
        let session = self
            .store(
                "Failed to consume refresh token",
                self.db
                    .sessions()
                    .consume_refresh(&hash_token(refresh_token), activity.time),
            )
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        let user = self
            .store("Failed to load user", self.db.users().get_by_id(session.user_id))
            .await?;
        let Some(user) = user.filter(|u| u.is_active) else {
            return Err(AuthError::InvalidRefreshToken);
        };

        let outcome = if session.activity.device != activity.device {
            warn!(
                user_id = user.id,
                session_id = session.id,
                issued_device = %session.activity.device,
                device = %activity.device,
                "Refresh from a different device"
            );
            SigninOutcome::Flagged
        } else {
            SigninOutcome::Success
        };

        let tokens = self
            .issue_in_lineage(&user, session.provider, &activity, &session.lineage_id)
            .await?;
        self.record_signin(user.id, &activity, outcome).await;

        Ok(AuthUser::signed_in(
            &user,
            session.provider,
            Some(tokens),
            activity,
        ))
    }

    /// Authenticate a request by its auth token and slide the token's expiry
    /// forward. A device change kills the session and everything rotated from
    /// the same sign-in.
    pub async fn verify_session(
        &self,
        auth_token: &str,
        activity: Activity,
    ) -> Result<AuthUser, AuthError> {
        let now = activity.time;
        let sessions = self.db.sessions();

        let session = self
            .store(
                "Failed to load session",
                sessions.get_by_auth_hash(&hash_token(auth_token), now),
            )
            .await?
            .ok_or(AuthError::InvalidAuthToken)?;

        if session.activity.device != activity.device {
            warn!(
                user_id = session.user_id,
                session_id = session.id,
                issued_device = %session.activity.device,
                device = %activity.device,
                ip = %activity.ip,
                "Session used from a different device, invalidating"
            );
            self.store(
                "Failed to delete sessions",
                sessions.delete_lineage(&session.lineage_id),
            )
            .await?;
            self.record_signin(session.user_id, &activity, SigninOutcome::Flagged)
                .await;
            return Err(AuthError::InvalidAuthToken);
        }

        let user = self
            .store("Failed to load user", self.db.users().get_by_id(session.user_id))
            .await?;
        let Some(user) = user.filter(|u| u.is_active) else {
            return Err(AuthError::InvalidAuthToken);
        };

        let auth_token_expiry = now + self.config.auth_token_idle_secs();
        let extended = self
            .store(
                "Failed to extend session",
                sessions.extend_auth(session.id, now, auth_token_expiry),
            )
            .await?;
        if !extended {
            return Err(AuthError::InvalidAuthToken);
        }

        self.store(
            "Failed to update activity",
            self.db.users().touch_active(user.id, now),
        )
        .await?;

        let tokens = SessionTokens {
            auth_token: auth_token.to_string(),
            auth_token_expiry,
            refresh_token: None,
            refresh_token_expiry: session.refresh_token_expiry,
        };

        Ok(AuthUser::signed_in(
            &user,
            session.provider,
            Some(tokens),
            session.activity,
        ))
    }

    /// End the session owning `auth_token`, along with any session rotated
    /// from the same sign-in. Unknown tokens are ignored.
    pub async fn signout(&self, auth_token: &str) -> Result<(), AuthError> {
        let count = self
            .store(
                "Failed to delete sessions",
                self.db
                    .sessions()
                    .delete_lineage_by_auth_hash(&hash_token(auth_token)),
            )
            .await?;
        if count > 0 {
            debug!(count, "Signed out");
        }
        Ok(())
    }

    /// End every session of the user. Returns how many were ended.
    pub async fn signout_everywhere(&self, user: &AuthUser) -> Result<u64, AuthError> {
        let id = user.id().ok_or(AuthError::Unauthorized)?;
        let count = self
            .store(
                "Failed to delete sessions",
                self.db.sessions().delete_all_by_user(id),
            )
            .await?;
        info!(user_id = id, count, "Signed out everywhere");
        Ok(count)
    }
}
