use tracing::warn;

use super::Authenticator;
use crate::activity::{Activity, unix_now};
use crate::db::{SigninEvent, SigninOutcome};
use crate::error::AuthError;

impl Authenticator {
    /// Append to the sign-in ledger. Failures are logged and never reach the
    /// caller.
    pub(crate) async fn record_signin(
        &self,
        user_id: i64,
        activity: &Activity,
        outcome: SigninOutcome,
    ) {
        let result = self
            .store(
                "Failed to record signin event",
                self.db.signin_history().append(user_id, activity, outcome),
            )
            .await;
        if let Err(e) = result {
            warn!(user_id, outcome = outcome.as_str(), error = %e, "Signin event dropped");
        }
    }

    /// Up to `n` sign-in events of a user within the retention window, newest
    /// first.
    pub async fn recent_signins(&self, user_id: i64, n: u32) -> Result<Vec<SigninEvent>, AuthError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let since = unix_now() - self.config.signin_retention_secs();
        self.store(
            "Failed to load signin history",
            self.db.signin_history().recent(user_id, since, n),
        )
        .await
    }
}
