//! Scheduled retention sweep for expired sessions, old sign-in history and
//! stale email verification codes.

use crate::activity::unix_now;
use crate::config::AuthConfig;
use crate::db::Database;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Rows removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: u64,
    pub signin_events: u64,
    pub email_verifications: u64,
}

/// Run all cleanup tasks once at time `now`. Failures are logged and the
/// remaining tasks still run.
pub async fn run_cleanup_at(db: &Database, config: &AuthConfig, now: i64) -> CleanupReport {
    let mut report = CleanupReport::default();

    // Sessions with no live token left
    match db.sessions().delete_expired(now).await {
        Ok(count) => {
            report.sessions = count;
            if count > 0 {
                info!("Cleaned up {} expired sessions", count);
            }
        }
        Err(e) => error!("Failed to clean up expired sessions: {}", e),
    }

    match db
        .signin_history()
        .purge_older_than(now - config.signin_retention_secs())
        .await
    {
        Ok(count) => {
            report.signin_events = count;
            if count > 0 {
                info!("Purged {} old signin events", count);
            }
        }
        Err(e) => error!("Failed to purge signin history: {}", e),
    }

    match db
        .email_verifications()
        .cleanup_expired(now - config.email_verification_secs())
        .await
    {
        Ok(count) => {
            report.email_verifications = count;
            if count > 0 {
                info!("Cleaned up {} expired email verifications", count);
            }
        }
        Err(e) => error!("Failed to clean up email verifications: {}", e),
    }

    report
}

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database, config: &AuthConfig) -> CleanupReport {
    run_cleanup_at(db, config, unix_now()).await
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(db: Database, config: AuthConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db, &config).await;
        }
    })
}
