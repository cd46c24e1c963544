//! Session storage: one row per issued auth/refresh token pair.
//!
//! Tokens are stored as SHA-256 digests. A session lives until it is signed out,
//! invalidated on anomaly, or both of its tokens are dead and the sweep
//! removes it.
//!
//! Rotating a refresh token creates a new row in the same lineage as the row it
//! consumed. Sign-out and anomaly handling end a whole lineage at once.

use sqlx::sqlite::SqlitePool;

use crate::activity::Activity;
use crate::providers::Provider;
use crate::tokens::IssuedTokens;

/// A stored session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub user_id: i64,
    /// Shared by every session descended from the same sign-in
    pub lineage_id: String,
    pub provider: Provider,
    pub auth_token_expiry: i64,
    pub refresh_token_expiry: i64,
    pub refresh_consumed: bool,
    /// Where the token pair was issued (sign-in or last rotation)
    pub activity: Activity,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    user_id: i64,
    lineage_id: String,
    provider: i64,
    auth_token_expiry: i64,
    refresh_token_expiry: i64,
    refresh_consumed: i32,
    signin_time: i64,
    signin_ip: String,
    signin_device: String,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            lineage_id: row.lineage_id,
            provider: Provider::from_i64(row.provider).unwrap_or(Provider::Email),
            auth_token_expiry: row.auth_token_expiry,
            refresh_token_expiry: row.refresh_token_expiry,
            refresh_consumed: row.refresh_consumed != 0,
            activity: Activity {
                time: row.signin_time,
                ip: row.signin_ip,
                device: row.signin_device,
            },
        }
    }
}

/// Store for managing sessions.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new session record. Fails with a unique violation on a token
    /// digest collision.
    pub async fn create(
        &self,
        user_id: i64,
        lineage_id: &str,
        provider: Provider,
        issued: &IssuedTokens,
        activity: &Activity,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO sessions (user_id, lineage_id, provider, auth_token_hash, auth_token_expiry,
                refresh_token_hash, refresh_token_expiry, signin_time, signin_ip, signin_device)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(lineage_id)
        .bind(provider.as_i64())
        .bind(&issued.auth_hash)
        .bind(issued.tokens.auth_token_expiry)
        .bind(&issued.refresh_hash)
        .bind(issued.tokens.refresh_token_expiry)
        .bind(activity.time)
        .bind(&activity.ip)
        .bind(&activity.device)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get the session owning an unexpired auth token.
    pub async fn get_by_auth_hash(
        &self,
        auth_hash: &str,
        now: i64,
    ) -> Result<Option<SessionRecord>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, lineage_id, provider, auth_token_expiry, refresh_token_expiry,
                refresh_consumed, signin_time, signin_ip, signin_device
             FROM sessions WHERE auth_token_hash = ? AND auth_token_expiry > ?",
        )
        .bind(auth_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SessionRecord::from))
    }

    /// Slide the auth token expiry forward, only if it has not expired or been
    /// deleted in the meantime.
    pub async fn extend_auth(
        &self,
        id: i64,
        now: i64,
        new_expiry: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET auth_token_expiry = ? WHERE id = ? AND auth_token_expiry > ?",
        )
        .bind(new_expiry)
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically mark an unexpired, unconsumed refresh token as consumed and
    /// return its session. Two concurrent calls cannot both succeed.
    pub async fn consume_refresh(
        &self,
        refresh_hash: &str,
        now: i64,
    ) -> Result<Option<SessionRecord>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as(
            "UPDATE sessions SET refresh_consumed = 1
             WHERE refresh_token_hash = ? AND refresh_consumed = 0 AND refresh_token_expiry > ?
             RETURNING id, user_id, lineage_id, provider, auth_token_expiry, refresh_token_expiry,
                refresh_consumed, signin_time, signin_ip, signin_device",
        )
        .bind(refresh_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SessionRecord::from))
    }

    /// Delete every session of a lineage, killing all of their tokens.
    pub async fn delete_lineage(&self, lineage_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE lineage_id = ?")
            .bind(lineage_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete the lineage of the session owning an auth token (sign out).
    pub async fn delete_lineage_by_auth_hash(&self, auth_hash: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE lineage_id =
                (SELECT lineage_id FROM sessions WHERE auth_token_hash = ?)",
        )
        .bind(auth_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete all sessions for a user (sign out everywhere).
    pub async fn delete_all_by_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete sessions whose auth token expired and whose refresh token is
    /// expired or already used.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM sessions
             WHERE auth_token_expiry <= ? AND (refresh_token_expiry <= ? OR refresh_consumed = 1)",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List live sessions for a user, newest first.
    pub async fn list_by_user(
        &self,
        user_id: i64,
        now: i64,
    ) -> Result<Vec<SessionRecord>, sqlx::Error> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, lineage_id, provider, auth_token_expiry, refresh_token_expiry,
                refresh_consumed, signin_time, signin_ip, signin_device
             FROM sessions
             WHERE user_id = ? AND (auth_token_expiry > ? OR (refresh_consumed = 0 AND refresh_token_expiry > ?))
             ORDER BY signin_time DESC, id DESC",
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SessionRecord::from).collect())
    }
}
