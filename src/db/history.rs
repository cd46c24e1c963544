use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use crate::activity::Activity;

/// What happened on a sign-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SigninOutcome {
    Success,
    Failure,
    /// Allowed or rejected, but the device did not match the session
    Flagged,
}

impl SigninOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigninOutcome::Success => "success",
            SigninOutcome::Failure => "failure",
            SigninOutcome::Flagged => "flagged",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(SigninOutcome::Success),
            "failure" => Some(SigninOutcome::Failure),
            "flagged" => Some(SigninOutcome::Flagged),
            _ => None,
        }
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninEvent {
    pub id: i64,
    pub user_id: i64,
    pub activity: Activity,
    pub outcome: SigninOutcome,
}

#[derive(sqlx::FromRow)]
struct SigninEventRow {
    id: i64,
    user_id: i64,
    time: i64,
    ip: String,
    device: String,
    outcome: String,
}

impl TryFrom<SigninEventRow> for SigninEvent {
    type Error = sqlx::Error;

    fn try_from(row: SigninEventRow) -> Result<Self, Self::Error> {
        let outcome = SigninOutcome::parse(&row.outcome).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown signin outcome: {}", row.outcome).into())
        })?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            activity: Activity {
                time: row.time,
                ip: row.ip,
                device: row.device,
            },
            outcome,
        })
    }
}

/// Append-only sign-in ledger.
pub struct SigninHistoryStore {
    pool: SqlitePool,
}

impl SigninHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        user_id: i64,
        activity: &Activity,
        outcome: SigninOutcome,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO signin_history (user_id, time, ip, device, outcome) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(activity.time)
        .bind(&activity.ip)
        .bind(&activity.device)
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Up to `limit` events at or after `since`, newest first.
    pub async fn recent(
        &self,
        user_id: i64,
        since: i64,
        limit: u32,
    ) -> Result<Vec<SigninEvent>, sqlx::Error> {
        let rows: Vec<SigninEventRow> = sqlx::query_as(
            "SELECT id, user_id, time, ip, device, outcome FROM signin_history
             WHERE user_id = ? AND time >= ?
             ORDER BY time DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SigninEvent::try_from).collect()
    }

    /// Delete events older than `cutoff`.
    pub async fn purge_older_than(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM signin_history WHERE time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
