use sqlx::sqlite::SqlitePool;

/// Store for pending email verification codes.
///
/// Codes are keyed by their hash and single-use: `take` removes the row in the
/// same statement that reads it.
#[derive(Clone)]
pub struct EmailVerifyStore {
    pool: SqlitePool,
}

impl EmailVerifyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a code for an email.
    pub async fn store(&self, code_hash: &str, email: &str, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO email_verifications (code_hash, email, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(code_hash)
        .bind(email)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Consume a code, returning its email if it was created at or after
    /// `not_before`. An expired code is removed too.
    pub async fn take(
        &self,
        code_hash: &str,
        not_before: i64,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "DELETE FROM email_verifications WHERE code_hash = ? RETURNING email, created_at",
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .filter(|(_, created_at)| *created_at >= not_before)
            .map(|(email, _)| email))
    }

    /// Remove codes created before `cutoff`.
    pub async fn cleanup_expired(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM email_verifications WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
