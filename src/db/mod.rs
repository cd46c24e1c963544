mod email_verify;
mod history;
mod session;
mod user;

use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use email_verify::EmailVerifyStore;
pub use history::{SigninEvent, SigninHistoryStore, SigninOutcome};
pub use session::{SessionRecord, SessionStore};
pub use user::{NewUserRecord, Roles, User, UserStore, WriteOutcome};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let pool = if path == ":memory:" {
            // Every connection to sqlite::memory: is its own database, so keep
            // exactly one alive for the lifetime of the pool.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect("sqlite::memory:")
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&format!("sqlite:{}?mode=rwc", path))
                .await?
        };

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }
        if version < 2 {
            self.migrate_v2().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Users table. Timestamps are unix seconds.
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    full_name TEXT NOT NULL,
                    name_to_use TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    roles INTEGER NOT NULL DEFAULT 0,
                    password_hash TEXT,
                    authorized_provider INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    active_at INTEGER NOT NULL DEFAULT 0
                )",
                // Sessions: one row per issued token pair, tokens stored hashed
                "CREATE TABLE sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    provider INTEGER NOT NULL,
                    auth_token_hash TEXT UNIQUE NOT NULL,
                    auth_token_expiry INTEGER NOT NULL,
                    refresh_token_hash TEXT UNIQUE NOT NULL,
                    refresh_token_expiry INTEGER NOT NULL,
                    refresh_consumed INTEGER NOT NULL DEFAULT 0,
                    signin_time INTEGER NOT NULL,
                    signin_ip TEXT NOT NULL,
                    signin_device TEXT NOT NULL
                )",
                "CREATE INDEX idx_sessions_user_id ON sessions(user_id)",
                "CREATE INDEX idx_sessions_expiry ON sessions(auth_token_expiry, refresh_token_expiry)",
                // Signin history ledger
                "CREATE TABLE signin_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    time INTEGER NOT NULL,
                    ip TEXT NOT NULL,
                    device TEXT NOT NULL,
                    outcome TEXT NOT NULL
                )",
                "CREATE INDEX idx_signin_history_user_time ON signin_history(user_id, time)",
                "CREATE INDEX idx_signin_history_time ON signin_history(time)",
                // Pending email verifications for new users
                "CREATE TABLE email_verifications (
                    code_hash TEXT PRIMARY KEY,
                    email TEXT NOT NULL COLLATE NOCASE,
                    created_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_email_verifications_created_at ON email_verifications(created_at)",
            ],
        )
        .await
    }

    /// Sessions created by refreshing share the lineage of the session they
    /// replaced, so an anomaly can end the whole chain.
    async fn migrate_v2(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            2,
            &[
                "ALTER TABLE sessions ADD COLUMN lineage_id TEXT NOT NULL DEFAULT ''",
                "UPDATE sessions SET lineage_id = CAST(id AS TEXT) WHERE lineage_id = ''",
                "CREATE INDEX idx_sessions_lineage_id ON sessions(lineage_id)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the session store.
    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.pool.clone())
    }

    /// Get the signin history store.
    pub fn signin_history(&self) -> SigninHistoryStore {
        SigninHistoryStore::new(self.pool.clone())
    }

    /// Get the email verification store.
    pub fn email_verifications(&self) -> EmailVerifyStore {
        EmailVerifyStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
