use std::ops::{BitAnd, BitOr};

use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::error::is_unique_violation;
use crate::providers::Provider;

/// Role bitmask for authorization. SUPER outranks ADMIN outranks none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(u8);

impl Roles {
    pub const NONE: Roles = Roles(0);
    pub const ADMIN: Roles = Roles(1);
    pub const SUPER: Roles = Roles(2);
    const ALL: u8 = 1 | 2;

    /// Unknown bits are dropped.
    pub fn from_bits(bits: i64) -> Self {
        Roles((bits & Self::ALL as i64) as u8)
    }

    pub fn bits(&self) -> i64 {
        self.0 as i64
    }

    pub fn contains(&self, other: Roles) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Roles) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Roles in `self` that are not in `other`.
    pub fn difference(&self, other: Roles) -> Roles {
        Roles(self.0 & !other.0)
    }

    /// Rank of the highest role held: 2 for SUPER, 1 for ADMIN, 0 otherwise.
    pub fn rank(&self) -> u8 {
        if self.contains(Roles::SUPER) {
            2
        } else if self.contains(Roles::ADMIN) {
            1
        } else {
            0
        }
    }
}

impl BitOr for Roles {
    type Output = Roles;
    fn bitor(self, rhs: Roles) -> Roles {
        Roles(self.0 | rhs.0)
    }
}

impl BitAnd for Roles {
    type Output = Roles;
    fn bitand(self, rhs: Roles) -> Roles {
        Roles(self.0 & rhs.0)
    }
}

/// The durable user record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub name_to_use: String,
    pub is_active: bool,
    pub roles: Roles,
    pub authorized_provider: Provider,
    pub created_at: i64,
    pub updated_at: i64,
    pub active_at: i64,
    #[serde(skip)]
    pub(crate) password_hash: Option<String>,
}

impl User {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    full_name: String,
    name_to_use: String,
    is_active: i32,
    roles: i64,
    password_hash: Option<String>,
    authorized_provider: i64,
    created_at: i64,
    updated_at: i64,
    active_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let mut roles = Roles::from_bits(row.roles);
        // The first user is always a superuser
        if row.id == 1 {
            roles = roles | Roles::SUPER;
        }
        Self {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            name_to_use: row.name_to_use,
            is_active: row.is_active != 0,
            roles,
            password_hash: row.password_hash,
            authorized_provider: Provider::from_i64(row.authorized_provider)
                .unwrap_or(Provider::Email),
            created_at: row.created_at,
            updated_at: row.updated_at,
            active_at: row.active_at,
        }
    }
}

/// Everything needed to insert a user. Roles must already be masked.
#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub email: String,
    pub full_name: String,
    pub name_to_use: String,
    pub is_active: bool,
    pub roles: Roles,
    pub password_hash: Option<String>,
    pub authorized_provider: Provider,
    pub now: i64,
}

/// Result of a write that may hit the unique email constraint.
#[derive(Debug)]
pub enum WriteOutcome<T> {
    Written(T),
    DuplicateEmail,
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user. If the store assigns id 1 the user also gets SUPER,
    /// inside the same transaction.
    pub async fn insert(&self, record: &NewUserRecord) -> Result<WriteOutcome<User>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO users (email, full_name, name_to_use, is_active, roles, password_hash,
                authorized_provider, created_at, updated_at, active_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&record.email)
        .bind(&record.full_name)
        .bind(&record.name_to_use)
        .bind(record.is_active as i32)
        .bind(record.roles.bits())
        .bind(&record.password_hash)
        .bind(record.authorized_provider.as_i64())
        .bind(record.now)
        .bind(record.now)
        .execute(&mut *tx)
        .await;

        let id = match result {
            Ok(r) => r.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => return Ok(WriteOutcome::DuplicateEmail),
            Err(e) => return Err(e),
        };

        let mut roles = record.roles;
        if id == 1 {
            roles = roles | Roles::SUPER;
            sqlx::query("UPDATE users SET roles = ? WHERE id = ?")
                .bind(roles.bits())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(WriteOutcome::Written(User {
            id,
            email: record.email.clone(),
            full_name: record.full_name.clone(),
            name_to_use: record.name_to_use.clone(),
            is_active: record.is_active,
            roles,
            authorized_provider: record.authorized_provider,
            created_at: record.now,
            updated_at: record.now,
            active_at: 0,
            password_hash: record.password_hash.clone(),
        }))
    }

    /// Insert a SUPER user only if the table is empty. Returns None when users
    /// already exist.
    pub async fn insert_first(&self, record: &NewUserRecord) -> Result<Option<User>, sqlx::Error> {
        let roles = record.roles | Roles::SUPER;
        let result = sqlx::query(
            "INSERT INTO users (email, full_name, name_to_use, is_active, roles, password_hash,
                authorized_provider, created_at, updated_at, active_at)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, 0
             WHERE NOT EXISTS (SELECT 1 FROM users)",
        )
        .bind(&record.email)
        .bind(&record.full_name)
        .bind(&record.name_to_use)
        .bind(record.is_active as i32)
        .bind(roles.bits())
        .bind(&record.password_hash)
        .bind(record.authorized_provider.as_i64())
        .bind(record.now)
        .bind(record.now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(result.last_insert_rowid()).await
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, full_name, name_to_use, is_active, roles, password_hash,
                authorized_provider, created_at, updated_at, active_at
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, full_name, name_to_use, is_active, roles, password_hash,
                authorized_provider, created_at, updated_at, active_at
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Write every mutable column of `user`. Returns false if the row is gone.
    pub async fn update(&self, user: &User) -> Result<WriteOutcome<bool>, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET email = ?, full_name = ?, name_to_use = ?, is_active = ?,
                roles = ?, password_hash = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.name_to_use)
        .bind(user.is_active as i32)
        .bind(user.roles.bits())
        .bind(&user.password_hash)
        .bind(user.updated_at)
        .bind(user.id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(WriteOutcome::Written(r.rows_affected() > 0)),
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::DuplicateEmail),
            Err(e) => Err(e),
        }
    }

    /// Record that the user was just seen.
    pub async fn touch_active(&self, id: i64, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET active_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a user by ID.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stream an arbitrary set of users by primary key, ordered by id.
    pub fn stream_by_ids(&self, ids: &[i64]) -> BoxStream<'_, Result<User, sqlx::Error>> {
        let ids = serde_json::Value::from(ids.to_vec()).to_string();
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, full_name, name_to_use, is_active, roles, password_hash,
                authorized_provider, created_at, updated_at, active_at
             FROM users WHERE id IN (SELECT value FROM json_each(?)) ORDER BY id",
        )
        .bind(ids)
        .fetch(&self.pool)
        .map(|row| row.map(User::from))
        .boxed()
    }

    /// Stream up to `n` users starting from id `start`, ordered by id.
    pub fn stream_range(&self, start: i64, n: u32) -> BoxStream<'_, Result<User, sqlx::Error>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, full_name, name_to_use, is_active, roles, password_hash,
                authorized_provider, created_at, updated_at, active_at
             FROM users WHERE id >= ? ORDER BY id LIMIT ?",
        )
        .bind(start)
        .bind(i64::from(n))
        .fetch(&self.pool)
        .map(|row| row.map(User::from))
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use futures::TryStreamExt;

    async fn seed(db: &Database, emails: &[&str]) -> Vec<i64> {
        let mut ids = Vec::new();
        for email in emails {
            let record = NewUserRecord {
                email: email.to_string(),
                full_name: "Test User".to_string(),
                name_to_use: "Test".to_string(),
                is_active: true,
                roles: Roles::NONE,
                password_hash: None,
                authorized_provider: Provider::Email,
                now: 100,
            };
            match db.users().insert(&record).await.unwrap() {
                WriteOutcome::Written(user) => ids.push(user.id),
                WriteOutcome::DuplicateEmail => panic!("unexpected duplicate"),
            }
        }
        ids
    }

    #[test]
    fn test_roles_bits() {
        let both = Roles::ADMIN | Roles::SUPER;
        assert!(both.contains(Roles::ADMIN));
        assert!(both.contains(Roles::SUPER));
        assert_eq!(both.rank(), 2);
        assert_eq!(Roles::ADMIN.rank(), 1);
        assert_eq!(Roles::NONE.rank(), 0);
        assert_eq!(both.difference(Roles::SUPER), Roles::ADMIN);
        assert_eq!(Roles::from_bits(0xff), both);
        assert!((Roles::ADMIN & Roles::SUPER).is_empty());
    }

    #[tokio::test]
    async fn test_stream_by_ids() {
        let db = Database::open(":memory:").await.unwrap();
        let ids = seed(&db, &["a@x.com", "b@x.com", "c@x.com"]).await;

        let users: Vec<User> = db
            .users()
            .stream_by_ids(&[ids[2], ids[0], 999])
            .try_collect()
            .await
            .unwrap();
        let emails: Vec<&str> = users.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.com", "c@x.com"]);

        let none: Vec<User> = db.users().stream_by_ids(&[]).try_collect().await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_stream_range() {
        let db = Database::open(":memory:").await.unwrap();
        let ids = seed(&db, &["a@x.com", "b@x.com", "c@x.com", "d@x.com"]).await;

        let users: Vec<User> = db
            .users()
            .stream_range(ids[1], 2)
            .try_collect()
            .await
            .unwrap();
        let got: Vec<i64> = users.iter().map(|u| u.id).collect();
        assert_eq!(got, vec![ids[1], ids[2]]);

        let none: Vec<User> = db
            .users()
            .stream_range(ids[0], 0)
            .try_collect()
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_duplicate() {
        let db = Database::open(":memory:").await.unwrap();
        let ids = seed(&db, &["a@x.com", "b@x.com"]).await;

        let mut user = db.users().get_by_id(ids[1]).await.unwrap().unwrap();
        user.full_name = "Renamed".to_string();
        user.updated_at = 200;
        assert!(matches!(
            db.users().update(&user).await.unwrap(),
            WriteOutcome::Written(true)
        ));

        let reread = db.users().get_by_id(ids[1]).await.unwrap().unwrap();
        assert_eq!(reread.full_name, "Renamed");
        assert_eq!(reread.updated_at, 200);
        assert_eq!(reread.created_at, 100);

        user.email = "A@X.COM".to_string();
        assert!(matches!(
            db.users().update(&user).await.unwrap(),
            WriteOutcome::DuplicateEmail
        ));
    }

    #[tokio::test]
    async fn test_insert_first_only_when_empty() {
        let db = Database::open(":memory:").await.unwrap();
        let record = NewUserRecord {
            email: "root@x.com".to_string(),
            full_name: "Root".to_string(),
            name_to_use: "Root".to_string(),
            is_active: true,
            roles: Roles::NONE,
            password_hash: None,
            authorized_provider: Provider::Email,
            now: 100,
        };

        let first = db.users().insert_first(&record).await.unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert!(first.roles.contains(Roles::SUPER));

        let again = NewUserRecord {
            email: "other@x.com".to_string(),
            ..record
        };
        assert!(db.users().insert_first(&again).await.unwrap().is_none());
    }
}
