//! User repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{from_millis, to_millis, User};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Insert or refresh a user. `created_at` is kept from the first insert.
    async fn upsert(&self, user: &User) -> Result<()>;
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    email: String,
    access_token: String,
    refresh_token: String,
    authorization_code: String,
    created_at: i64,
}

impl TryFrom<UserRow> for User {
    type Error = LibraryError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            email: row.email,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            authorization_code: row.authorization_code,
            created_at: from_millis("created_at", row.created_at)?,
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, access_token, refresh_token, authorization_code, created_at \
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, access_token, refresh_token, authorization_code, created_at \
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn upsert(&self, user: &User) -> Result<()> {
        user.validate()
            .map_err(|msg| LibraryError::invalid_input("user", msg))?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, access_token, refresh_token, authorization_code, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                authorization_code = excluded.authorization_code
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.access_token)
        .bind(&user.refresh_token)
        .bind(&user.authorization_code)
        .bind(to_millis(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(LibraryError::from)
        .map_err(|e| {
            if e.is_unique_violation() {
                LibraryError::invalid_input("email", "already registered to another user")
            } else {
                e
            }
        })?;

        Ok(())
    }
}
