use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record as persisted. Secret fields never serialize outward; the
/// HTTP layer additionally projects into `PublicUser`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar_key: String,
    pub avatar_url: String,
    pub cover_image_key: Option<String>,
    pub cover_image_url: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields for a new user row. `username` and `email` must already be
/// trimmed and lowercased by the caller.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar_key: String,
    pub avatar_url: String,
    pub cover_image_key: Option<String>,
    pub cover_image_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {0}")]
    UniqueViolation(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user matching the given username OR email.
    async fn find_by_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Insert a new user. The store's unique indexes are the real
    /// uniqueness guarantee; duplicates surface as `UniqueViolation`.
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn list(&self) -> Result<Vec<User>, StoreError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;

    /// Overwrite (or clear) the stored refresh token unconditionally.
    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<(), StoreError>;

    /// Rotate the stored refresh token only if it still equals `expected`.
    /// Returns whether the swap happened.
    async fn compare_and_swap_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        next: &str,
    ) -> Result<bool, StoreError>;
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, avatar_key, \
     avatar_url, cover_image_key, cover_image_url, refresh_token, created_at, updated_at";

fn map_create_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some("users_username_key") => StoreError::UniqueViolation("username"),
                Some("users_email_key") => StoreError::UniqueViolation("email"),
                _ => StoreError::UniqueViolation("identity"),
            };
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NOT NULL AND username = $1)
               OR ($2::text IS NOT NULL AND email = $2)
            "#,
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, full_name, password_hash,
                               avatar_key, avatar_url, cover_image_key, cover_image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.full_name)
        .bind(&new_user.password_hash)
        .bind(&new_user.avatar_key)
        .bind(&new_user.avatar_url)
        .bind(&new_user.cover_image_key)
        .bind(&new_user.cover_image_url)
        .fetch_one(&self.db)
        .await
        .map_err(map_create_error)?;
        Ok(user)
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            ORDER BY created_at ASC
            "#,
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn compare_and_swap_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        next: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $3, updated_at = now()
            WHERE id = $1 AND refresh_token = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
