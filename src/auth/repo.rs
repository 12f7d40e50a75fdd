use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::auth::repo_types::{UserRecord, UserRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already exists")]
    UsernameTaken,
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistent collection of user records.
///
/// `insert` checks username before email and must not let a concurrent insert
/// of a colliding record slip in between the check and the write.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<UserRecord>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>>;
    async fn insert(&self, record: &UserRecord) -> Result<(), StoreError>;
}

const SELECT_USER: &str = r#"
    SELECT username, email, password_hash, auth_method, display_name, avatar_url, created_at
    FROM users
"#;

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.db)
            .await
            .context("find user by username")?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn insert(&self, record: &UserRecord) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        // Serializes concurrent signups; plain reads are not blocked.
        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .context("lock users")?;

        let by_name: Option<(String,)> =
            sqlx::query_as("SELECT username FROM users WHERE username = $1")
                .bind(&record.username)
                .fetch_optional(&mut *tx)
                .await
                .context("check username")?;
        if by_name.is_some() {
            return Err(StoreError::UsernameTaken);
        }

        let by_email: Option<(String,)> =
            sqlx::query_as("SELECT username FROM users WHERE email = $1")
                .bind(&record.email)
                .fetch_optional(&mut *tx)
                .await
                .context("check email")?;
        if by_email.is_some() {
            return Err(StoreError::EmailTaken);
        }

        sqlx::query(
            r#"
            INSERT INTO users
                (username, email, password_hash, auth_method, display_name, avatar_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.username)
        .bind(&record.email)
        .bind(record.password_hash.as_deref())
        .bind(record.auth_method.as_str())
        .bind(record.display_name.as_deref())
        .bind(record.avatar_url.as_deref())
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        tx.commit().await.context("commit tx")?;
        Ok(())
    }
}

fn map_unique_violation(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.constraint() {
            Some("users_pkey") => return StoreError::UsernameTaken,
            Some("users_email_key") => return StoreError::EmailTaken,
            _ => {}
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context("insert user"))
}
