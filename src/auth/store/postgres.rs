//! Postgres stores
//!
//! Expected tables (schema is managed outside this crate):
//!
//! ```text
//! refresh_tokens(id UUID PRIMARY KEY, token TEXT NOT NULL UNIQUE, user_id UUID NOT NULL,
//!                created_at TIMESTAMPTZ NOT NULL, expires_at TIMESTAMPTZ NOT NULL,
//!                revoked_at TIMESTAMPTZ, replaced_by_token TEXT, revoked_reason TEXT)
//! users(id UUID PRIMARY KEY, first_name TEXT NOT NULL, last_name TEXT NOT NULL,
//!       email TEXT NOT NULL UNIQUE, user_name TEXT NOT NULL UNIQUE, password_hash TEXT NOT NULL)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{RefreshTokenStore, UserAccount, UserStore};
use crate::auth::claims::UserIdentity;
use crate::auth::refresh_token::{RefreshToken, Revocation, RevocationReason};
use crate::configuration::DatabaseSettings;
use crate::error::AppError;

/// Build a connection pool from settings
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, AppError> {
    tracing::info!(
        host = %settings.host,
        database = %settings.database_name,
        "Attempting to connect to database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.connection_string())
        .await?;

    tracing::info!("Database connection pool created successfully");
    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    token: String,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    replaced_by_token: Option<String>,
    revoked_reason: Option<String>,
}

impl From<RefreshTokenRow> for RefreshToken {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            token: row.token,
            user_id: row.user_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            replaced_by_token: row.replaced_by_token,
            revoked_reason: row.revoked_reason,
        }
    }
}

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert_refresh_token(&self, record: &RefreshToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, token, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.token)
        .bind(record.user_id)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>, AppError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, token, user_id, created_at, expires_at,
                   revoked_at, replaced_by_token, revoked_reason
            FROM refresh_tokens
            WHERE token = $1 AND user_id = $2
            "#,
        )
        .bind(token)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshToken::from))
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        revocation: &Revocation,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1, revoked_reason = $2, replaced_by_token = $3
            WHERE token = $4 AND user_id = $5 AND revoked_at IS NULL
            "#,
        )
        .bind(revocation.revoked_at)
        .bind(revocation.reason.as_str())
        .bind(revocation.replaced_by_token.as_deref())
        .bind(token)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn rotate_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
        replacement: &RefreshToken,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        // The conditional update is what serialises concurrent refreshes:
        // only one transaction can flip revoked_at from NULL.
        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1, revoked_reason = $2, replaced_by_token = $3
            WHERE token = $4 AND user_id = $5 AND revoked_at IS NULL AND expires_at > $1
            "#,
        )
        .bind(now)
        .bind(RevocationReason::Rotated.as_str())
        .bind(&replacement.token)
        .bind(token)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, token, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(replacement.id)
        .bind(&replacement.token)
        .bind(replacement.user_id)
        .bind(replacement.created_at)
        .bind(replacement.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        revocation: &Revocation,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1, revoked_reason = $2
            WHERE user_id = $3 AND revoked_at IS NULL
            "#,
        )
        .bind(revocation.revoked_at)
        .bind(revocation.reason.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    user_name: String,
    password_hash: String,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        Self {
            identity: UserIdentity {
                id: row.id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                user_name: row.user_name,
            },
            password_hash: row.password_hash,
        }
    }
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert_user(&self, account: &UserAccount) -> Result<(), AppError> {
        let identity = &account.identity;
        sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, email, user_name, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(identity.id)
        .bind(&identity.first_name)
        .bind(&identity.last_name)
        .bind(&identity.email)
        .bind(&identity.user_name)
        .bind(&account.password_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<UserAccount>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, first_name, last_name, email, user_name, password_hash
            FROM users
            WHERE lower(email) = lower($1) OR lower(user_name) = lower($1)
            LIMIT 1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserAccount::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, first_name, last_name, email, user_name, password_hash
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserAccount::from))
    }
}
