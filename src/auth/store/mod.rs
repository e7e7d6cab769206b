//! Persistence collaborators
//!
//! The token core never talks to a database directly; it goes through these
//! traits. `memory` backs tests and single-process tools, `postgres` backs
//! deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::claims::UserIdentity;
use crate::auth::refresh_token::{RefreshToken, Revocation};
use crate::error::AppError;

pub mod memory;
pub mod postgres;

/// Storage for refresh token records
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persist a new record; a duplicate token is a `UniqueConstraintViolation`
    async fn insert_refresh_token(&self, record: &RefreshToken) -> Result<(), AppError>;

    /// Exact match on token string and owning user
    async fn find_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>, AppError>;

    /// Set the revocation fields if the record is not already revoked
    ///
    /// Returns whether a record was updated.
    async fn revoke_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        revocation: &Revocation,
    ) -> Result<bool, AppError>;

    /// Revoke `token` as rotated into `replacement` and insert `replacement`
    ///
    /// Both writes happen atomically, and only if `token` is still active at
    /// `now`. Returns false (and writes nothing) otherwise.
    async fn rotate_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
        replacement: &RefreshToken,
    ) -> Result<bool, AppError>;

    /// Revoke every unrevoked record of `user_id`, returning how many changed
    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        revocation: &Revocation,
    ) -> Result<u64, AppError>;
}

/// A user account as held by the account store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub identity: UserIdentity,
    pub password_hash: String,
}

/// Account store: user lookup and creation
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a new account; duplicate email or user name is a `UniqueConstraintViolation`
    async fn insert_user(&self, account: &UserAccount) -> Result<(), AppError>;

    /// Find by email or user name
    async fn find_by_login(&self, login: &str) -> Result<Option<UserAccount>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, AppError>;
}
