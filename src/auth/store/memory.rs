//! In-process stores
//!
//! Mutex-guarded maps with the same contract as the Postgres stores,
//! including unique constraints and atomic rotation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{RefreshTokenStore, UserAccount, UserStore};
use crate::auth::refresh_token::{RefreshToken, Revocation, RevocationReason};
use crate::error::{AppError, DatabaseError};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, AppError> {
    mutex
        .lock()
        .map_err(|_| AppError::Database(DatabaseError::Unexpected(format!("{} lock poisoned", what))))
}

/// Refresh tokens keyed by token string
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: Mutex<HashMap<String, RefreshToken>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records ever stored, revoked ones included
    pub fn len(&self) -> usize {
        self.tokens.lock().map(|tokens| tokens.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert_refresh_token(&self, record: &RefreshToken) -> Result<(), AppError> {
        let mut tokens = lock(&self.tokens, "refresh token")?;
        if tokens.contains_key(&record.token) {
            return Err(DatabaseError::UniqueConstraintViolation("refresh_tokens.token".to_string()).into());
        }
        tokens.insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
    ) -> Result<Option<RefreshToken>, AppError> {
        let tokens = lock(&self.tokens, "refresh token")?;
        Ok(tokens
            .get(token)
            .filter(|record| record.user_id == user_id)
            .cloned())
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        revocation: &Revocation,
    ) -> Result<bool, AppError> {
        let mut tokens = lock(&self.tokens, "refresh token")?;
        match tokens.get_mut(token) {
            Some(record) if record.user_id == user_id && !record.is_revoked() => {
                record.apply_revocation(revocation);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
        replacement: &RefreshToken,
    ) -> Result<bool, AppError> {
        let mut tokens = lock(&self.tokens, "refresh token")?;
        if tokens.contains_key(&replacement.token) {
            return Err(DatabaseError::UniqueConstraintViolation("refresh_tokens.token".to_string()).into());
        }

        match tokens.get_mut(token) {
            Some(record) if record.user_id == user_id && record.is_active(now) => {
                record.apply_revocation(
                    &Revocation::new(now, RevocationReason::Rotated).replaced_by(&replacement.token),
                );
            }
            _ => return Ok(false),
        }
        tokens.insert(replacement.token.clone(), replacement.clone());
        Ok(true)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        revocation: &Revocation,
    ) -> Result<u64, AppError> {
        let mut tokens = lock(&self.tokens, "refresh token")?;
        let mut revoked = 0;
        for record in tokens
            .values_mut()
            .filter(|record| record.user_id == user_id && !record.is_revoked())
        {
            record.apply_revocation(revocation);
            revoked += 1;
        }
        Ok(revoked)
    }
}

/// User accounts keyed by id
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<Uuid, UserAccount>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert_user(&self, account: &UserAccount) -> Result<(), AppError> {
        let mut users = lock(&self.users, "user")?;
        let identity = &account.identity;
        if users.contains_key(&identity.id) {
            return Err(DatabaseError::UniqueConstraintViolation("users.id".to_string()).into());
        }
        for existing in users.values() {
            if existing.identity.email.eq_ignore_ascii_case(&identity.email) {
                return Err(DatabaseError::UniqueConstraintViolation("users.email".to_string()).into());
            }
            if existing.identity.user_name.eq_ignore_ascii_case(&identity.user_name) {
                return Err(
                    DatabaseError::UniqueConstraintViolation("users.user_name".to_string()).into(),
                );
            }
        }
        users.insert(identity.id, account.clone());
        Ok(())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<UserAccount>, AppError> {
        let users = lock(&self.users, "user")?;
        Ok(users
            .values()
            .find(|account| {
                account.identity.email.eq_ignore_ascii_case(login)
                    || account.identity.user_name.eq_ignore_ascii_case(login)
            })
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>, AppError> {
        let users = lock(&self.users, "user")?;
        Ok(users.get(&id).cloned())
    }
}
