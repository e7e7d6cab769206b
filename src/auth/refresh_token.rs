/// Refresh Token Management
///
/// Handles opaque refresh token generation, persistence, validation, and revocation.
/// Refresh tokens are:
/// - 64 bytes from the operating system CSPRNG, base64 encoded
/// - Bound to exactly one user; lookups always match token AND user
/// - Never deleted, only revoked, so replayed tokens can be recognised
/// - Never logged in plaintext (see `token_fingerprint`)

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::store::RefreshTokenStore;
use crate::configuration::JwtSettings;
use crate::error::AppError;

/// Random bytes drawn per refresh token
pub const REFRESH_TOKEN_BYTES: usize = 64;

const FINGERPRINT_LEN: usize = 12;

/// Generate a new cryptographically secure refresh token
///
/// Uniqueness is not checked here; the store's unique constraint on the
/// token column is the backstop.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    general_purpose::STANDARD.encode(bytes)
}

/// Short SHA-256 prefix identifying a token in logs
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

/// Validation state of a refresh token record at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenState {
    Active,
    Expired,
    Revoked,
}

/// Why a refresh token was revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Logout,
    LogoutAll,
    Rotated,
    ReuseDetected,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Logout => "logout",
            RevocationReason::LogoutAll => "logout_all",
            RevocationReason::Rotated => "rotated",
            RevocationReason::ReuseDetected => "reuse_detected",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revocation fields written onto a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub reason: RevocationReason,
    pub replaced_by_token: Option<String>,
}

impl Revocation {
    pub fn new(revoked_at: DateTime<Utc>, reason: RevocationReason) -> Self {
        Self {
            revoked_at,
            reason,
            replaced_by_token: None,
        }
    }

    pub fn replaced_by(mut self, token: impl Into<String>) -> Self {
        self.replaced_by_token = Some(token.into());
        self
    }
}

/// Persisted refresh token record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token: Option<String>,
    pub revoked_reason: Option<String>,
}

impl RefreshToken {
    /// Fresh, active record with a newly generated token
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the expiry is outside the representable range
    pub fn new(user_id: Uuid, created_at: DateTime<Utc>, lifetime: Duration) -> Result<Self, AppError> {
        let expires_at = created_at
            .checked_add_signed(lifetime)
            .ok_or_else(|| AppError::Internal("Refresh token expiry out of range".to_string()))?;

        Ok(Self {
            id: Uuid::new_v4(),
            token: generate_refresh_token(),
            user_id,
            created_at,
            expires_at,
            revoked_at: None,
            replaced_by_token: None,
            revoked_reason: None,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    /// Revoked wins over Expired so replays of rotated tokens stay visible
    pub fn state(&self, now: DateTime<Utc>) -> RefreshTokenState {
        if self.is_revoked() {
            RefreshTokenState::Revoked
        } else if self.is_expired(now) {
            RefreshTokenState::Expired
        } else {
            RefreshTokenState::Active
        }
    }

    pub fn apply_revocation(&mut self, revocation: &Revocation) {
        self.revoked_at = Some(revocation.revoked_at);
        self.revoked_reason = Some(revocation.reason.as_str().to_string());
        self.replaced_by_token = revocation.replaced_by_token.clone();
    }

    pub fn fingerprint(&self) -> String {
        token_fingerprint(&self.token)
    }
}

/// Issues, checks and revokes refresh tokens against a `RefreshTokenStore`
#[derive(Clone)]
pub struct RefreshTokenManager {
    store: Arc<dyn RefreshTokenStore>,
    lifetime: Duration,
}

impl RefreshTokenManager {
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for a lifetime outside the accepted range
    pub fn new(store: Arc<dyn RefreshTokenStore>, settings: &JwtSettings) -> Result<Self, AppError> {
        Ok(Self {
            store,
            lifetime: settings.refresh_token_lifetime()?,
        })
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Build (but do not persist) a record for `user_id`
    pub fn issue(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<RefreshToken, AppError> {
        RefreshToken::new(user_id, now, self.lifetime)
    }

    /// Build and persist a record for `user_id`
    pub async fn create(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<RefreshToken, AppError> {
        let record = self.issue(user_id, now)?;
        self.store.insert_refresh_token(&record).await?;

        tracing::debug!(
            user_id = %user_id,
            fingerprint = %record.fingerprint(),
            expires_at = %record.expires_at,
            "Refresh token stored"
        );
        Ok(record)
    }

    /// Look up the record matching both `token` and `user_id`
    ///
    /// The lookup is abandoned with `AppError::Cancelled` as soon as
    /// `cancel` fires; being read-only, nothing needs undoing.
    pub async fn find_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<RefreshToken>, AppError> {
        if token.is_empty() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(user_id = %user_id, "Refresh token lookup cancelled");
                Err(AppError::Cancelled)
            }
            found = self.store.find_refresh_token(token, user_id) => found,
        }
    }

    /// True iff a record for (`token`, `user_id`) exists and is active at `now`
    ///
    /// # Errors
    /// Store failures and cancellation propagate; an unusable token is `Ok(false)`.
    pub async fn validate_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool, AppError> {
        let Some(record) = self.find_refresh_token(token, user_id, cancel).await? else {
            tracing::debug!(
                user_id = %user_id,
                fingerprint = %token_fingerprint(token),
                "Refresh token not found"
            );
            return Ok(false);
        };

        match record.state(now) {
            RefreshTokenState::Active => Ok(true),
            RefreshTokenState::Expired => {
                tracing::info!(
                    user_id = %user_id,
                    fingerprint = %record.fingerprint(),
                    "Refresh token expired"
                );
                Ok(false)
            }
            RefreshTokenState::Revoked => {
                tracing::warn!(
                    user_id = %user_id,
                    fingerprint = %record.fingerprint(),
                    reason = record.revoked_reason.as_deref().unwrap_or("unknown"),
                    "Attempt to use revoked refresh token"
                );
                Ok(false)
            }
        }
    }

    /// Replace `token` with a new record in one atomic store operation
    ///
    /// Returns `None` when `token` was no longer active, e.g. because a
    /// concurrent refresh already rotated it.
    pub async fn rotate(
        &self,
        token: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, AppError> {
        let replacement = self.issue(user_id, now)?;
        let rotated = self
            .store
            .rotate_refresh_token(token, user_id, now, &replacement)
            .await?;

        if rotated {
            tracing::debug!(
                user_id = %user_id,
                old = %token_fingerprint(token),
                new = %replacement.fingerprint(),
                "Refresh token rotated"
            );
            Ok(Some(replacement))
        } else {
            Ok(None)
        }
    }

    /// Revoke one token; false if it was unknown or already revoked
    pub async fn revoke(
        &self,
        token: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<bool, AppError> {
        self.store
            .revoke_refresh_token(token, user_id, &Revocation::new(now, reason))
            .await
    }

    /// Revoke every unrevoked token of `user_id`
    pub async fn revoke_all(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<u64, AppError> {
        let revoked = self
            .store
            .revoke_all_for_user(user_id, &Revocation::new(now, reason))
            .await?;

        tracing::info!(user_id = %user_id, revoked, reason = %reason, "Refresh tokens revoked for user");
        Ok(revoked)
    }
}
