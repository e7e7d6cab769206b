/// JWT Claims structure
///
/// `UserIdentity` is what the account store knows about a user;
/// `Claims` is how that identity travels inside a signed access token
/// alongside the standard RFC 7519 claims.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};

/// Identity of an authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub user_name: String,
}

/// JWT Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub email: String,
    /// User name
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Build the claim set for `identity`, expiring `lifetime` after `issued_at`
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the expiry is outside the representable range
    pub fn new(
        identity: &UserIdentity,
        issuer: &str,
        audience: &str,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Result<Self, AppError> {
        let expires_at = issued_at
            .checked_add_signed(lifetime)
            .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?;

        Ok(Self {
            sub: identity.id.to_string(),
            email: identity.email.clone(),
            name: identity.user_name.clone(),
            given_name: identity.first_name.clone(),
            family_name: identity.last_name.clone(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        })
    }

    /// Extract user ID from claims
    ///
    /// # Errors
    /// Returns `TokenInvalid` if the subject is not a UUID
    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::TokenInvalid)
    }

    /// Zero-tolerance expiry: a token expiring at T is expired at T
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    /// Rebuild the identity carried by a verified token
    pub fn into_identity(self) -> Result<UserIdentity, AuthError> {
        let id = self.user_id()?;
        Ok(UserIdentity {
            id,
            first_name: self.given_name,
            last_name: self.family_name,
            email: self.email,
            user_name: self.name,
        })
    }
}
