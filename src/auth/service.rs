/// Authentication workflow
///
/// Ties the token service, the refresh token manager and the account store
/// together into register / login / refresh / logout.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::claims::UserIdentity;
use crate::auth::jwt::TokenService;
use crate::auth::password::{hash_password, verify_password, DEFAULT_COST};
use crate::auth::refresh_token::{
    token_fingerprint, RefreshToken, RefreshTokenManager, RefreshTokenState, RevocationReason,
};
use crate::auth::store::{UserAccount, UserStore};
use crate::error::{AppError, AuthError, ErrorContext};

pub const TOKEN_TYPE: &str = "Bearer";

/// How long after a rotation the old token counts as a concurrent refresh
/// that lost the race rather than as reuse
const ROTATION_RACE_WINDOW_SECONDS: i64 = 5;

fn lost_rotation_race(record: &RefreshToken, now: DateTime<Utc>) -> bool {
    let rotated = record.revoked_reason.as_deref() == Some(RevocationReason::Rotated.as_str());
    match record.revoked_at {
        Some(revoked_at) if rotated => {
            now.signed_duration_since(revoked_at) < Duration::seconds(ROTATION_RACE_WINDOW_SECONDS)
        }
        _ => false,
    }
}

/// Access and refresh token pair handed back to a client
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Account details for registration
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub user_name: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AuthService {
    tokens: TokenService,
    refresh_tokens: RefreshTokenManager,
    users: Arc<dyn UserStore>,
    password_cost: u32,
}

impl AuthService {
    pub fn new(
        tokens: TokenService,
        refresh_tokens: RefreshTokenManager,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            tokens,
            refresh_tokens,
            users,
            password_cost: DEFAULT_COST,
        }
    }

    /// bcrypt cost for newly registered passwords
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenManager {
        &self.refresh_tokens
    }

    /// Create an account and return its id
    ///
    /// # Errors
    /// - `DatabaseError::UniqueConstraintViolation` for a taken email or user name
    pub async fn register(&self, new_user: NewUser) -> Result<Uuid, AppError> {
        let context = ErrorContext::new("user_registration");

        let password_hash = hash_password(&new_user.password, self.password_cost)?;
        let account = UserAccount {
            identity: UserIdentity {
                id: Uuid::new_v4(),
                first_name: new_user.first_name,
                last_name: new_user.last_name,
                email: new_user.email,
                user_name: new_user.user_name,
            },
            password_hash,
        };

        if let Err(e) = self.users.insert_user(&account).await {
            context.log_error(&e);
            return Err(e);
        }

        tracing::info!(
            request_id = %context.request_id,
            user_id = %account.identity.id,
            "User registered successfully"
        );
        Ok(account.identity.id)
    }

    /// Authenticate by email or user name and issue a token pair
    ///
    /// Unknown accounts and wrong passwords are indistinguishable.
    pub async fn login(&self, login: &str, password: &str) -> Result<AuthTokens, AppError> {
        let context = ErrorContext::new("user_login");

        let account = match self.users.find_by_login(login).await? {
            Some(account) if verify_password(password, &account.password_hash)? => account,
            _ => {
                let err = AppError::Auth(AuthError::InvalidCredentials);
                context.log_error(&err);
                return Err(err);
            }
        };

        let tokens = self.issue(&account.identity).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %account.identity.id,
            "User logged in successfully"
        );
        Ok(tokens)
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// The presented token is rotated: it is revoked with a pointer to its
    /// replacement. Presenting an already rotated token again is treated as
    /// theft and revokes every refresh token of the user, unless the rotation
    /// happened within `ROTATION_RACE_WINDOW_SECONDS`. That case is a
    /// concurrent refresh of the same token and is only rejected.
    pub async fn refresh(
        &self,
        user_id: Uuid,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> Result<AuthTokens, AppError> {
        let context = ErrorContext::new("token_refresh").with_user_id(user_id.to_string());
        let now = self.tokens.now();
        let rejected = || -> Result<AuthTokens, AppError> {
            let err = AppError::Auth(AuthError::RefreshTokenInvalid);
            context.log_error(&err);
            Err(err)
        };

        let Some(record) = self
            .refresh_tokens
            .find_refresh_token(refresh_token, user_id, cancel)
            .await?
        else {
            return rejected();
        };

        match record.state(now) {
            RefreshTokenState::Active => {}
            RefreshTokenState::Revoked
                if record.replaced_by_token.is_some() && !lost_rotation_race(&record, now) =>
            {
                tracing::warn!(
                    request_id = %context.request_id,
                    user_id = %user_id,
                    fingerprint = %record.fingerprint(),
                    "Rotated refresh token presented again, revoking all sessions"
                );
                self.refresh_tokens
                    .revoke_all(user_id, now, RevocationReason::ReuseDetected)
                    .await?;
                return rejected();
            }
            RefreshTokenState::Revoked | RefreshTokenState::Expired => return rejected(),
        }

        let Some(account) = self.users.find_by_id(user_id).await? else {
            return rejected();
        };

        let Some(replacement) = self.refresh_tokens.rotate(refresh_token, user_id, now).await? else {
            // Lost the race against a concurrent refresh of the same token
            return rejected();
        };
        let access_token = self.tokens.generate_token(&account.identity)?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user_id,
            "Token refreshed successfully"
        );
        self.token_pair(access_token, replacement.token)
    }

    /// Revoke one refresh token; returns whether anything changed
    pub async fn logout(&self, user_id: Uuid, refresh_token: &str) -> Result<bool, AppError> {
        let revoked = self
            .refresh_tokens
            .revoke(refresh_token, user_id, self.tokens.now(), RevocationReason::Logout)
            .await?;

        tracing::info!(
            user_id = %user_id,
            fingerprint = %token_fingerprint(refresh_token),
            revoked,
            "User logged out"
        );
        Ok(revoked)
    }

    /// Revoke every refresh token of `user_id`
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        self.refresh_tokens
            .revoke_all(user_id, self.tokens.now(), RevocationReason::LogoutAll)
            .await
    }

    /// Verify an access token presented by a caller
    pub fn authenticate(&self, access_token: &str) -> Result<UserIdentity, AuthError> {
        self.tokens.validate_token(access_token)
    }

    async fn issue(&self, identity: &UserIdentity) -> Result<AuthTokens, AppError> {
        let access_token = self.tokens.generate_token(identity)?;
        let record = self
            .refresh_tokens
            .create(identity.id, self.tokens.now())
            .await?;
        self.token_pair(access_token, record.token)
    }

    fn token_pair(&self, access_token: String, refresh_token: String) -> Result<AuthTokens, AppError> {
        Ok(AuthTokens {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.tokens.settings().access_token_lifetime_seconds()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::memory::{InMemoryRefreshTokenStore, InMemoryUserStore};
    use crate::configuration::JwtSettings;

    fn service() -> AuthService {
        let settings = JwtSettings {
            issuer: "ecom".to_string(),
            audience: "ecom-api".to_string(),
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            expiration_in_minutes: 15,
            refresh_token_expiration_in_days: 7,
        };
        let refresh_tokens =
            RefreshTokenManager::new(Arc::new(InMemoryRefreshTokenStore::new()), &settings).unwrap();
        AuthService::new(
            TokenService::new(settings),
            refresh_tokens,
            Arc::new(InMemoryUserStore::new()),
        )
        .with_password_cost(4)
    }

    fn new_user() -> NewUser {
        NewUser {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            user_name: "ada".to_string(),
            password: "Analytical1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_issues_bearer_pair() {
        let service = service();
        let user_id = service.register(new_user()).await.unwrap();

        let tokens = service.login("ada@example.com", "Analytical1").await.unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 900);

        let identity = service.authenticate(&tokens.access_token).unwrap();
        assert_eq!(identity.id, user_id);
        assert_eq!(identity.user_name, "ada");
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let service = service();
        service.register(new_user()).await.unwrap();

        let wrong_password = service.login("ada", "wrong").await.unwrap_err();
        let unknown_user = service.login("nobody", "Analytical1").await.unwrap_err();

        assert!(matches!(wrong_password, AppError::Auth(AuthError::InvalidCredentials)));
        assert!(matches!(unknown_user, AppError::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_refresh_requires_matching_user() {
        let service = service();
        service.register(new_user()).await.unwrap();
        let tokens = service.login("ada", "Analytical1").await.unwrap();

        let result = service
            .refresh(Uuid::new_v4(), &tokens.refresh_token, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::Auth(AuthError::RefreshTokenInvalid))));
    }

    #[tokio::test]
    async fn test_refresh_racing_a_fresh_rotation_keeps_other_sessions() {
        let service = service();
        let user_id = service.register(new_user()).await.unwrap();
        let tokens = service.login("ada", "Analytical1").await.unwrap();
        let cancel = CancellationToken::new();

        let winner = service.refresh(user_id, &tokens.refresh_token, &cancel).await.unwrap();
        let loser = service.refresh(user_id, &tokens.refresh_token, &cancel).await;
        assert!(matches!(loser, Err(AppError::Auth(AuthError::RefreshTokenInvalid))));

        assert!(service.refresh(user_id, &winner.refresh_token, &cancel).await.is_ok());
    }

    #[test]
    fn test_lost_rotation_race_window() {
        let now = Utc::now();
        let mut record = RefreshToken::new(Uuid::new_v4(), now, Duration::days(7)).unwrap();
        record.apply_revocation(
            &crate::auth::refresh_token::Revocation::new(now, RevocationReason::Rotated)
                .replaced_by("next"),
        );

        assert!(lost_rotation_race(&record, now + Duration::seconds(1)));
        assert!(!lost_rotation_race(&record, now + Duration::seconds(ROTATION_RACE_WINDOW_SECONDS)));

        record.revoked_reason = Some(RevocationReason::Logout.as_str().to_string());
        assert!(!lost_rotation_race(&record, now));
    }

    #[tokio::test]
    async fn test_logout_revokes_refresh_token() {
        let service = service();
        let user_id = service.register(new_user()).await.unwrap();
        let tokens = service.login("ada", "Analytical1").await.unwrap();

        assert!(service.logout(user_id, &tokens.refresh_token).await.unwrap());
        assert!(!service.logout(user_id, &tokens.refresh_token).await.unwrap());

        let result = service
            .refresh(user_id, &tokens.refresh_token, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::Auth(AuthError::RefreshTokenInvalid))));
    }
}
