/// JWT Token Generation and Validation
///
/// `TokenService` signs access tokens with HMAC-SHA-256 and verifies them
/// against the same secret, issuer and audience. It is a pure function of
/// (identity or token, settings, clock) and holds no storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::{Claims, UserIdentity};
use crate::auth::clock::{Clock, SystemClock};
use crate::auth::refresh_token::generate_refresh_token;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iss", "aud", "sub"];

/// Access token issuer and verifier
#[derive(Clone)]
pub struct TokenService {
    settings: JwtSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Token service on the system clock
    pub fn new(settings: JwtSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: JwtSettings, clock: Arc<dyn Clock>) -> Self {
        let secret = settings.secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&settings.issuer]);
        validation.set_audience(&[&settings.audience]);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.leeway = 0;
        // exp is compared against `clock` in `decode_claims`, without the
        // library's inclusive boundary.
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &JwtSettings {
        &self.settings
    }

    /// Current instant on this service's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Sign a new access token for `identity`
    ///
    /// # Errors
    /// Returns error if the configured lifetime is out of range or encoding fails
    pub fn generate_token(&self, identity: &UserIdentity) -> Result<String, AppError> {
        let claims = Claims::new(
            identity,
            &self.settings.issuer,
            &self.settings.audience,
            self.clock.now(),
            self.settings.access_token_lifetime()?,
        )?;

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Opaque refresh token; see `refresh_token::generate_refresh_token`
    pub fn generate_refresh_token(&self) -> String {
        generate_refresh_token()
    }

    /// Access token and refresh token for `identity`
    pub fn generate_tokens(&self, identity: &UserIdentity) -> Result<(String, String), AppError> {
        Ok((self.generate_token(identity)?, self.generate_refresh_token()))
    }

    /// Verify `token` and return the identity it carries
    ///
    /// Every failure (empty input, malformed structure, bad signature, wrong
    /// issuer or audience, expiry, missing or malformed claims) collapses to
    /// `AuthError::TokenInvalid`.
    pub fn validate_token(&self, token: &str) -> Result<UserIdentity, AuthError> {
        self.decode_claims(token)?.into_identity()
    }

    /// Verify `token` and return its raw claim set
    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::TokenInvalid);
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                AuthError::TokenInvalid
            })?;

        if claims.is_expired_at(self.clock.now()) {
            tracing::debug!(sub = %claims.sub, exp = claims.exp, "JWT expired");
            return Err(AuthError::TokenInvalid);
        }

        Ok(claims)
    }
}
