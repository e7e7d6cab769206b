/// Authentication module
///
/// Access token issuance/verification, opaque refresh token lifecycle,
/// password hashing, and the persistence collaborators they depend on.

mod claims;
mod clock;
mod jwt;
mod password;
mod refresh_token;
mod service;
pub mod store;

pub use claims::{Claims, UserIdentity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use jwt::TokenService;
pub use password::{hash_password, verify_password};
pub use refresh_token::generate_refresh_token;
pub use refresh_token::token_fingerprint;
pub use refresh_token::{RefreshToken, RefreshTokenManager, RefreshTokenState};
pub use refresh_token::{Revocation, RevocationReason, REFRESH_TOKEN_BYTES};
pub use service::{AuthService, AuthTokens, NewUser, TOKEN_TYPE};
