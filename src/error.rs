/// Error Handling Module
///
/// One error taxonomy for the whole crate:
/// 1. Credential errors (expected, frequent, never explain themselves to the caller)
/// 2. Infrastructure errors (database, configuration, cancellation)
/// 3. Structured error logging with operation context

use thiserror::Error;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Authentication failures
///
/// Each credential kind maps to exactly one variant so the reason a token
/// was rejected never reaches the caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    TokenInvalid,
    #[error("Invalid refresh token")]
    RefreshTokenInvalid,
}

/// Database operation errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Duplicate entry: {0}")]
    UniqueConstraintViolation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Query error: {0}")]
    QueryExecution(String),
    #[error("Database connection error: {0}")]
    ConnectionPool(String),
    #[error("Database error: {0}")]
    Unexpected(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required config: {0}")]
    MissingRequired(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),
}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

/// Central error type that all crate errors map to
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => {
                AppError::Database(DatabaseError::NotFound("Record not found".to_string()))
            }
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                    let constraint = db_err.constraint().unwrap_or("unique").to_string();
                    AppError::Database(DatabaseError::UniqueConstraintViolation(constraint))
                } else {
                    AppError::Database(DatabaseError::QueryExecution(db_err.to_string()))
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Database(DatabaseError::ConnectionPool(err.to_string()))
            }
            other => AppError::Database(DatabaseError::Unexpected(other.to_string())),
        }
    }
}

// ============================================================================
// 3. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Error context for enhanced logging and debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Credential failures log at `warn`, everything else at `error`.
    pub fn log_error(&self, error: &AppError) {
        let context = serde_json::json!({
            "request_id": self.request_id,
            "operation": self.operation,
            "user_id": self.user_id,
            "timestamp": self.timestamp.to_rfc3339(),
        });

        match error {
            AppError::Auth(_) => {
                tracing::warn!(
                    error = %error,
                    context = %context,
                    "Authentication error"
                );
            }
            AppError::Cancelled => {
                tracing::info!(
                    context = %context,
                    "Operation cancelled"
                );
            }
            AppError::Database(_) => {
                tracing::error!(
                    error = %error,
                    context = %context,
                    "Database error"
                );
            }
            AppError::Config(_) => {
                tracing::error!(
                    error = %error,
                    context = %context,
                    "Configuration error"
                );
            }
            AppError::Internal(_) => {
                tracing::error!(
                    error = %error,
                    context = %context,
                    "Internal error"
                );
            }
        }
    }
}
