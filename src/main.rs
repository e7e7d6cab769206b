//! ecom-auth - operator tool for the token lifecycle
//!
//! Usage:
//!   ecom-auth issue --user-id <uuid> --email <email> --user-name <name> --first-name <n> --last-name <n>
//!   ecom-auth verify <token>
//!   ecom-auth refresh-token
//!   ecom-auth check-refresh --user-id <uuid> <token>
//!   ecom-auth revoke-all --user-id <uuid>

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ecom_auth::auth::store::postgres::{connect, PgRefreshTokenStore};
use ecom_auth::auth::{generate_refresh_token, RefreshTokenManager, RevocationReason, TokenService, UserIdentity};
use ecom_auth::configuration::{get_configuration, Settings};
use ecom_auth::error::AppError;
use ecom_auth::telemetry::init_telemetry;

#[derive(Parser)]
#[command(name = "ecom-auth")]
#[command(about = "Issue and inspect access and refresh tokens")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign an access token for the given identity
    Issue {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        email: String,
        #[arg(long)]
        user_name: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },
    /// Verify an access token and print the identity it carries
    Verify { token: String },
    /// Print a new opaque refresh token
    RefreshToken,
    /// Check a refresh token against the database
    CheckRefresh {
        #[arg(long)]
        user_id: Uuid,
        token: String,
    },
    /// Revoke every refresh token of a user
    RevokeAll {
        #[arg(long)]
        user_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries command output only
    init_telemetry(std::io::stderr);

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode, AppError> {
    match command {
        Commands::RefreshToken => {
            println!("{}", generate_refresh_token());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Issue {
            user_id,
            email,
            user_name,
            first_name,
            last_name,
        } => {
            let settings = load_settings()?;
            let tokens = TokenService::new(settings.jwt);
            let identity = UserIdentity {
                id: user_id,
                first_name,
                last_name,
                email,
                user_name,
            };
            println!("{}", tokens.generate_token(&identity)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { token } => {
            let settings = load_settings()?;
            let (output, valid) = verify_output(&TokenService::new(settings.jwt), &token)?;
            println!("{}", output);
            Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::CheckRefresh { user_id, token } => {
            let settings = load_settings()?;
            let manager = refresh_token_manager(&settings).await?;
            let now = TokenService::new(settings.jwt).now();
            let valid = manager
                .validate_refresh_token(&token, user_id, now, &shutdown_token())
                .await?;
            println!("{}", if valid { "active" } else { "invalid" });
            Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::RevokeAll { user_id } => {
            let settings = load_settings()?;
            let manager = refresh_token_manager(&settings).await?;
            let now = TokenService::new(settings.jwt).now();
            let revoked = manager
                .revoke_all(user_id, now, RevocationReason::LogoutAll)
                .await?;
            println!("revoked {} refresh token(s)", revoked);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Identity as pretty JSON, or `invalid token`
fn verify_output(tokens: &TokenService, token: &str) -> Result<(String, bool), AppError> {
    match tokens.validate_token(token) {
        Ok(identity) => {
            let rendered = serde_json::to_string_pretty(&identity)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            Ok((rendered, true))
        }
        Err(_) => Ok(("invalid token".to_string(), false)),
    }
}

fn load_settings() -> Result<Settings, AppError> {
    let settings = get_configuration()?;
    tracing::debug!("Configuration loaded successfully");
    Ok(settings)
}

async fn refresh_token_manager(settings: &Settings) -> Result<RefreshTokenManager, AppError> {
    let pool = connect(&settings.database).await?;
    RefreshTokenManager::new(Arc::new(PgRefreshTokenStore::new(pool)), &settings.jwt)
}

/// Cancellation token fired by Ctrl-C
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecom_auth::configuration::JwtSettings;

    fn tokens() -> TokenService {
        TokenService::new(JwtSettings {
            issuer: "ecom".to_string(),
            audience: "ecom-api".to_string(),
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            expiration_in_minutes: 15,
            refresh_token_expiration_in_days: 7,
        })
    }

    #[test]
    fn test_verify_prints_identity_json() {
        let tokens = tokens();
        let identity = UserIdentity {
            id: Uuid::new_v4(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            email: "a@b.com".to_string(),
            user_name: "alice".to_string(),
        };
        let token = tokens.generate_token(&identity).unwrap();

        let (output, valid) = verify_output(&tokens, &token).unwrap();
        assert!(valid);
        let recovered: UserIdentity = serde_json::from_str(&output).unwrap();
        assert_eq!(recovered, identity);
    }

    #[test]
    fn test_verify_prints_invalid_token() {
        let (output, valid) = verify_output(&tokens(), "not.a.token").unwrap();
        assert!(!valid);
        assert_eq!(output, "invalid token");
    }
}
