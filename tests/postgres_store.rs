//! Postgres collaborators against a live database
//!
//! Run with `APP__DATABASE__*` pointing at a server the test may create
//! tables in, then `cargo test -- --ignored`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::{Executor, PgPool};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ecom_auth::auth::store::postgres::{connect, PgRefreshTokenStore, PgUserStore};
use ecom_auth::auth::store::{RefreshTokenStore, UserAccount, UserStore};
use ecom_auth::auth::{RefreshToken, RefreshTokenManager, UserIdentity};
use ecom_auth::configuration::get_configuration;
use ecom_auth::error::{AppError, DatabaseError};

async fn test_pool() -> (PgPool, ecom_auth::configuration::JwtSettings) {
    let configuration = get_configuration().expect("Failed to read configuration.");
    let pool = connect(&configuration.database)
        .await
        .expect("Failed to connect to Postgres.");

    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            user_name TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id UUID PRIMARY KEY,
            token TEXT NOT NULL UNIQUE,
            user_id UUID NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            revoked_at TIMESTAMPTZ,
            replaced_by_token TEXT,
            revoked_reason TEXT
        );
        "#,
    )
    .await
    .expect("Failed to create tables.");

    (pool, configuration.jwt)
}

fn account() -> UserAccount {
    let suffix = Uuid::new_v4().simple().to_string();
    UserAccount {
        identity: UserIdentity {
            id: Uuid::new_v4(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: format!("ada-{}@example.com", suffix),
            user_name: format!("ada-{}", suffix),
        },
        password_hash: "$2b$04$placeholderplaceholderplaceholderplaceholde".to_string(),
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn user_store_round_trip() {
    let (pool, _) = test_pool().await;
    let store = PgUserStore::new(pool);
    let account = account();

    store.insert_user(&account).await.unwrap();

    let by_email = store
        .find_by_login(&account.identity.email.to_uppercase())
        .await
        .unwrap();
    assert_eq!(by_email, Some(account.clone()));
    assert_eq!(store.find_by_id(account.identity.id).await.unwrap(), Some(account.clone()));

    let duplicate = store.insert_user(&account).await;
    assert!(matches!(
        duplicate,
        Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
    ));
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn refresh_token_store_lifecycle() {
    let (pool, jwt) = test_pool().await;
    let store = Arc::new(PgRefreshTokenStore::new(pool));
    let manager = RefreshTokenManager::new(store.clone(), &jwt).unwrap();
    let cancel = CancellationToken::new();
    // Postgres keeps microseconds; stay on whole seconds so records compare equal
    let now = chrono::DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap();
    let user_id = Uuid::new_v4();

    let record = manager.create(user_id, now).await.unwrap();
    let found = store.find_refresh_token(&record.token, user_id).await.unwrap();
    assert_eq!(found, Some(record.clone()));

    assert!(manager.validate_refresh_token(&record.token, user_id, now, &cancel).await.unwrap());
    assert!(!manager
        .validate_refresh_token(&record.token, Uuid::new_v4(), now, &cancel)
        .await
        .unwrap());

    let replacement = manager.rotate(&record.token, user_id, now).await.unwrap().unwrap();
    assert!(manager.rotate(&record.token, user_id, now).await.unwrap().is_none());

    let old = store.find_refresh_token(&record.token, user_id).await.unwrap().unwrap();
    assert_eq!(old.replaced_by_token, Some(replacement.token.clone()));
    assert_eq!(old.revoked_reason.as_deref(), Some("rotated"));

    let duplicate = store
        .insert_refresh_token(&RefreshToken {
            id: Uuid::new_v4(),
            ..replacement.clone()
        })
        .await;
    assert!(matches!(
        duplicate,
        Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
    ));

    let later = now + Duration::minutes(1);
    assert_eq!(
        manager
            .revoke_all(user_id, later, ecom_auth::auth::RevocationReason::LogoutAll)
            .await
            .unwrap(),
        1
    );
    assert!(!manager
        .validate_refresh_token(&replacement.token, user_id, later, &cancel)
        .await
        .unwrap());
}
