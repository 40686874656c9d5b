// ABOUTME: Auth integration tests: JWT lifecycle, lockout, revocation
// ABOUTME: Expired, revoked, and mis-audienced tokens; epoch rotation on password change
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{create_test_state, create_test_user};
use chrono::Utc;
use mcp_gateway::auth::api_tokens::CreateTokenRequest;
use mcp_gateway::errors::AppError;
use mcp_gateway::models::TokenScope;
use mcp_gateway::routes::auth::{AuthService, ChangePasswordRequest, LoginRequest, RegisterRequest};

#[tokio::test]
async fn register_login_round_trip() {
    let state = create_test_state().await.unwrap();
    let service = AuthService::new(state.clone());

    let session = service
        .register(RegisterRequest {
            email: "alice@example.com".to_owned(),
            password: "hunter2hunter2".to_owned(),
            full_name: Some("Alice".to_owned()),
        })
        .await
        .unwrap();
    // First account bootstraps as platform admin
    assert!(session.user.is_platform_admin);
    assert!(session.user.personal_team_id.is_some());

    // The issued token resolves to a working identity
    let claims = state.auth.validate_token(&session.token).unwrap();
    let identity = state.auth.resolve_identity(&state.db, &claims).await.unwrap();
    assert_eq!(identity.email, "alice@example.com");
    assert_eq!(identity.teams.len(), 1);

    let login = service
        .login(LoginRequest {
            email: "alice@example.com".to_owned(),
            password: "hunter2hunter2".to_owned(),
        })
        .await
        .unwrap();
    assert!(!login.token.is_empty());
}

#[tokio::test]
async fn second_registration_is_not_admin() {
    let state = create_test_state().await.unwrap();
    let service = AuthService::new(state);

    service
        .register(RegisterRequest {
            email: "first@example.com".to_owned(),
            password: "password123".to_owned(),
            full_name: None,
        })
        .await
        .unwrap();
    let second = service
        .register(RegisterRequest {
            email: "second@example.com".to_owned(),
            password: "password123".to_owned(),
            full_name: None,
        })
        .await
        .unwrap();
    assert!(!second.user.is_platform_admin);
}

#[tokio::test]
async fn repeated_failures_lock_the_account() {
    let mut config = mcp_gateway::config::GatewayConfig::default();
    config.auth.max_failed_logins = 3;
    config.auth.lockout_minutes = 30;
    let state = common::create_test_state_with(config).await.unwrap();
    let service = AuthService::new(state.clone());

    service
        .register(RegisterRequest {
            email: "victim@example.com".to_owned(),
            password: "password123".to_owned(),
            full_name: None,
        })
        .await
        .unwrap();

    for _ in 0..3 {
        let err = service
            .login(LoginRequest {
                email: "victim@example.com".to_owned(),
                password: "wrong-password".to_owned(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthRequired(_)));
    }

    // Even the correct password is refused while locked
    let err = service
        .login(LoginRequest {
            email: "victim@example.com".to_owned(),
            password: "password123".to_owned(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)), "got {err:?}");

    let user = state.db.get_user("victim@example.com").await.unwrap().unwrap();
    assert!(user.is_locked(Utc::now()));
}

#[tokio::test]
async fn password_change_revokes_existing_sessions() {
    // Epoch rotation kills tokens issued before the change
    let state = create_test_state().await.unwrap();
    let service = AuthService::new(state.clone());

    let session = service
        .register(RegisterRequest {
            email: "alice@example.com".to_owned(),
            password: "password123".to_owned(),
            full_name: None,
        })
        .await
        .unwrap();
    let old_token = session.token;
    let claims = state.auth.validate_token(&old_token).unwrap();
    let identity = state.auth.resolve_identity(&state.db, &claims).await.unwrap();

    service
        .change_password(
            &identity,
            ChangePasswordRequest {
                old_password: "password123".to_owned(),
                new_password: "even-better-pass".to_owned(),
            },
        )
        .await
        .unwrap();

    // The old token still parses but no longer resolves
    let claims = state.auth.validate_token(&old_token).unwrap();
    let err = state
        .auth
        .resolve_identity(&state.db, &claims)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AuthRequired(_)));

    // A fresh login with the new password works
    let relogin = service
        .login(LoginRequest {
            email: "alice@example.com".to_owned(),
            password: "even-better-pass".to_owned(),
        })
        .await
        .unwrap();
    let claims = state.auth.validate_token(&relogin.token).unwrap();
    assert!(state.auth.resolve_identity(&state.db, &claims).await.is_ok());
}

#[tokio::test]
async fn revoked_api_token_is_rejected_on_resolution() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();

    let created = state
        .api_tokens
        .create(
            &state.auth,
            &user,
            CreateTokenRequest {
                name: "ci-token".to_owned(),
                scope: Some(TokenScope::All),
                scope_ref: None,
                expires_at: None,
            },
        )
        .await
        .unwrap();

    let claims = state.auth.validate_token(&created.secret).unwrap();
    assert!(state.auth.resolve_identity(&state.db, &claims).await.is_ok());

    state
        .api_tokens
        .revoke(&identity.email, false, created.token.id)
        .await
        .unwrap();

    let err = state
        .auth
        .resolve_identity(&state.db, &claims)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AuthRequired(_)));
}

#[tokio::test]
async fn expired_api_token_fails_validation() {
    let state = create_test_state().await.unwrap();
    let (user, _) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();

    let (token, _jti) = state
        .auth
        .issue_api_token(
            &user,
            TokenScope::All,
            None,
            Some(Utc::now() - chrono::Duration::hours(1)),
        )
        .unwrap();
    let err = state.auth.validate_token(&token).unwrap_err();
    assert!(matches!(err, AppError::AuthRequired(_)));
}

#[tokio::test]
async fn mis_audienced_token_is_rejected() {
    let state = create_test_state().await.unwrap();
    let (user, _) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();

    // Same secret, different audience: signature checks, audience does not
    let mut foreign_config = mcp_gateway::config::GatewayConfig::default().auth;
    foreign_config.audience = "some-other-service".to_owned();
    let foreign = mcp_gateway::auth::AuthManager::new(foreign_config).unwrap();
    let (token, _) = foreign.issue_session_token(&user, None).unwrap();

    let err = state.auth.validate_token(&token).unwrap_err();
    assert!(matches!(err, AppError::AuthRequired(_)));
}

#[tokio::test]
async fn token_catalog_export_is_signed_and_verifiable() {
    let state = create_test_state().await.unwrap();
    let (user, _) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();

    state
        .api_tokens
        .create(
            &state.auth,
            &user,
            CreateTokenRequest {
                name: "exported".to_owned(),
                scope: None,
                scope_ref: None,
                expires_at: None,
            },
        )
        .await
        .unwrap();

    let export = state.api_tokens.signed_export(&user.email).await.unwrap();
    assert_eq!(export.tokens.len(), 1);
    assert_eq!(export.signature.len(), 128); // hex Ed25519 signature
    assert_eq!(export.public_key.len(), 64); // hex Ed25519 public key
}

#[tokio::test]
async fn duplicate_token_name_is_conflict() {
    let state = create_test_state().await.unwrap();
    let (user, _) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();

    let request = || CreateTokenRequest {
        name: "ci".to_owned(),
        scope: None,
        scope_ref: None,
        expires_at: None,
    };
    state
        .api_tokens
        .create(&state.auth, &user, request())
        .await
        .unwrap();
    let err = state
        .api_tokens
        .create(&state.auth, &user, request())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
