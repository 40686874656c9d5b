// ABOUTME: Authentication routes: email register/login, password change, tokens, SSO
// ABOUTME: Thin Axum handlers over an AuthService carrying the business logic
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Auth Routes
//!
//! Public surface: `/auth/email/login`, `/auth/email/register`, and the SSO
//! start/callback pair. Protected surface: password change, the API token
//! catalog, and revocation. Handlers stay thin; `AuthService` owns the
//! lockout bookkeeping, personal-team provisioning, and auth-event trail.

use crate::auth::api_tokens::CreateTokenRequest;
use crate::auth::sso::provision_sso_user;
use crate::constants::{limits, PERSONAL_TEAM_PREFIX};
use crate::crypto::{hash_password, verify_password};
use crate::errors::{AppError, AppResult};
use crate::models::{AuthEvent, AuthEventKind, Team, User, Visibility};
use crate::permissions::IdentityContext;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Account email
    pub email: String,
    /// Plaintext password, hashed immediately
    pub password: String,
    /// Optional display name
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Account email
    pub email: String,
    /// Plaintext password
    pub password: String,
}

/// Password change request
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    /// Current password
    pub old_password: String,
    /// Replacement password
    pub new_password: String,
}

/// Login/registration response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Bearer token for subsequent requests
    pub token: String,
    /// Expiry as RFC 3339
    pub expires_at: String,
    /// Account summary
    pub user: UserInfo,
}

/// Account summary in auth responses
#[derive(Debug, Serialize)]
pub struct UserInfo {
    /// Account email
    pub email: String,
    /// Display name
    pub full_name: Option<String>,
    /// Platform admin marker
    pub is_platform_admin: bool,
    /// Personal team id
    pub personal_team_id: Option<String>,
}

/// Business logic behind the auth endpoints
pub struct AuthService {
    state: Arc<AppState>,
}

impl AuthService {
    /// Build the service
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn is_valid_email(email: &str) -> bool {
        let Some(at) = email.find('@') else {
            return false;
        };
        at > 0 && email[at + 1..].contains('.') && email.len() > 5
    }

    const fn is_valid_password(password: &str) -> bool {
        password.len() >= 8
    }

    async fn record_event(&self, email: &str, kind: AuthEventKind) {
        let event = AuthEvent {
            id: Uuid::new_v4(),
            user_email: email.to_owned(),
            event: kind,
            ts: Utc::now(),
            ip: None,
            user_agent: None,
        };
        if let Err(e) = self.state.db.record_auth_event(&event).await {
            warn!(error = %e, "Failed to record auth event");
        }
    }

    /// Register an account and its personal team. The first account on a
    /// fresh deployment becomes the platform admin.
    ///
    /// # Errors
    /// Returns `Conflict` for duplicate emails, `InvalidRequest` for weak
    /// credentials.
    #[instrument(skip(self, request), fields(route = "register"))]
    pub async fn register(&self, request: RegisterRequest) -> AppResult<SessionResponse> {
        if !Self::is_valid_email(&request.email) {
            return Err(AppError::invalid_input("Invalid email address"));
        }
        if !Self::is_valid_password(&request.password) {
            return Err(AppError::invalid_input(
                "Password must be at least 8 characters",
            ));
        }

        let mut user = User::new(
            request.email.clone(),
            hash_password(&request.password)?,
            request.full_name,
        );
        // Bootstrap: an empty deployment needs one platform admin
        if self.state.db.user_count().await? == 0 {
            user.is_platform_admin = true;
            info!(email = %user.email, "First account registered as platform admin");
        }
        self.state.db.create_user(&user).await?;

        // Personal team, auto-created, user as owner
        let team = Team {
            id: Uuid::new_v4(),
            name: format!("{PERSONAL_TEAM_PREFIX}{}", user.email_local_part()),
            owner_email: user.email.clone(),
            visibility: Visibility::Private,
            is_personal: true,
            created_at: Utc::now(),
        };
        self.state.db.create_team(&team).await?;

        self.record_event(&user.email, AuthEventKind::Login).await;
        self.issue_session(&user, Some(team.id)).await
    }

    /// Password login with lockout handling
    ///
    /// # Errors
    /// Returns `AuthRequired` for bad credentials, `Forbidden` while the
    /// account is locked.
    #[instrument(skip(self, request), fields(route = "login"))]
    pub async fn login(&self, request: LoginRequest) -> AppResult<SessionResponse> {
        let user = self
            .state
            .db
            .get_user(&request.email)
            .await?
            .ok_or_else(|| AppError::auth_required("Invalid email or password"))?;

        let now = Utc::now();
        if user.is_locked(now) {
            self.record_event(&user.email, AuthEventKind::Fail).await;
            return Err(AppError::forbidden("Account is temporarily locked"));
        }

        // Argon2 verification is CPU-bound; keep the reactor responsive
        let password = request.password;
        let stored_hash = user.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
            .await
            .map_err(|e| AppError::internal(format!("Verification task failed: {e}")))??;

        if !valid {
            let failures = self.state.db.record_login_failure(&user.email).await?;
            self.record_event(&user.email, AuthEventKind::Fail).await;
            if failures >= i64::from(self.state.config.auth.max_failed_logins) {
                let until = now + ChronoDuration::minutes(self.state.config.auth.lockout_minutes);
                self.state.db.lock_user_until(&user.email, until).await?;
                self.record_event(&user.email, AuthEventKind::Lockout).await;
                warn!(email = %user.email, "Account locked after repeated failures");
            }
            return Err(AppError::auth_required("Invalid email or password"));
        }

        self.state.db.reset_login_failures(&user.email).await?;
        self.record_event(&user.email, AuthEventKind::Login).await;

        let team_id = self
            .state
            .db
            .get_personal_team(&user.email)
            .await?
            .map(|t| t.id);
        self.issue_session(&user, team_id).await
    }

    async fn issue_session(&self, user: &User, team_id: Option<Uuid>) -> AppResult<SessionResponse> {
        let (token, _jti) = self
            .state
            .auth
            .issue_session_token(user, team_id.map(|t| t.to_string()))?;
        let expires_at = Utc::now()
            + ChronoDuration::seconds(
                i64::try_from(self.state.config.auth.token_ttl_secs)
                    .unwrap_or(limits::DEFAULT_TOKEN_TTL_SECS as i64),
            );

        Ok(SessionResponse {
            token,
            expires_at: expires_at.to_rfc3339(),
            user: UserInfo {
                email: user.email.clone(),
                full_name: user.full_name.clone(),
                is_platform_admin: user.is_platform_admin,
                personal_team_id: team_id.map(|t| t.to_string()),
            },
        })
    }

    /// Change the caller's password. The epoch bump inside the update revokes
    /// every outstanding session.
    ///
    /// # Errors
    /// Returns `AuthRequired` when the current password does not verify.
    pub async fn change_password(
        &self,
        identity: &IdentityContext,
        request: ChangePasswordRequest,
    ) -> AppResult<()> {
        if !Self::is_valid_password(&request.new_password) {
            return Err(AppError::invalid_input(
                "Password must be at least 8 characters",
            ));
        }
        let user = self.state.db.get_user_required(&identity.email).await?;
        if !verify_password(&request.old_password, &user.password_hash)? {
            self.record_event(&user.email, AuthEventKind::Fail).await;
            return Err(AppError::auth_required("Current password is incorrect"));
        }

        let new_hash = hash_password(&request.new_password)?;
        self.state
            .db
            .update_user_password(&user.email, &new_hash)
            .await?;
        self.record_event(&user.email, AuthEventKind::Refresh).await;
        info!(email = %user.email, "Password changed; existing sessions revoked");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Routers
// ---------------------------------------------------------------------------

/// Unauthenticated auth endpoints
pub fn public_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/email/register", post(handle_register))
        .route("/auth/email/login", post(handle_login))
        .route("/auth/sso/:provider/start", get(handle_sso_start))
        .route("/auth/sso/:provider/callback", get(handle_sso_callback))
        .with_state(state)
}

/// Authenticated auth endpoints (token catalog, password change)
pub fn protected_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/email/change-password", put(handle_change_password))
        .route("/auth/tokens", get(handle_list_tokens).post(handle_create_token))
        .route("/auth/tokens/export", get(handle_export_tokens))
        .route("/auth/tokens/rotate-signing-key", post(handle_rotate_signing_key))
        .route("/auth/tokens/:id", delete(handle_revoke_token))
        .route("/auth/revoke", post(handle_revoke_by_body))
        .with_state(state)
}

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, AppError> {
    let response = AuthService::new(state).register(request).await?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    Ok(Json(AuthService::new(state).login(request).await?))
}

async fn handle_change_password(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Response, AppError> {
    AuthService::new(state)
        .change_password(&identity, request)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn handle_create_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(request): Json<CreateTokenRequest>,
) -> Result<Response, AppError> {
    let user = state.db.get_user_required(&identity.email).await?;
    let created = state
        .api_tokens
        .create(&state.auth, &user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn handle_list_tokens(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Response, AppError> {
    let tokens = state.api_tokens.list(&identity.email).await?;
    Ok(Json(json!({ "tokens": tokens })).into_response())
}

async fn handle_export_tokens(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Response, AppError> {
    let export = state.api_tokens.signed_export(&identity.email).await?;
    Ok(Json(export).into_response())
}

async fn handle_rotate_signing_key(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Response, AppError> {
    if !identity.is_platform_admin {
        return Err(AppError::forbidden(
            "Key rotation requires platform admin",
        ));
    }
    state.api_tokens.rotate_signing_key().await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn handle_revoke_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state
        .api_tokens
        .revoke(&identity.email, identity.is_platform_admin, id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    id: Uuid,
}

async fn handle_revoke_by_body(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(request): Json<RevokeRequest>,
) -> Result<Response, AppError> {
    state
        .api_tokens
        .revoke(&identity.email, identity.is_platform_admin, request.id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// SSO
// ---------------------------------------------------------------------------

const SSO_STATE_TTL: Duration = Duration::from_secs(600);

async fn handle_sso_start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Response, AppError> {
    let provider = state.identity_providers.get(&provider)?;
    // Server-issued state, single-use, TTL-bound: CSRF protection
    let csrf_state = Uuid::new_v4().to_string();
    state
        .cache
        .set(
            &format!("sso_state:{csrf_state}"),
            provider.name(),
            SSO_STATE_TTL,
        )
        .await?;
    Ok(Redirect::temporary(&provider.authorize_url(&csrf_state)).into_response())
}

#[derive(Debug, Deserialize)]
struct SsoCallbackQuery {
    code: String,
    state: String,
}

async fn handle_sso_callback(
    State(state): State<Arc<AppState>>,
    Path(provider_name): Path<String>,
    Query(query): Query<SsoCallbackQuery>,
) -> Result<Json<SessionResponse>, AppError> {
    let key = format!("sso_state:{}", query.state);
    let stored = state
        .cache
        .get(&key)
        .await?
        .ok_or_else(|| AppError::auth_required("Unknown or expired SSO state"))?;
    state.cache.invalidate(&key).await?;
    if stored != provider_name {
        return Err(AppError::auth_required("SSO state does not match provider"));
    }

    let provider = state.identity_providers.get(&provider_name)?;
    let profile = provider.exchange_code(&query.code).await?;
    let user = provision_sso_user(&state.db, &state.config.auth, &profile).await?;

    // Ensure the personal team exists for provider-provisioned accounts
    if state.db.get_personal_team(&user.email).await?.is_none() {
        let team = Team {
            id: Uuid::new_v4(),
            name: format!("{PERSONAL_TEAM_PREFIX}{}", user.email_local_part()),
            owner_email: user.email.clone(),
            visibility: Visibility::Private,
            is_personal: true,
            created_at: Utc::now(),
        };
        state.db.create_team(&team).await?;
    }

    let team_id = state
        .db
        .get_personal_team(&user.email)
        .await?
        .map(|t| t.id);
    let service = AuthService::new(state);
    service.record_event(&user.email, AuthEventKind::Login).await;
    Ok(Json(service.issue_session(&user, team_id).await?))
}
