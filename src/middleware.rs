// ABOUTME: HTTP middleware: request ids and the auth pipeline with HTTP hooks
// ABOUTME: Order: pre_request -> resolve_user -> JWT -> check_permission -> handler -> post_request
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # HTTP Middleware
//!
//! Two layers wrap the protected surface:
//!
//! - [`request_context`] stamps every request with a process-unique id,
//!   echoed in the `x-request-id` response header and attached to every log
//!   line and audit row.
//! - [`authenticate`] runs the HTTP hook pipeline in its contractual order:
//!   `http_pre_request` → `http_auth_resolve_user` (a plugin may short-
//!   circuit identity) → built-in JWT validation → `http_auth_check_permission`
//!   (a plugin may veto) → handler → `http_post_request`.

use crate::auth::extract_bearer;
use crate::errors::AppError;
use crate::models::TokenScope;
use crate::permissions::IdentityContext;
use crate::plugins::{HookContext, HookPayload, HookPoint};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Process-unique request id carried through extensions
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Stamp a request id and echo it back on the response
pub async fn request_context(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Headers exposed to HTTP hooks; credentials never reach plugins
fn hook_headers(request: &Request) -> HashMap<String, String> {
    request
        .headers()
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name != "authorization" && name != "cookie"
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

/// The authentication pipeline for the protected surface
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map_or_else(|| Uuid::new_v4().to_string(), |id| id.0.clone());
    let hook_context = HookContext::new(request_id);

    let payload = HookPayload::HttpRequest {
        method: request.method().to_string(),
        path: request.uri().path().to_owned(),
        headers: hook_headers(&request),
        user: None,
    };

    let outcome = match state
        .plugins
        .run_hook(HookPoint::HttpPreRequest, payload, &hook_context, None)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    // A resolve_user plugin may establish identity, short-circuiting JWT auth
    let outcome = match state
        .plugins
        .run_hook(
            HookPoint::HttpAuthResolveUser,
            outcome.payload,
            &hook_context,
            None,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };
    let plugin_user = match &outcome.payload {
        HookPayload::HttpRequest { user, .. } => user.clone(),
        _ => None,
    };

    let identity = match plugin_user {
        Some(email) => match resolve_plugin_user(&state, &email).await {
            Ok(identity) => identity,
            Err(e) => return e.into_response(),
        },
        None => {
            let header = match request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| AppError::auth_required("Missing Authorization header"))
            {
                Ok(header) => header.to_owned(),
                Err(e) => return e.into_response(),
            };
            match builtin_jwt_auth(&state, &header).await {
                Ok(identity) => identity,
                Err(e) => return e.into_response(),
            }
        }
    };

    // check_permission plugins see the resolved user and may veto
    let permission_payload = match outcome.payload {
        HookPayload::HttpRequest {
            method,
            path,
            headers,
            ..
        } => HookPayload::HttpRequest {
            method,
            path,
            headers,
            user: Some(identity.email.clone()),
        },
        other => other,
    };
    if let Err(e) = state
        .plugins
        .run_hook(
            HookPoint::HttpAuthCheckPermission,
            permission_payload.clone(),
            &hook_context,
            None,
        )
        .await
    {
        return e.into_response();
    }

    request.extensions_mut().insert(identity);
    let response = next.run(request).await;

    // Post hook runs after the handler; failures only log
    if let Err(e) = state
        .plugins
        .run_hook(
            HookPoint::HttpPostRequest,
            permission_payload,
            &hook_context,
            None,
        )
        .await
    {
        debug!(error = %e, "http_post_request hook failed");
    }
    response
}

async fn resolve_plugin_user(
    state: &Arc<AppState>,
    email: &str,
) -> Result<IdentityContext, AppError> {
    let user = state
        .db
        .get_user(email)
        .await?
        .ok_or_else(|| AppError::auth_required("Resolved user does not exist"))?;
    let teams = state.db.membership_map(email).await?;
    Ok(IdentityContext {
        email: user.email,
        is_platform_admin: user.is_platform_admin,
        teams,
        jti: "plugin-resolved".to_owned(),
        token_scope: TokenScope::All,
        token_scope_ref: None,
    })
}

async fn builtin_jwt_auth(
    state: &Arc<AppState>,
    header: &str,
) -> Result<IdentityContext, AppError> {
    let token = extract_bearer(header)?;
    let claims = state.auth.validate_token(token)?;
    state.auth.resolve_identity(&state.db, &claims).await
}
