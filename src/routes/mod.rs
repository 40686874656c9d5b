// ABOUTME: Router assembly: protected surface behind the auth pipeline
// ABOUTME: Health, metrics, and login endpoints stay public
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Routes
//!
//! The full HTTP application: MCP transports and the admin catalog API run
//! behind the authentication pipeline; health/metrics and the credential
//! endpoints (login, register, SSO) are public. Every request gets a
//! process-unique request id.

pub mod auth;
pub mod catalog;

use crate::middleware::{authenticate, request_context};
use crate::state::AppState;
use axum::middleware::from_fn_with_state;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Assemble the full application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .merge(crate::transports::streamable::routes(state.clone()))
        .merge(crate::transports::sse::routes(state.clone()))
        .merge(catalog::routes(state.clone()))
        .merge(auth::protected_routes(state.clone()))
        .layer(from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .merge(protected)
        .merge(auth::public_routes(state.clone()))
        .merge(crate::health::routes(state))
        .layer(axum::middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
}
