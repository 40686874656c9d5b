// ABOUTME: Streamable HTTP transport: one endpoint, stateless or session-keyed
// ABOUTME: GET opens the server-to-client stream; DELETE tears the session down
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Streamable HTTP
//!
//! `POST /mcp` accepts a JSON-RPC body. Without an `Mcp-Session-Id` header
//! the request is stateless single-shot; an `initialize` request opens a
//! stateful session whose id returns in the response header. `GET /mcp`
//! attaches the server-to-client event stream for an existing session;
//! `DELETE /mcp` closes it. Virtual-server-scoped variants live under
//! `/servers/{id}/mcp`.

use crate::constants::protocol::MCP_SESSION_HEADER;
use crate::errors::AppError;
use crate::permissions::IdentityContext;
use crate::protocol::McpEngine;
use crate::state::AppState;
use crate::transports::SessionPhase;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use futures_util::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Routes for the Streamable HTTP transport
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(handle_post).get(handle_get_stream).delete(handle_delete),
        )
        .route("/servers/:server_id/mcp", post(handle_scoped_post))
        .with_state(state)
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

fn is_initialize(body: &Value) -> bool {
    body.get("method").and_then(Value::as_str) == Some("initialize")
}

async fn handle_post(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    process_post(state, identity, headers, body, None).await
}

async fn handle_scoped_post(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(server_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    process_post(state, identity, headers, body, Some(server_id)).await
}

async fn process_post(
    state: Arc<AppState>,
    identity: IdentityContext,
    headers: HeaderMap,
    body: Value,
    server_scope: Option<Uuid>,
) -> Response {
    let engine = McpEngine::new(state.clone());
    let inbound = header_map(&headers);
    let presented_session = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match presented_session {
        Some(session_id) => {
            // Stateful request on an existing session
            let Some(session) = state.sessions.get(&session_id) else {
                return AppError::not_found("Unknown session").into_response();
            };
            match engine.handle_frame(&session, body, &inbound).await {
                Some(response) => Json(response).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            }
        }
        None if is_initialize(&body) => {
            // Opening handshake: create the session, return its id
            let session = state.sessions.create(identity, server_scope);
            let response = engine.handle_frame(&session, body, &inbound).await;
            let mut http = match response {
                Some(response) => Json(response).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            };
            if let Ok(value) = session.id.parse() {
                http.headers_mut().insert(MCP_SESSION_HEADER, value);
            }
            http
        }
        None => {
            // Stateless single-shot: an ephemeral session, ready immediately
            let session = state.sessions.create(identity, server_scope);
            session.set_phase(SessionPhase::Ready).await;
            let response = engine.handle_frame(&session, body, &inbound).await;
            state.sessions.close(&session.id).await;
            match response {
                Some(response) => Json(response).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            }
        }
    }
}

/// Attach the server-to-client stream for a stateful session
async fn handle_get_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    let session_id = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::invalid_input("Mcp-Session-Id header required"))?;
    let session = state
        .sessions
        .get(session_id)
        .ok_or_else(|| AppError::not_found("Unknown session"))?;
    let mut outbound = session
        .take_outbound()
        .await
        .ok_or_else(|| AppError::conflict("Session stream already attached"))?;

    let keepalive = state.config.http.sse_keepalive;
    let stream = async_stream::stream! {
        while let Some(frame) = outbound.recv().await {
            let data = frame.to_string();
            yield Ok(Event::default().event("message").data(data));
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(keepalive)))
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return AppError::invalid_input("Mcp-Session-Id header required").into_response();
    };
    state.sessions.close(session_id).await;
    StatusCode::NO_CONTENT.into_response()
}
