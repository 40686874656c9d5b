// ABOUTME: Legacy SSE transport: GET stream announces a per-session POST endpoint
// ABOUTME: Responses ride the stream as message events; stream drop closes the session
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # SSE Transport (legacy)
//!
//! `GET /sse` opens the event stream. The first event is `endpoint`, naming
//! the per-session POST URL (`/messages?session_id=...`). JSON-RPC requests
//! POST there and answer `202 Accepted`; the actual responses stream back as
//! `message` events in emission order. Keepalive comments flow at the
//! configured interval. Dropping the stream closes the session and cancels
//! its in-flight requests.

use crate::errors::AppError;
use crate::permissions::IdentityContext;
use crate::protocol::McpEngine;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Routes for the legacy SSE transport
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sse", get(open_stream))
        .route("/servers/:server_id/sse", get(open_scoped_stream))
        .route("/messages", post(post_message))
        .with_state(state)
}

/// Closes the session when the client drops the event stream
struct StreamGuard {
    state: Arc<AppState>,
    session_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            debug!(session = %session_id, "SSE stream dropped; closing session");
            state.sessions.close(&session_id).await;
        });
    }
}

async fn open_stream(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    build_stream(state, identity, None).await
}

async fn open_scoped_stream(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(server_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    build_stream(state, identity, Some(server_id)).await
}

async fn build_stream(
    state: Arc<AppState>,
    identity: IdentityContext,
    server_scope: Option<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    let session = state.sessions.create(identity, server_scope);
    let mut outbound = session
        .take_outbound()
        .await
        .ok_or_else(|| AppError::internal("Fresh session without an outbound channel"))?;

    let endpoint = format!("/messages?session_id={}", session.id);
    let keepalive = state.config.http.sse_keepalive;
    let guard = StreamGuard {
        state: state.clone(),
        session_id: session.id.clone(),
    };

    let stream = async_stream::stream! {
        // The guard lives inside the stream so dropping the response body
        // tears the session down
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));
        while let Some(frame) = outbound.recv().await {
            yield Ok(Event::default().event("message").data(frame.to_string()));
        }
    };
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(keepalive)
            .event(Event::default().event("keepalive").data("{}")),
    ))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessageQuery>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(session) = state.sessions.get(&query.session_id) else {
        return AppError::not_found("Unknown session").into_response();
    };

    let inbound: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();

    let engine = McpEngine::new(state.clone());
    let session_for_task = session.clone();
    // Respond 202 immediately; the JSON-RPC response rides the stream
    tokio::spawn(async move {
        if let Some(response) = engine
            .handle_frame(&session_for_task, body, &inbound)
            .await
        {
            if let Ok(frame) = serde_json::to_value(&response) {
                session_for_task.push_outbound(frame);
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}
