// ABOUTME: stdio transport: newline-delimited JSON over stdin/stdout
// ABOUTME: One session per process, local trust, EOF cancels everything
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # stdio Transport
//!
//! One session for the whole process, bound to stdin/stdout. There is no
//! credential exchange on this transport — a stdio client is assumed to be
//! the local operator, so the session runs under a platform-admin local
//! identity. EOF on stdin closes the session and cancels in-flight work.

use crate::errors::{AppError, AppResult};
use crate::models::TokenScope;
use crate::permissions::IdentityContext;
use crate::protocol::McpEngine;
use crate::state::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// The identity a stdio session runs under (assumed local trust)
#[must_use]
pub fn local_identity() -> IdentityContext {
    IdentityContext {
        email: "local@mcp-gateway".to_owned(),
        is_platform_admin: true,
        teams: HashMap::new(),
        jti: "stdio-local".to_owned(),
        token_scope: TokenScope::All,
        token_scope_ref: None,
    }
}

/// Serve one stdio session until EOF
///
/// # Errors
/// Returns an error when stdout becomes unwritable.
pub async fn run(state: Arc<AppState>) -> AppResult<()> {
    let engine = McpEngine::new(state.clone());
    let session = state.sessions.create(local_identity(), None);
    info!(session = %session.id, "stdio session started");

    // Single writer task: responses and server-initiated frames share the
    // session channel, which preserves emission order on the wire
    let mut outbound = session
        .take_outbound()
        .await
        .ok_or_else(|| AppError::internal("Fresh session without an outbound channel"))?;
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = outbound.recv().await {
            let mut line = frame.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let empty_headers = HashMap::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let frame: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Dropping malformed stdio frame");
                let err = crate::jsonrpc::JsonRpcResponse::from_app_error(
                    serde_json::Value::Null,
                    &AppError::invalid_input(format!("Malformed frame: {e}")),
                );
                if let Ok(value) = serde_json::to_value(&err) {
                    session.push_outbound(value);
                }
                continue;
            }
        };
        if let Some(response) = engine.handle_frame(&session, frame, &empty_headers).await {
            if let Ok(value) = serde_json::to_value(&response) {
                session.push_outbound(value);
            }
        }
    }

    // EOF: tear down the session, which cancels its request tree
    info!(session = %session.id, "stdin closed; ending stdio session");
    state.sessions.close(&session.id).await;
    writer.abort();
    Ok(())
}
