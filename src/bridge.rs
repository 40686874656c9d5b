// ABOUTME: Standalone transport translation: stdio child <-> SSE/Streamable HTTP
// ABOUTME: Multiplexes HTTP clients onto one child by rewriting request ids
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Translation Bridge
//!
//! `mcp-translate --stdio "cmd" --port N` spawns the child MCP server and
//! exposes SSE + Streamable HTTP endpoints in front of it. Many HTTP clients
//! share the single child: every forwarded request id is rewritten into a
//! bridge-unique numeric space and translated back on the response, so
//! concurrent clients cannot collide.
//!
//! `mcp-translate --sse URL` runs the reverse direction: a remote SSE
//! endpoint is bridged onto local stdio.

use crate::errors::{AppError, AppResult};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use dashmap::DashMap;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Timeout for one bridged request against the child
const BRIDGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A child MCP server bridged to HTTP clients
pub struct StdioBridge {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    /// Bridge-unique request id -> waiter for the translated response
    pending: DashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    next_id: AtomicU64,
    /// SSE client sessions receiving child-initiated traffic
    broadcast: DashMap<String, mpsc::UnboundedSender<Value>>,
}

impl StdioBridge {
    /// Spawn the child command and start the response reader
    ///
    /// # Errors
    /// Returns an error when the command cannot be spawned or lacks pipes.
    pub async fn spawn(command: &str) -> AppResult<Arc<Self>> {
        let parts: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
        let program = parts
            .first()
            .ok_or_else(|| AppError::invalid_input("Empty child command"))?;

        let mut child = Command::new(program)
            .args(&parts[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::internal(format!("Failed to spawn child: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::internal("Child has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::internal("Child has no stdout"))?;

        let bridge = Arc::new(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            broadcast: DashMap::new(),
        });

        let reader = bridge.clone();
        tokio::spawn(async move {
            reader.read_child_output(stdout).await;
        });

        info!(command = %command, "Bridge child started");
        Ok(bridge)
    }

    async fn read_child_output(self: Arc<Self>, stdout: tokio::process::ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(frame) = serde_json::from_str::<Value>(trimmed) else {
                debug!("Dropping non-JSON child output line");
                continue;
            };

            // Responses with a bridge id return to their waiting client;
            // everything else (child notifications/requests) is broadcast
            let bridge_id = frame
                .get("id")
                .and_then(Value::as_u64)
                .filter(|_| frame.get("method").is_none());
            if let Some(id) = bridge_id {
                if let Some((_, waiter)) = self.pending.remove(&id) {
                    if let Ok(response) = serde_json::from_value::<JsonRpcResponse>(frame) {
                        let _ = waiter.send(response);
                    }
                    continue;
                }
            }
            for session in &self.broadcast {
                let _ = session.value().send(frame.clone());
            }
        }
        warn!("Bridge child closed its stdout");
    }

    /// Forward one client frame to the child. Requests block for the
    /// translated response; notifications return `None` immediately.
    ///
    /// # Errors
    /// Returns `Timeout` when the child does not answer, `Internal` when its
    /// stdin is gone.
    pub async fn forward(&self, request: JsonRpcRequest) -> AppResult<Option<JsonRpcResponse>> {
        if request.is_notification() {
            self.write_frame(&serde_json::to_value(&request)?).await?;
            return Ok(None);
        }

        // Rewrite the id into the bridge-unique space
        let original_id = request.id.clone().unwrap_or(Value::Null);
        let bridge_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut rewritten = request;
        rewritten.id = Some(Value::from(bridge_id));

        let (tx, rx) = oneshot::channel();
        self.pending.insert(bridge_id, tx);

        if let Err(e) = self.write_frame(&serde_json::to_value(&rewritten)?).await {
            self.pending.remove(&bridge_id);
            return Err(e);
        }

        let response = tokio::time::timeout(BRIDGE_REQUEST_TIMEOUT, rx).await;
        self.pending.remove(&bridge_id);
        match response {
            Ok(Ok(mut response)) => {
                // Translate the id back before it reaches the client
                response.id = original_id;
                Ok(Some(response))
            }
            Ok(Err(_)) => Err(AppError::internal("Bridge reader dropped the response")),
            Err(_) => Err(AppError::timeout("Child did not answer in time")),
        }
    }

    async fn write_frame(&self, frame: &Value) -> AppResult<()> {
        let mut line = frame.to_string();
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::internal(format!("Child stdin write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::internal(format!("Child stdin flush failed: {e}")))
    }

    /// Register an SSE client session for child-initiated traffic
    pub fn attach_session(&self) -> (String, mpsc::UnboundedReceiver<Value>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.broadcast.insert(id.clone(), tx);
        (id, rx)
    }

    /// Remove an SSE client session
    pub fn detach_session(&self, id: &str) {
        self.broadcast.remove(id);
    }

    /// Terminate the child
    pub async fn shutdown(&self) {
        let _ = self.child.lock().await.kill().await;
    }
}

// ---------------------------------------------------------------------------
// Forward mode HTTP surface
// ---------------------------------------------------------------------------

mod http_surface {
    use super::StdioBridge;
    use crate::errors::AppError;
    use crate::jsonrpc::JsonRpcRequest;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::sse::{Event, KeepAlive, Sse};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use futures_util::Stream;
    use serde::Deserialize;
    use serde_json::Value;
    use std::sync::Arc;

    pub fn routes(bridge: Arc<StdioBridge>) -> Router {
        Router::new()
            .route("/mcp", post(streamable_post))
            .route("/sse", get(open_sse))
            .route("/messages", post(sse_post))
            .route("/health", get(|| async { Json(serde_json::json!({"status": "ok"})) }))
            .with_state(bridge)
    }

    async fn streamable_post(
        State(bridge): State<Arc<StdioBridge>>,
        Json(body): Json<Value>,
    ) -> Response {
        let request: JsonRpcRequest = match serde_json::from_value(body) {
            Ok(request) => request,
            Err(e) => {
                return AppError::invalid_input(format!("Malformed frame: {e}")).into_response()
            }
        };
        match bridge.forward(request).await {
            Ok(Some(response)) => Json(response).into_response(),
            Ok(None) => StatusCode::ACCEPTED.into_response(),
            Err(e) => e.into_response(),
        }
    }

    async fn open_sse(
        State(bridge): State<Arc<StdioBridge>>,
    ) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
        let (session_id, mut rx) = bridge.attach_session();
        let endpoint = format!("/messages?session_id={session_id}");

        struct Guard {
            bridge: Arc<StdioBridge>,
            session_id: String,
        }
        impl Drop for Guard {
            fn drop(&mut self) {
                self.bridge.detach_session(&self.session_id);
            }
        }
        let guard = Guard {
            bridge,
            session_id,
        };

        let stream = async_stream::stream! {
            let _guard = guard;
            yield Ok(Event::default().event("endpoint").data(endpoint));
            while let Some(frame) = rx.recv().await {
                yield Ok(Event::default().event("message").data(frame.to_string()));
            }
        };
        Sse::new(stream).keep_alive(KeepAlive::default())
    }

    #[derive(Debug, Deserialize)]
    struct SessionQuery {
        session_id: String,
    }

    async fn sse_post(
        State(bridge): State<Arc<StdioBridge>>,
        Query(query): Query<SessionQuery>,
        Json(body): Json<Value>,
    ) -> Response {
        let request: JsonRpcRequest = match serde_json::from_value(body) {
            Ok(request) => request,
            Err(e) => {
                return AppError::invalid_input(format!("Malformed frame: {e}")).into_response()
            }
        };
        let bridge_for_task = bridge.clone();
        let session_id = query.session_id;
        tokio::spawn(async move {
            match bridge_for_task.forward(request).await {
                Ok(Some(response)) => {
                    if let (Some(tx), Ok(frame)) = (
                        bridge_for_task
                            .broadcast
                            .get(&session_id)
                            .map(|s| s.value().clone()),
                        serde_json::to_value(&response),
                    ) {
                        let _ = tx.send(frame);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Bridged request failed");
                }
            }
        });
        StatusCode::ACCEPTED.into_response()
    }
}

/// Run forward mode: child stdio server exposed over HTTP
///
/// # Errors
/// Returns an error when the child cannot spawn or the port cannot bind.
pub async fn run_forward(command: &str, bind_address: &str, port: u16) -> AppResult<()> {
    let bridge = StdioBridge::spawn(command).await?;
    let app = http_surface::routes(bridge.clone());

    let listener = tokio::net::TcpListener::bind((bind_address, port))
        .await
        .map_err(|e| AppError::internal(format!("Cannot bind {bind_address}:{port}: {e}")))?;
    info!(%bind_address, port, "Bridge serving SSE + Streamable HTTP");

    let result = axum::serve(listener, app)
        .await
        .map_err(|e| AppError::internal(format!("Bridge server failed: {e}")));
    bridge.shutdown().await;
    result
}

/// Run reverse mode: a remote SSE endpoint bridged onto local stdio
///
/// # Errors
/// Returns an error when the remote endpoint cannot be reached.
pub async fn run_reverse(sse_url: &str) -> AppResult<()> {
    let http = reqwest::Client::new();
    let response = http
        .get(sse_url)
        .header("accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("Remote SSE unreachable: {e}")))?
        .error_for_status()
        .map_err(|e| AppError::upstream(format!("Remote SSE rejected: {e}")))?;

    let mut stream = response.bytes_stream().eventsource();

    // First event announces the POST endpoint
    let endpoint = loop {
        let event = stream
            .next()
            .await
            .ok_or_else(|| AppError::upstream("Remote SSE closed before endpoint event"))?
            .map_err(|e| AppError::upstream(format!("Remote SSE stream error: {e}")))?;
        if event.event == "endpoint" {
            let base = url::Url::parse(sse_url)
                .map_err(|e| AppError::invalid_input(format!("Invalid SSE URL: {e}")))?;
            break base
                .join(&event.data)
                .map(|u| u.to_string())
                .unwrap_or(event.data);
        }
    };
    info!(%endpoint, "Reverse bridge connected");

    // Remote -> stdout
    let stdout_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(Ok(event)) = stream.next().await {
            if event.event == "message" {
                let mut line = event.data;
                line.push('\n');
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
                let _ = stdout.flush().await;
            }
        }
    });

    // stdin -> remote
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(frame) = serde_json::from_str::<Value>(trimmed) else {
            debug!("Dropping malformed stdin frame");
            continue;
        };
        if let Err(e) = http.post(&endpoint).json(&frame).send().await {
            warn!(error = %e, "Failed to forward frame to remote");
        }
    }

    stdout_task.abort();
    Ok(())
}
