// ABOUTME: External plugins: MCP servers reached over stdio or Streamable HTTP
// ABOUTME: Payloads marshal through the standard invoke_hook tool; watchdog respawns crashed children
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # External Plugins
//!
//! An external plugin is itself an MCP server exposing one standard tool,
//! `invoke_hook`. The framework marshals `(hook, payload, context)` through a
//! `tools/call` and deserializes the returned [`HookResult`]. Two transports:
//!
//! - **Streamable HTTP**: one POST per invocation against the plugin URL.
//! - **stdio**: a child process speaking newline-delimited JSON-RPC. A crash
//!   is isolated from the gateway; the watchdog respawns the child with
//!   exponential backoff on the next invocation.

use super::hooks::{HookContext, HookPayload, HookPoint, HookResult, Plugin};
use crate::errors::{AppError, AppResult};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How the external plugin server is reached
#[derive(Debug, Clone)]
pub enum ExternalTransport {
    /// POST `tools/call` bodies to this URL
    Http {
        /// Plugin server endpoint
        url: String,
    },
    /// Spawn this command and speak newline-delimited JSON-RPC
    Stdio {
        /// Program and arguments
        command: Vec<String>,
    },
}

struct StdioChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

struct StdioState {
    child: Option<StdioChild>,
    consecutive_failures: u32,
}

/// A plugin living in another process
pub struct ExternalPlugin {
    name: String,
    hooks: Vec<HookPoint>,
    transport: ExternalTransport,
    timeout: Duration,
    http: reqwest::Client,
    stdio: Mutex<StdioState>,
}

impl ExternalPlugin {
    /// Build an external plugin. `hooks` comes from the manifest — the
    /// framework does not introspect the remote server.
    #[must_use]
    pub fn new(
        name: String,
        hooks: Vec<HookPoint>,
        transport: ExternalTransport,
        timeout: Duration,
    ) -> Self {
        Self {
            name,
            hooks,
            transport,
            timeout,
            http: reqwest::Client::new(),
            stdio: Mutex::new(StdioState {
                child: None,
                consecutive_failures: 0,
            }),
        }
    }

    fn invoke_request(
        hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
        id: u64,
    ) -> AppResult<JsonRpcRequest> {
        let params = json!({
            "name": "invoke_hook",
            "arguments": {
                "hook": hook,
                "payload": payload,
                "context": {
                    "request_id": context.request_id,
                    "session_id": context.session_id,
                    "user": context.user,
                    "team_id": context.team_id,
                    "server_id": context.server_id,
                },
            },
        });
        Ok(JsonRpcRequest::new(json!(id), "tools/call", Some(params)))
    }

    fn parse_hook_result(response: &JsonRpcResponse) -> AppResult<HookResult> {
        if let Some(error) = &response.error {
            return Err(AppError::upstream(format!(
                "External plugin returned error {}: {}",
                error.code, error.message
            )));
        }
        let result = response
            .result
            .as_ref()
            .ok_or_else(|| AppError::upstream("External plugin returned no result"))?;
        // MCP tools/call wraps structured output; accept either the bare
        // HookResult or {"structuredContent": {...}}
        let body: &Value = result.get("structuredContent").unwrap_or(result);
        serde_json::from_value(body.clone())
            .map_err(|e| AppError::upstream(format!("Malformed HookResult from plugin: {e}")))
    }

    async fn call_http(&self, url: &str, request: &JsonRpcRequest) -> AppResult<HookResult> {
        let response: JsonRpcResponse = self
            .http
            .post(url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::upstream(format!("External plugin HTTP error: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("External plugin sent invalid JSON: {e}")))?;
        Self::parse_hook_result(&response)
    }

    async fn spawn_child(command: &[String]) -> AppResult<StdioChild> {
        let program = command
            .first()
            .ok_or_else(|| AppError::internal("External plugin command is empty"))?;
        let mut child = Command::new(program)
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::internal(format!("Failed to spawn plugin process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::internal("Plugin child has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::internal("Plugin child has no stdout"))?;

        Ok(StdioChild {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    async fn call_stdio(
        &self,
        command: &[String],
        hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
    ) -> AppResult<HookResult> {
        let mut state = self.stdio.lock().await;

        if state.child.is_none() {
            // Watchdog backoff: failures delay the respawn, capped at 30s
            if state.consecutive_failures > 0 {
                let backoff = Duration::from_millis(
                    (250u64 << state.consecutive_failures.min(7)).min(30_000),
                );
                tokio::time::sleep(backoff).await;
            }
            match Self::spawn_child(command).await {
                Ok(child) => {
                    info!(plugin = %self.name, "External plugin process started");
                    state.child = Some(child);
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    return Err(e);
                }
            }
        }

        let result = self
            .exchange_with_child(&mut state, hook, payload, context)
            .await;

        match result {
            Ok(hook_result) => {
                state.consecutive_failures = 0;
                Ok(hook_result)
            }
            Err(e) => {
                // Tear the child down; next invocation respawns with backoff
                if let Some(mut dead) = state.child.take() {
                    let _ = dead.child.kill().await;
                }
                state.consecutive_failures += 1;
                warn!(plugin = %self.name, error = %e, "External plugin process failed");
                Err(e)
            }
        }
    }

    async fn exchange_with_child(
        &self,
        state: &mut StdioState,
        hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
    ) -> AppResult<HookResult> {
        let child = state
            .child
            .as_mut()
            .ok_or_else(|| AppError::internal("Plugin child vanished"))?;
        let id = child.next_id;
        child.next_id += 1;

        let request = Self::invoke_request(hook, payload, context, id)?;
        let mut line = serde_json::to_string(&request)
            .map_err(|e| AppError::internal(format!("Request serialization failed: {e}")))?;
        line.push('\n');

        let exchange = async {
            child
                .stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| AppError::upstream(format!("Plugin stdin write failed: {e}")))?;
            child
                .stdin
                .flush()
                .await
                .map_err(|e| AppError::upstream(format!("Plugin stdin flush failed: {e}")))?;

            let mut response_line = String::new();
            let read = child
                .stdout
                .read_line(&mut response_line)
                .await
                .map_err(|e| AppError::upstream(format!("Plugin stdout read failed: {e}")))?;
            if read == 0 {
                return Err(AppError::upstream("Plugin process closed its stdout"));
            }
            let response: JsonRpcResponse = serde_json::from_str(response_line.trim())
                .map_err(|e| AppError::upstream(format!("Plugin sent invalid JSON-RPC: {e}")))?;
            Self::parse_hook_result(&response)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| AppError::timeout(format!("External plugin {} timed out", self.name)))?
    }
}

#[async_trait::async_trait]
impl Plugin for ExternalPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &[HookPoint] {
        &self.hooks
    }

    async fn handle(
        &self,
        hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
    ) -> AppResult<HookResult> {
        match &self.transport {
            ExternalTransport::Http { url } => {
                let request = Self::invoke_request(hook, payload, context, 1)?;
                self.call_http(url, &request).await
            }
            ExternalTransport::Stdio { command } => {
                self.call_stdio(command, hook, payload, context).await
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn hook_result_parses_from_bare_and_wrapped_shapes() {
        let bare = JsonRpcResponse::success(
            json!(1),
            json!({"continue_processing": true, "metadata": {"checked": true}}),
        );
        let result = ExternalPlugin::parse_hook_result(&bare).unwrap();
        assert!(result.continue_processing);
        assert_eq!(result.metadata["checked"], json!(true));

        let wrapped = JsonRpcResponse::success(
            json!(2),
            json!({"structuredContent": {"continue_processing": false,
                   "violation": {"code": "X", "reason": "r", "description": "d"}}}),
        );
        let result = ExternalPlugin::parse_hook_result(&wrapped).unwrap();
        assert_eq!(result.violation.unwrap().code, "X");
    }

    #[test]
    fn rpc_error_becomes_upstream_error() {
        let response = JsonRpcResponse::error(
            json!(1),
            crate::jsonrpc::JsonRpcError::new(-32603, "kaput", None),
        );
        let err = ExternalPlugin::parse_hook_result(&response).unwrap_err();
        assert!(matches!(err, AppError::UpstreamError(_)));
    }
}
