// ABOUTME: MCP client for peer gateways over Streamable HTTP and legacy SSE
// ABOUTME: Implements the PeerInvoker seam the dispatcher forwards through
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Federation Client
//!
//! Speaks MCP to peer gateways. Streamable HTTP peers get one POST per
//! request; SSE peers get the legacy dance — open the GET stream, read the
//! `endpoint` event, POST requests to that URL, and match `message` events
//! back to request ids.

use crate::cancellation::CancellationToken;
use crate::constants::protocol::MCP_PROTOCOL_VERSION;
use crate::constants::server_info;
use crate::crypto::SecretVault;
use crate::errors::{AppError, AppResult};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::models::{AuthScheme, Gateway, TransportKind};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Peer capabilities captured during the handshake
#[derive(Debug, Clone)]
pub struct PeerHandshake {
    /// The peer's advertised capabilities object
    pub capabilities: Value,
    /// The peer's serverInfo
    pub server_info: Value,
    /// Gateway ids the peer reports reaching (its own id first), used for
    /// transitive loop detection
    pub reachable_gateway_ids: Vec<String>,
}

/// A tool definition as listed by a peer
#[derive(Debug, Clone)]
pub struct PeerToolDef {
    /// Peer-side tool name
    pub name: String,
    /// Description when provided
    pub description: Option<String>,
    /// Input schema
    pub input_schema: Value,
    /// Annotations when provided
    pub annotations: Value,
}

/// A resource definition as listed by a peer
#[derive(Debug, Clone)]
pub struct PeerResourceDef {
    /// Resource URI
    pub uri: String,
    /// Display name
    pub name: String,
    /// MIME type when declared
    pub mime_type: Option<String>,
}

/// A prompt definition as listed by a peer
#[derive(Debug, Clone)]
pub struct PeerPromptDef {
    /// Prompt name
    pub name: String,
    /// Description when provided
    pub description: Option<String>,
    /// Declared arguments
    pub arguments: Value,
}

/// MCP client toward peer gateways
pub struct FederationClient {
    http: reqwest::Client,
    vault: Arc<SecretVault>,
    request_timeout: Duration,
}

impl FederationClient {
    /// Build the client
    #[must_use]
    pub fn new(vault: Arc<SecretVault>, request_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            vault,
            request_timeout,
        }
    }

    fn auth_headers(&self, gateway: &Gateway) -> AppResult<Vec<(String, String)>> {
        let Some(encrypted) = &gateway.auth_value_encrypted else {
            return Ok(Vec::new());
        };
        let secret = self.vault.decrypt(encrypted)?;
        Ok(match gateway.auth_type {
            Some(AuthScheme::Bearer) => vec![(
                "authorization".to_owned(),
                format!("Bearer {}", secret.expose()),
            )],
            Some(AuthScheme::Basic) => vec![(
                "authorization".to_owned(),
                format!("Basic {}", secret.expose()),
            )],
            Some(AuthScheme::Headers) => {
                // The secret is a JSON object of header name -> value
                let map: serde_json::Map<String, Value> =
                    serde_json::from_str(secret.expose()).map_err(|e| {
                        AppError::internal(format!("Malformed header credential blob: {e}"))
                    })?;
                map.into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_owned())))
                    .collect()
            }
            Some(AuthScheme::Oauth) | None => Vec::new(),
        })
    }

    /// One JSON-RPC round-trip to the peer over its configured transport
    ///
    /// # Errors
    /// Returns `UpstreamError`/`Timeout` on transport failures.
    pub async fn rpc(
        &self,
        gateway: &Gateway,
        request: &JsonRpcRequest,
    ) -> AppResult<JsonRpcResponse> {
        match gateway.transport {
            TransportKind::StreamableHttp => self.rpc_streamable(gateway, request).await,
            TransportKind::Sse => self.rpc_sse(gateway, request).await,
        }
    }

    async fn rpc_streamable(
        &self,
        gateway: &Gateway,
        request: &JsonRpcRequest,
    ) -> AppResult<JsonRpcResponse> {
        let mut builder = self
            .http
            .post(&gateway.url)
            .header("accept", "application/json, text/event-stream")
            .json(request)
            .timeout(self.request_timeout);
        for (name, value) in self.auth_headers(gateway)? {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::upstream(format!("Peer unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::upstream(format!("Peer returned {status}")));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        if content_type.starts_with("text/event-stream") {
            // Streamable HTTP may answer over a short-lived event stream;
            // the response for our id is the first message event
            let wanted_id = request.id.clone().unwrap_or(Value::Null);
            let mut stream = response.bytes_stream().eventsource();
            while let Some(event) = stream.next().await {
                let event =
                    event.map_err(|e| AppError::upstream(format!("Peer stream error: {e}")))?;
                if event.event == "message" || event.event.is_empty() {
                    let parsed: JsonRpcResponse = serde_json::from_str(&event.data)
                        .map_err(|e| AppError::upstream(format!("Peer sent invalid JSON: {e}")))?;
                    if parsed.id == wanted_id {
                        return Ok(parsed);
                    }
                }
            }
            return Err(AppError::upstream("Peer stream ended without a response"));
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| AppError::upstream(format!("Peer sent invalid JSON: {e}")))
    }

    async fn rpc_sse(
        &self,
        gateway: &Gateway,
        request: &JsonRpcRequest,
    ) -> AppResult<JsonRpcResponse> {
        let auth_headers = self.auth_headers(gateway)?;

        // Open the stream; the first event names the per-session POST URL
        let mut builder = self
            .http
            .get(&gateway.url)
            .header("accept", "text/event-stream");
        for (name, value) in &auth_headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::upstream(format!("Peer SSE unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::upstream(format!(
                "Peer SSE returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream().eventsource();
        let endpoint = loop {
            let event = tokio::time::timeout(self.request_timeout, stream.next())
                .await
                .map_err(|_| AppError::timeout("Peer SSE endpoint event timed out"))?
                .ok_or_else(|| AppError::upstream("Peer SSE closed before endpoint event"))?
                .map_err(|e| AppError::upstream(format!("Peer SSE stream error: {e}")))?;
            if event.event == "endpoint" {
                break resolve_endpoint(&gateway.url, &event.data)?;
            }
        };

        // POST the request to the announced endpoint
        let mut post = self.http.post(&endpoint).json(request);
        for (name, value) in &auth_headers {
            post = post.header(name, value);
        }
        post.send()
            .await
            .map_err(|e| AppError::upstream(format!("Peer SSE POST failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::upstream(format!("Peer SSE POST rejected: {e}")))?;

        // Await the matching message event on the stream
        let wanted_id = request.id.clone().unwrap_or(Value::Null);
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = tokio::time::timeout(remaining, stream.next())
                .await
                .map_err(|_| AppError::timeout("Peer SSE response timed out"))?
                .ok_or_else(|| AppError::upstream("Peer SSE closed before response"))?
                .map_err(|e| AppError::upstream(format!("Peer SSE stream error: {e}")))?;
            if event.event == "message" {
                let parsed: JsonRpcResponse = serde_json::from_str(&event.data)
                    .map_err(|e| AppError::upstream(format!("Peer sent invalid JSON: {e}")))?;
                if parsed.id == wanted_id {
                    return Ok(parsed);
                }
            }
        }
    }

    fn unwrap_result(response: JsonRpcResponse) -> AppResult<Value> {
        if let Some(error) = response.error {
            return Err(AppError::upstream(format!(
                "Peer error {}: {}",
                error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| AppError::upstream("Peer response carried no result"))
    }

    /// MCP initialize handshake against the peer
    ///
    /// # Errors
    /// Returns `UpstreamError` when the peer misbehaves.
    pub async fn initialize(&self, gateway: &Gateway) -> AppResult<PeerHandshake> {
        let request = JsonRpcRequest::new(
            json!(1),
            "initialize",
            Some(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": server_info::NAME,
                    "version": server_info::VERSION,
                },
            })),
        );
        let result = Self::unwrap_result(self.rpc(gateway, &request).await?)?;

        // Peers running this gateway advertise their reachability set under
        // capabilities.federation.gateway_ids; foreign servers simply lack it
        let reachable_gateway_ids = result
            .pointer("/capabilities/federation/gateway_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        // Best effort: the initialized notification completes the handshake
        let note = JsonRpcRequest::notification("notifications/initialized", None);
        let _ = self.rpc(gateway, &note).await;

        Ok(PeerHandshake {
            capabilities: result.get("capabilities").cloned().unwrap_or(Value::Null),
            server_info: result.get("serverInfo").cloned().unwrap_or(Value::Null),
            reachable_gateway_ids,
        })
    }

    /// `tools/list` against the peer
    ///
    /// # Errors
    /// Returns `UpstreamError` when the peer misbehaves.
    pub async fn list_tools(&self, gateway: &Gateway) -> AppResult<Vec<PeerToolDef>> {
        let request = JsonRpcRequest::new(json!(2), "tools/list", Some(json!({})));
        let result = Self::unwrap_result(self.rpc(gateway, &request).await?)?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(tools
            .into_iter()
            .filter_map(|t| {
                Some(PeerToolDef {
                    name: t.get("name")?.as_str()?.to_owned(),
                    description: t
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    input_schema: t
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object"})),
                    annotations: t.get("annotations").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }

    /// `resources/list` against the peer
    ///
    /// # Errors
    /// Returns `UpstreamError` when the peer misbehaves.
    pub async fn list_resources(&self, gateway: &Gateway) -> AppResult<Vec<PeerResourceDef>> {
        let request = JsonRpcRequest::new(json!(3), "resources/list", Some(json!({})));
        let result = Self::unwrap_result(self.rpc(gateway, &request).await?)?;
        let resources = result
            .get("resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(resources
            .into_iter()
            .filter_map(|r| {
                Some(PeerResourceDef {
                    uri: r.get("uri")?.as_str()?.to_owned(),
                    name: r
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    mime_type: r
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                })
            })
            .collect())
    }

    /// `prompts/list` against the peer
    ///
    /// # Errors
    /// Returns `UpstreamError` when the peer misbehaves.
    pub async fn list_prompts(&self, gateway: &Gateway) -> AppResult<Vec<PeerPromptDef>> {
        let request = JsonRpcRequest::new(json!(4), "prompts/list", Some(json!({})));
        let result = Self::unwrap_result(self.rpc(gateway, &request).await?)?;
        let prompts = result
            .get("prompts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(prompts
            .into_iter()
            .filter_map(|p| {
                Some(PeerPromptDef {
                    name: p.get("name")?.as_str()?.to_owned(),
                    description: p
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    arguments: p.get("arguments").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }

    /// Health probe: `ping` with a short timeout
    pub async fn ping(&self, gateway: &Gateway, timeout: Duration) -> bool {
        let request = JsonRpcRequest::new(json!("ping"), "ping", None);
        matches!(
            tokio::time::timeout(timeout, self.rpc(gateway, &request)).await,
            Ok(Ok(response)) if response.is_success()
        )
    }
}

#[async_trait::async_trait]
impl crate::dispatch::PeerInvoker for FederationClient {
    async fn call_tool(
        &self,
        gateway: &Gateway,
        tool_name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> AppResult<Value> {
        let request = JsonRpcRequest::new(
            json!(uuid::Uuid::new_v4().to_string()),
            "tools/call",
            Some(json!({ "name": tool_name, "arguments": arguments })),
        );
        tokio::select! {
            response = self.rpc(gateway, &request) => Self::unwrap_result(response?),
            () = cancel.cancelled() => Err(AppError::cancelled("Request cancelled")),
        }
    }
}

/// Resolve a possibly relative endpoint announcement against the stream URL
fn resolve_endpoint(base: &str, announced: &str) -> AppResult<String> {
    if announced.starts_with("http://") || announced.starts_with("https://") {
        return Ok(announced.to_owned());
    }
    let base = url::Url::parse(base)
        .map_err(|e| AppError::upstream(format!("Invalid peer URL: {e}")))?;
    base.join(announced)
        .map(|u| u.to_string())
        .map_err(|e| AppError::upstream(format!("Invalid endpoint announcement: {e}")))
}
