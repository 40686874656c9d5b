// ABOUTME: Tool invocation engine: resolution to local/REST/peer/A2A upstreams
// ABOUTME: Rate limits, connection pools, timeouts, retries, and cancellation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Dispatcher
//!
//! Executes a resolved tool against its concrete upstream. Every invocation
//! passes, in order: rate limits (user bucket, then tool bucket), the
//! connection pool for the upstream, the per-tool timeout, and the retry
//! loop. The request's cancellation token races every network wait, so a
//! client disconnect abandons the upstream call within the grace period.

use super::rest::{build_rest_call, RestCallPlan};
use super::retry::{FailureClass, RetryPolicy};
use crate::cancellation::CancellationToken;
use crate::config::DispatchConfig;
use crate::crypto::SecretVault;
use crate::errors::{AppError, AppResult};
use crate::metrics::MetricsRegistry;
use crate::models::{A2aAgent, AuthScheme, Gateway, IntegrationType, RequestType, Tool};
use crate::rate_limiting::RateLimiter;
use crate::permissions::IdentityContext;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// In-process JSON-RPC handler backing a LOCAL tool
#[async_trait::async_trait]
pub trait LocalToolHandler: Send + Sync {
    /// Execute the tool
    async fn call(&self, arguments: Value) -> AppResult<Value>;
}

/// Forwarder for FEDERATED tools; implemented by the federation client
#[async_trait::async_trait]
pub trait PeerInvoker: Send + Sync {
    /// Forward `tools/call` to the peer with the un-qualified tool name
    async fn call_tool(
        &self,
        gateway: &Gateway,
        tool_name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> AppResult<Value>;
}

/// One inbound invocation as the dispatcher sees it
pub struct ToolInvocation {
    /// Call arguments
    pub arguments: Value,
    /// Inbound HTTP headers (for passthrough selection)
    pub inbound_headers: HashMap<String, String>,
    /// Request-scoped cancellation token
    pub cancel: CancellationToken,
}

/// Routes invocations to their upstreams
pub struct Dispatcher {
    http: reqwest::Client,
    config: DispatchConfig,
    metrics: Arc<MetricsRegistry>,
    rate_limiter: Arc<RateLimiter>,
    vault: Arc<SecretVault>,
    local_handlers: DashMap<String, Arc<dyn LocalToolHandler>>,
    pools: DashMap<String, Arc<Semaphore>>,
    peer_invoker: OnceLock<Arc<dyn PeerInvoker>>,
}

impl Dispatcher {
    /// Assemble the dispatcher
    #[must_use]
    pub fn new(
        config: DispatchConfig,
        metrics: Arc<MetricsRegistry>,
        rate_limiter: Arc<RateLimiter>,
        vault: Arc<SecretVault>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            metrics,
            rate_limiter,
            vault,
            local_handlers: DashMap::new(),
            pools: DashMap::new(),
            peer_invoker: OnceLock::new(),
        }
    }

    /// Register an in-process handler for a LOCAL tool name
    pub fn register_local_handler(&self, name: impl Into<String>, handler: Arc<dyn LocalToolHandler>) {
        self.local_handlers.insert(name.into(), handler);
    }

    /// Wire the federation client in after startup ordering resolves
    pub fn set_peer_invoker(&self, invoker: Arc<dyn PeerInvoker>) {
        let _ = self.peer_invoker.set(invoker);
    }

    fn pool_for(&self, key: &str) -> Arc<Semaphore> {
        self.pools
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.pool_max_in_flight)))
            .clone()
    }

    fn tool_timeout(&self, tool: &Tool) -> Duration {
        let ms = if tool.timeout_ms > 0 {
            u64::try_from(tool.timeout_ms).unwrap_or(self.config.default_tool_timeout_ms)
        } else {
            self.config.default_tool_timeout_ms
        };
        Duration::from_millis(ms)
    }

    /// Dispatch a resolved tool call.
    ///
    /// `gateway` is present for federated tools and carries the peer's
    /// metadata; the result is annotated with `via_gateway_id` but otherwise
    /// returned verbatim.
    ///
    /// # Errors
    /// Returns the taxonomy error matching the failure: `RateLimited`,
    /// `Timeout`, `Cancelled`, `UpstreamError`, `PolicyDenied`.
    pub async fn dispatch_tool(
        &self,
        identity: &IdentityContext,
        tool: &Tool,
        gateway: Option<&Gateway>,
        invocation: ToolInvocation,
    ) -> AppResult<Value> {
        let display_name = tool.qualified_name(gateway.map(|g| g.common.name.as_str()));

        // Rate limits gate dispatch entry: the user's bucket, then the tool's
        self.rate_limiter.check_user(&identity.email).await?;
        self.rate_limiter.check_tool(&display_name).await?;

        // Unreachable-but-enabled still dispatches, with a warning
        if !tool.common.reachable {
            warn!(tool = %display_name, "Dispatching to a tool last probed unreachable");
        }

        let pool_key = match (&gateway, &tool.base_url) {
            (Some(g), _) => format!("peer:{}", g.common.id),
            (None, Some(base)) => format!(
                "host:{}",
                url::Url::parse(base)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_else(|| base.clone())
            ),
            (None, None) => "local".to_owned(),
        };
        let pool = self.pool_for(&pool_key);
        let Ok(_permit) = pool.try_acquire() else {
            debug!(pool = %pool_key, "Connection pool exhausted");
            return Err(AppError::rate_limited(1));
        };

        let timeout = self.tool_timeout(tool);
        let started = Instant::now();
        let mut retries_done: u32 = 0;

        let result = self
            .run_with_retries(tool, gateway, &invocation, timeout, &mut retries_done)
            .await;

        self.metrics.record_tool_invocation(
            &display_name,
            started.elapsed(),
            retries_done,
            result.is_ok(),
        );

        match result {
            Ok(mut value) => {
                if let Some(gateway) = gateway {
                    annotate_via_gateway(&mut value, gateway);
                }
                Ok(value)
            }
            Err(e) => {
                info!(tool = %display_name, error = %e, "Tool invocation failed");
                Err(e)
            }
        }
    }

    async fn run_with_retries(
        &self,
        tool: &Tool,
        gateway: Option<&Gateway>,
        invocation: &ToolInvocation,
        timeout: Duration,
        retries_done: &mut u32,
    ) -> AppResult<Value> {
        let idempotent = tool.idempotent
            || tool
                .request_type
                .is_some_and(|r| r == RequestType::Get);
        let policy = RetryPolicy::new(self.config.max_retries, idempotent);

        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .single_attempt(tool, gateway, invocation, timeout)
                .await;

            match outcome {
                Ok(value) => return Ok(value),
                Err((class, err)) => {
                    if invocation.cancel.is_cancelled() {
                        return Err(AppError::cancelled("Request cancelled during retry"));
                    }
                    if !policy.should_retry(attempt, class) {
                        return Err(err);
                    }
                    let backoff = policy.backoff(attempt);
                    attempt += 1;
                    *retries_done = attempt;
                    debug!(
                        tool = %tool.common.name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retrying after upstream failure"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = invocation.cancel.cancelled() => {
                            return Err(AppError::cancelled("Request cancelled during backoff"));
                        }
                    }
                }
            }
        }
    }

    /// One attempt, bounded by the tool timeout and the cancellation token
    async fn single_attempt(
        &self,
        tool: &Tool,
        gateway: Option<&Gateway>,
        invocation: &ToolInvocation,
        timeout: Duration,
    ) -> Result<Value, (FailureClass, AppError)> {
        let work = async {
            match (tool.integration_type, gateway) {
                (IntegrationType::Federated, Some(gateway)) => {
                    let invoker = self.peer_invoker.get().ok_or((
                        FailureClass::InvalidBody,
                        AppError::internal("Federation client not wired"),
                    ))?;
                    invoker
                        .call_tool(
                            gateway,
                            &tool.common.name,
                            invocation.arguments.clone(),
                            &invocation.cancel,
                        )
                        .await
                        .map_err(|e| (FailureClass::Connect, e))
                }
                (IntegrationType::Local, _) => {
                    let handler = self.local_handlers.get(&tool.common.name).ok_or((
                        FailureClass::InvalidBody,
                        AppError::method_not_found(format!(
                            "No local handler for {}",
                            tool.common.name
                        )),
                    ))?;
                    handler
                        .call(invocation.arguments.clone())
                        .await
                        .map_err(|e| (FailureClass::InvalidBody, e))
                }
                (IntegrationType::Rest | IntegrationType::Grpc, _) => {
                    self.execute_rest(tool, invocation).await
                }
                (IntegrationType::A2a, _) => self.execute_a2a_by_tool(tool, invocation).await,
                (IntegrationType::Federated, None) => Err((
                    FailureClass::InvalidBody,
                    AppError::internal("Federated tool resolved without its gateway"),
                )),
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, work) => match result {
                Ok(inner) => inner,
                Err(_) => Err((
                    FailureClass::Connect,
                    AppError::timeout(format!(
                        "Tool {} exceeded {}ms",
                        tool.common.name,
                        timeout.as_millis()
                    )),
                )),
            },
            () = invocation.cancel.cancelled() => Err((
                FailureClass::InvalidBody,
                AppError::cancelled("Request cancelled"),
            )),
        }
    }

    async fn execute_rest(
        &self,
        tool: &Tool,
        invocation: &ToolInvocation,
    ) -> Result<Value, (FailureClass, AppError)> {
        let plan = build_rest_call(tool, &invocation.arguments, &invocation.inbound_headers)
            .map_err(|e| (FailureClass::InvalidBody, e))?;
        self.send_plan(&plan).await
    }

    async fn send_plan(&self, plan: &RestCallPlan) -> Result<Value, (FailureClass, AppError)> {
        let method = match plan.method {
            RequestType::Get => reqwest::Method::GET,
            RequestType::Post => reqwest::Method::POST,
            RequestType::Patch => reqwest::Method::PATCH,
            RequestType::Put => reqwest::Method::PUT,
            RequestType::Delete => reqwest::Method::DELETE,
        };

        let mut request = self.http.request(method, &plan.url);
        for (name, value) in &plan.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &plan.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            (
                FailureClass::Connect,
                AppError::upstream(format!("Upstream connection failed: {e}")),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let class = FailureClass::from_status(status.as_u16());
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err((
                class,
                AppError::upstream(format!("Upstream returned {status}: {snippet}")),
            ));
        }

        // 2xx with an unusable body never retries
        response.json::<Value>().await.map_err(|e| {
            (
                FailureClass::InvalidBody,
                AppError::upstream(format!("Upstream returned an invalid body: {e}")),
            )
        })
    }

    async fn execute_a2a_by_tool(
        &self,
        tool: &Tool,
        invocation: &ToolInvocation,
    ) -> Result<Value, (FailureClass, AppError)> {
        // A2A tools carry the endpoint in base_url; dedicated agents go
        // through dispatch_a2a_agent
        let endpoint = tool.base_url.as_deref().ok_or((
            FailureClass::InvalidBody,
            AppError::invalid_input("A2A tool has no endpoint"),
        ))?;
        self.post_a2a_message(endpoint, None, &invocation.arguments)
            .await
    }

    /// Send a message to a registered A2A agent via its declared protocol
    ///
    /// # Errors
    /// Returns `UpstreamError` on agent failures.
    pub async fn dispatch_a2a_agent(
        &self,
        agent: &A2aAgent,
        message: Value,
        cancel: &CancellationToken,
    ) -> AppResult<Value> {
        let auth_header = self.agent_auth_header(agent)?;
        let work = self.post_a2a_message(&agent.endpoint, auth_header, &message);
        tokio::select! {
            result = work => result.map_err(|(_, e)| e),
            () = cancel.cancelled() => Err(AppError::cancelled("Request cancelled")),
        }
    }

    fn agent_auth_header(&self, agent: &A2aAgent) -> AppResult<Option<(String, String)>> {
        let Some(encrypted) = &agent.auth_value_encrypted else {
            return Ok(None);
        };
        let secret = self.vault.decrypt(encrypted)?;
        Ok(match agent.auth_type {
            Some(AuthScheme::Bearer) => Some((
                "authorization".to_owned(),
                format!("Bearer {}", secret.expose()),
            )),
            Some(AuthScheme::Basic) => Some((
                "authorization".to_owned(),
                format!("Basic {}", secret.expose()),
            )),
            // `headers` scheme stores a JSON map; forward the first entry set
            Some(AuthScheme::Headers | AuthScheme::Oauth) | None => None,
        })
    }

    async fn post_a2a_message(
        &self,
        endpoint: &str,
        auth_header: Option<(String, String)>,
        message: &Value,
    ) -> Result<Value, (FailureClass, AppError)> {
        let mut request = self
            .http
            .post(endpoint)
            .json(&json!({ "message": message }));
        if let Some((name, value)) = auth_header {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| {
            (
                FailureClass::Connect,
                AppError::upstream(format!("Agent connection failed: {e}")),
            )
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err((
                FailureClass::from_status(status.as_u16()),
                AppError::upstream(format!("Agent returned {status}")),
            ));
        }
        response.json::<Value>().await.map_err(|e| {
            (
                FailureClass::InvalidBody,
                AppError::upstream(format!("Agent returned an invalid body: {e}")),
            )
        })
    }
}

/// Attach `via_gateway_id` metadata without disturbing the result payload
fn annotate_via_gateway(value: &mut Value, gateway: &Gateway) {
    if let Value::Object(map) = value {
        let meta = map
            .entry("_meta")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(meta_map) = meta {
            meta_map.insert(
                "via_gateway_id".to_owned(),
                Value::String(gateway.common.id.to_string()),
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::models::{CatalogCommon, CreatedVia, Visibility};
    use uuid::Uuid;

    #[test]
    fn via_gateway_annotation_preserves_payload() {
        let gateway = Gateway {
            common: CatalogCommon::new(
                "peer-a".to_owned(),
                Uuid::new_v4(),
                "a@example.com".to_owned(),
                Visibility::Public,
                CreatedVia::Api,
            ),
            url: "https://peer.example/mcp".to_owned(),
            transport: crate::models::TransportKind::StreamableHttp,
            auth_type: None,
            auth_value_encrypted: None,
            capabilities: Value::Null,
            peer_gateway_ids: Vec::new(),
        };
        let mut value = json!({"content": [{"type": "text", "text": "hi"}]});
        annotate_via_gateway(&mut value, &gateway);
        assert_eq!(value["content"][0]["text"], "hi");
        assert_eq!(
            value["_meta"]["via_gateway_id"],
            json!(gateway.common.id.to_string())
        );
    }
}
