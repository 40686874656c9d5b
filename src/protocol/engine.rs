// ABOUTME: MCP protocol engine: method dispatch over the session state machine
// ABOUTME: Handlers stay thin; catalog, dispatcher, and plugins do the heavy work
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Protocol Engine
//!
//! One entry point, [`McpEngine::handle_frame`], consumed by every transport.
//! The state machine is enforced here: a session in `New` accepts only
//! `initialize` and `ping`; call-scoped failures leave the session `Ready`.
//! Virtual-server scoping is applied to every list and call so a scoped
//! session can neither see nor invoke entities outside its bundle.

use crate::constants::protocol::{
    MCP_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::constants::server_info;
use crate::errors::{AppError, AppResult};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::models::{Gateway, Tool, VirtualServer};
use crate::plugins::{HookContext, HookPayload, HookPoint};
use crate::state::AppState;
use crate::transports::{Session, SessionPhase};
use crate::dispatch::ToolInvocation;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// The MCP protocol engine
pub struct McpEngine {
    state: Arc<AppState>,
}

impl McpEngine {
    /// Build the engine over the shared state
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Route one raw client frame. Frames that are responses to
    /// server-initiated requests complete their pending waiters; requests and
    /// notifications go through [`Self::handle_request`].
    pub async fn handle_frame(
        &self,
        session: &Arc<Session>,
        frame: Value,
        inbound_headers: &HashMap<String, String>,
    ) -> Option<JsonRpcResponse> {
        // A frame with result/error and no method is a client response
        if frame.get("method").is_none() {
            if let Some(id) = frame.get("id") {
                let result = frame
                    .get("result")
                    .cloned()
                    .unwrap_or_else(|| json!({"action": "cancel"}));
                if session.complete_reverse(id, result) {
                    return None;
                }
            }
            debug!(session = %session.id, "Dropping unmatched client response frame");
            return None;
        }

        let request: JsonRpcRequest = match serde_json::from_value(frame) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::from_app_error(
                    Value::Null,
                    &AppError::invalid_input(format!("Malformed JSON-RPC frame: {e}")),
                ))
            }
        };
        self.handle_request(session, request, inbound_headers).await
    }

    /// Handle one request or notification. Notifications return `None`.
    #[instrument(skip(self, session, request, inbound_headers),
                 fields(session_id = %session.id, method = %request.method))]
    pub async fn handle_request(
        &self,
        session: &Arc<Session>,
        request: JsonRpcRequest,
        inbound_headers: &HashMap<String, String>,
    ) -> Option<JsonRpcResponse> {
        session.touch();
        self.state.metrics.record_request(&request.method);

        if let Err(e) = request.validate() {
            return Some(JsonRpcResponse::from_app_error(
                request.id.unwrap_or(Value::Null),
                &e,
            ));
        }

        if request.is_notification() {
            self.handle_notification(session, &request).await;
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        // State machine: New accepts only initialize and ping
        let phase = session.phase().await;
        if phase == SessionPhase::Closed {
            return Some(JsonRpcResponse::from_app_error(
                id,
                &AppError::invalid_input("Session is closed"),
            ));
        }
        if phase == SessionPhase::New && !matches!(request.method.as_str(), "initialize" | "ping")
        {
            return Some(JsonRpcResponse::from_app_error(
                id,
                &AppError::invalid_input(format!(
                    "Method {} before initialize",
                    request.method
                )),
            ));
        }

        let params = request.params.clone().unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(session, &params).await,
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(session).await,
            "tools/call" => {
                self.handle_tools_call(session, &id, &params, inbound_headers)
                    .await
            }
            "resources/list" => self.handle_resources_list(session).await,
            "resources/read" => self.handle_resources_read(session, &params).await,
            "resources/subscribe" => self.handle_resources_subscribe(session, &params, true).await,
            "resources/unsubscribe" => {
                self.handle_resources_subscribe(session, &params, false).await
            }
            "prompts/list" => self.handle_prompts_list(session).await,
            "prompts/get" => self.handle_prompts_get(session, &params).await,
            "roots/list" => Ok(json!({ "roots": [] })),
            "logging/setLevel" => {
                debug!(session = %session.id, level = ?params.get("level"), "Log level request");
                Ok(json!({}))
            }
            "completion/complete" => self.handle_completion(session, &params).await,
            // Reverse-only methods: the server initiates these, never the client
            "sampling/createMessage" | "elicitation/create" => Err(AppError::method_not_found(
                format!("{} is server-initiated", request.method),
            )),
            other => Err(AppError::method_not_found(other.to_owned())),
        };

        session.finish_request(&id);
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::from_app_error(id, &e),
        })
    }

    async fn handle_notification(&self, session: &Arc<Session>, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => {
                if session.phase().await == SessionPhase::Initializing {
                    session.set_phase(SessionPhase::Ready).await;
                    debug!(session = %session.id, "Session ready");
                }
            }
            "$/cancelRequest" | "notifications/cancelled" => {
                let target = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("id").or_else(|| p.get("requestId")));
                if let Some(target) = target {
                    session.cancel_request(target);
                }
            }
            other => {
                debug!(session = %session.id, method = %other, "Ignoring notification");
            }
        }
    }

    async fn handle_initialize(
        &self,
        session: &Arc<Session>,
        params: &Value,
    ) -> AppResult<Value> {
        let client_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(MCP_PROTOCOL_VERSION);
        let negotiated = if SUPPORTED_PROTOCOL_VERSIONS.contains(&client_version) {
            client_version
        } else {
            MCP_PROTOCOL_VERSION
        };
        *session.protocol_version.lock().await = negotiated.to_owned();

        // A virtual-server binding may arrive in initialize params when the
        // session did not enter through a scoped path
        if let Some(server_id) = params.get("serverId").and_then(Value::as_str) {
            let server_id = Uuid::parse_str(server_id)
                .map_err(|_| AppError::invalid_input("Malformed serverId"))?;
            self.state
                .catalog
                .get_server(&session.identity, server_id)
                .await?;
            session.bind_server(server_id);
        }

        session.set_phase(SessionPhase::Initializing).await;

        let gateway_ids = self
            .state
            .federation
            .advertised_gateway_ids()
            .await
            .unwrap_or_default();

        Ok(json!({
            "protocolVersion": negotiated,
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "subscribe": true, "listChanged": true },
                "prompts": { "listChanged": true },
                "completions": {},
                "logging": {},
                "federation": { "gateway_ids": gateway_ids },
            },
            "serverInfo": {
                "name": server_info::NAME,
                "version": server_info::VERSION,
            },
        }))
    }

    /// Resolve the virtual server a session is scoped to, if any
    async fn session_server(&self, session: &Arc<Session>) -> AppResult<Option<VirtualServer>> {
        match session.server_scope() {
            Some(id) => Ok(Some(
                self.state.catalog.get_server(&session.identity, id).await?,
            )),
            None => Ok(None),
        }
    }

    async fn visible_tools(
        &self,
        session: &Arc<Session>,
    ) -> AppResult<Vec<(Tool, Option<Gateway>)>> {
        let scope = self.session_server(session).await?;
        let gateways: HashMap<Uuid, Gateway> = self
            .state
            .catalog
            .db()
            .list_gateways()
            .await?
            .into_iter()
            .map(|g| (g.common.id, g))
            .collect();

        let tools = self
            .state
            .catalog
            .db()
            .list_tools()
            .await?
            .into_iter()
            .filter(|t| t.common.enabled)
            .filter(|t| crate::permissions::allowed(&session.identity, &t.common))
            .filter(|t| {
                scope
                    .as_ref()
                    .is_none_or(|s| s.associated_tools.contains(&t.common.id))
            })
            .map(|t| {
                let gateway = t.gateway_id.and_then(|id| gateways.get(&id).cloned());
                (t, gateway)
            })
            .collect();
        Ok(tools)
    }

    async fn handle_tools_list(&self, session: &Arc<Session>) -> AppResult<Value> {
        let tools = self.visible_tools(session).await?;
        let defs: Vec<Value> = tools
            .iter()
            .map(|(tool, gateway)| {
                json!({
                    "name": tool.qualified_name(gateway.as_ref().map(|g| g.common.name.as_str())),
                    "description": tool.common.description,
                    "inputSchema": tool.input_schema,
                    "annotations": tool.annotations,
                })
            })
            .collect();
        Ok(json!({ "tools": defs }))
    }

    async fn handle_tools_call(
        &self,
        session: &Arc<Session>,
        request_id: &Value,
        params: &Value,
        inbound_headers: &HashMap<String, String>,
    ) -> AppResult<Value> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::invalid_input("tools/call requires a name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let (tool, gateway) = self
            .state
            .catalog
            .resolve_tool(&session.identity, name)
            .await?;

        // Virtual-server scoping: calling outside the bundle is method-not-found
        if let Some(server) = self.session_server(session).await? {
            if !server.associated_tools.contains(&tool.common.id) {
                return Err(AppError::method_not_found(format!(
                    "Tool {name} is not part of this server"
                )));
            }
        }

        let hook_context = self.hook_context(session, request_id);
        let cancel = session.begin_request(request_id);

        // Pre-invoke plugins may rewrite the arguments or block the call
        let pre = self
            .state
            .plugins
            .run_hook(
                HookPoint::ToolPreInvoke,
                HookPayload::ToolCall {
                    name: name.to_owned(),
                    arguments,
                },
                &hook_context,
                Some(session.as_ref()),
            )
            .await?;
        let arguments = match pre.payload {
            HookPayload::ToolCall { arguments, .. } => arguments,
            _ => {
                warn!("Pre-invoke hook changed the payload kind; dropping arguments");
                json!({})
            }
        };

        let invocation = ToolInvocation {
            arguments,
            inbound_headers: inbound_headers.clone(),
            cancel: cancel.clone(),
        };
        let started = std::time::Instant::now();
        let raw = self
            .state
            .dispatcher
            .dispatch_tool(&session.identity, &tool, gateway.as_ref(), invocation)
            .await;

        self.audit_tool_call(
            &hook_context.request_id,
            &session.identity.email,
            name,
            raw.is_ok(),
            started.elapsed(),
        )
        .await;

        let result = match raw {
            Ok(value) => wrap_tool_result(value),
            Err(e @ AppError::Cancelled(_)) => {
                // Post-hooks are skipped on cancellation
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // Post-invoke plugins may rewrite or veto the result
        let post = self
            .state
            .plugins
            .run_hook(
                HookPoint::ToolPostInvoke,
                HookPayload::ToolResult {
                    name: name.to_owned(),
                    result,
                },
                &hook_context,
                None,
            )
            .await?;
        match post.payload {
            HookPayload::ToolResult { result, .. } => Ok(result),
            _ => Err(AppError::internal("Post-invoke hook corrupted the payload")),
        }
    }

    async fn handle_resources_list(&self, session: &Arc<Session>) -> AppResult<Value> {
        let scope = self.session_server(session).await?;
        let resources: Vec<Value> = self
            .state
            .catalog
            .db()
            .list_resources()
            .await?
            .into_iter()
            .filter(|r| r.common.enabled)
            .filter(|r| crate::permissions::allowed(&session.identity, &r.common))
            .filter(|r| {
                scope
                    .as_ref()
                    .is_none_or(|s| s.associated_resources.contains(&r.common.id))
            })
            .map(|r| {
                json!({
                    "uri": r.uri,
                    "name": r.common.name,
                    "description": r.common.description,
                    "mimeType": r.mime_type,
                })
            })
            .collect();
        Ok(json!({ "resources": resources }))
    }

    async fn handle_resources_read(
        &self,
        session: &Arc<Session>,
        params: &Value,
    ) -> AppResult<Value> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::invalid_input("resources/read requires a uri"))?;

        let hook_context = self.hook_context(session, &json!(uri));
        self.state
            .plugins
            .run_hook(
                HookPoint::ResourcePreFetch,
                HookPayload::ResourceFetch {
                    uri: uri.to_owned(),
                },
                &hook_context,
                Some(session.as_ref()),
            )
            .await?;

        let resource = self
            .state
            .catalog
            .resolve_resource(&session.identity, uri)
            .await?;

        if let Some(server) = self.session_server(session).await? {
            if !server.associated_resources.contains(&resource.common.id) {
                return Err(AppError::method_not_found(format!(
                    "Resource {uri} is not part of this server"
                )));
            }
        }

        let content = if let Some(text) = &resource.text {
            json!({ "uri": resource.uri, "mimeType": resource.mime_type, "text": text })
        } else if let Some(blob) = &resource.blob {
            json!({
                "uri": resource.uri,
                "mimeType": resource.mime_type,
                "blob": BASE64.encode(blob),
            })
        } else {
            json!({ "uri": resource.uri, "mimeType": resource.mime_type, "text": "" })
        };

        let post = self
            .state
            .plugins
            .run_hook(
                HookPoint::ResourcePostFetch,
                HookPayload::ResourceContent {
                    uri: uri.to_owned(),
                    content,
                },
                &hook_context,
                None,
            )
            .await?;
        match post.payload {
            HookPayload::ResourceContent { content, .. } => Ok(json!({ "contents": [content] })),
            _ => Err(AppError::internal("Post-fetch hook corrupted the payload")),
        }
    }

    async fn handle_resources_subscribe(
        &self,
        session: &Arc<Session>,
        params: &Value,
        subscribe: bool,
    ) -> AppResult<Value> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::invalid_input("A uri is required"))?;
        // Visibility gate before subscribing
        self.state
            .catalog
            .resolve_resource(&session.identity, uri)
            .await?;
        if subscribe {
            session.subscribe(uri).await;
        } else {
            session.unsubscribe(uri).await;
        }
        Ok(json!({}))
    }

    async fn handle_prompts_list(&self, session: &Arc<Session>) -> AppResult<Value> {
        let scope = self.session_server(session).await?;
        let prompts: Vec<Value> = self
            .state
            .catalog
            .db()
            .list_prompts()
            .await?
            .into_iter()
            .filter(|p| p.common.enabled)
            .filter(|p| crate::permissions::allowed(&session.identity, &p.common))
            .filter(|p| {
                scope
                    .as_ref()
                    .is_none_or(|s| s.associated_prompts.contains(&p.common.id))
            })
            .map(|p| {
                json!({
                    "name": p.common.name,
                    "description": p.common.description,
                    "arguments": prompt_argument_list(&p.arguments_schema),
                })
            })
            .collect();
        Ok(json!({ "prompts": prompts }))
    }

    async fn handle_prompts_get(
        &self,
        session: &Arc<Session>,
        params: &Value,
    ) -> AppResult<Value> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::invalid_input("prompts/get requires a name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let hook_context = self.hook_context(session, &json!(name));
        let pre = self
            .state
            .plugins
            .run_hook(
                HookPoint::PromptPreFetch,
                HookPayload::PromptFetch {
                    name: name.to_owned(),
                    arguments,
                },
                &hook_context,
                Some(session.as_ref()),
            )
            .await?;
        let arguments = match pre.payload {
            HookPayload::PromptFetch { arguments, .. } => arguments,
            _ => json!({}),
        };

        let prompt = self
            .state
            .catalog
            .resolve_prompt(&session.identity, name)
            .await?;

        if let Some(server) = self.session_server(session).await? {
            if !server.associated_prompts.contains(&prompt.common.id) {
                return Err(AppError::method_not_found(format!(
                    "Prompt {name} is not part of this server"
                )));
            }
        }

        let rendered = render_template(&prompt.template, &prompt.arguments_schema, &arguments)?;

        let post = self
            .state
            .plugins
            .run_hook(
                HookPoint::PromptPostFetch,
                HookPayload::PromptRendered {
                    name: name.to_owned(),
                    text: rendered,
                },
                &hook_context,
                None,
            )
            .await?;
        let text = match post.payload {
            HookPayload::PromptRendered { text, .. } => text,
            _ => return Err(AppError::internal("Post-fetch hook corrupted the payload")),
        };

        Ok(json!({
            "description": prompt.common.description,
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": text },
            }],
        }))
    }

    async fn handle_completion(
        &self,
        session: &Arc<Session>,
        params: &Value,
    ) -> AppResult<Value> {
        let prompt_name = params
            .pointer("/ref/name")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::invalid_input("completion/complete requires ref.name"))?;
        let arg_name = params
            .pointer("/argument/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let prefix = params
            .pointer("/argument/value")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let prompt = self
            .state
            .catalog
            .resolve_prompt(&session.identity, prompt_name)
            .await?;

        // Suggestions come from the argument's enum in the prompt schema
        let values: Vec<String> = prompt
            .arguments_schema
            .pointer(&format!("/properties/{arg_name}/enum"))
            .and_then(Value::as_array)
            .map(|options| {
                options
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|option| option.starts_with(prefix))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "completion": { "values": values, "total": values.len(), "hasMore": false },
        }))
    }

    /// Persist the audit row for a tool invocation; failures only log
    async fn audit_tool_call(
        &self,
        request_id: &str,
        user: &str,
        tool: &str,
        success: bool,
        duration: std::time::Duration,
    ) {
        let record = crate::database::AuditRecord::new(
            request_id,
            "tool.invoke",
            if success { "success" } else { "failure" },
        )
        .with_user(user)
        .with_resource(format!("tool:{tool}"))
        .with_detail(format!("duration_ms={}", duration.as_millis()));
        if let Err(e) = self.state.db.store_audit_record(&record).await {
            warn!(error = %e, "Failed to store tool invocation audit record");
        }
    }

    fn hook_context(&self, session: &Arc<Session>, request_id: &Value) -> HookContext {
        let mut context = HookContext::new(format!("{}:{}", session.id, request_id))
            .with_session(session.id.clone())
            .with_user(session.identity.email.clone());
        context.server_id = session.server_scope();
        context
    }
}

/// Wrap a raw dispatch result into MCP `tools/call` shape when the upstream
/// did not already produce one
fn wrap_tool_result(value: Value) -> Value {
    if value.get("content").is_some() {
        return value;
    }
    let mut meta = None;
    let body = match &value {
        Value::Object(map) if map.contains_key("_meta") => {
            meta = map.get("_meta").cloned();
            let stripped: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| *k != "_meta")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(stripped)
        }
        other => other.clone(),
    };
    let text = match &body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut result = json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": body,
        "isError": false,
    });
    if let (Value::Object(map), Some(meta)) = (&mut result, meta) {
        map.insert("_meta".to_owned(), meta);
    }
    result
}

/// Flatten a prompt's JSON-schema `arguments_schema` into the MCP
/// `prompts/list` argument descriptor shape: `[{name, description, required}]`.
fn prompt_argument_list(schema: &Value) -> Vec<Value> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, prop)| {
                    json!({
                        "name": name,
                        "description": prop.get("description").and_then(Value::as_str),
                        "required": required.contains(&name.as_str()),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Render `{{argument}}` placeholders, validating required arguments from the
/// prompt's schema
fn render_template(template: &str, schema: &Value, arguments: &Value) -> AppResult<String> {
    let args = match arguments {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(AppError::invalid_input(format!(
                    "Missing required prompt argument: {name}"
                )));
            }
        }
    }

    let mut rendered = template.to_owned();
    for (name, value) in &args {
        let placeholder = format!("{{{{{name}}}}}");
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&placeholder, &replacement);
    }
    Ok(rendered)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering_substitutes_and_validates() {
        let schema = json!({"type": "object", "required": ["topic"]});
        let rendered = render_template(
            "Summarize {{topic}} in {{words}} words",
            &schema,
            &json!({"topic": "rust", "words": 50}),
        )
        .unwrap();
        assert_eq!(rendered, "Summarize rust in 50 words");

        let err = render_template("{{topic}}", &schema, &json!({})).unwrap_err();
        assert_eq!(err.rpc_code(), crate::errors::rpc_codes::INVALID_REQUEST);
    }

    #[test]
    fn tool_result_wrapping() {
        // Already MCP-shaped results pass through untouched
        let shaped = json!({"content": [{"type": "text", "text": "hi"}], "isError": false});
        assert_eq!(wrap_tool_result(shaped.clone()), shaped);

        // Raw values are wrapped, preserving _meta at the top level
        let wrapped = wrap_tool_result(json!({"v": 1, "_meta": {"via_gateway_id": "g1"}}));
        assert_eq!(wrapped["structuredContent"], json!({"v": 1}));
        assert_eq!(wrapped["_meta"]["via_gateway_id"], "g1");
        assert_eq!(wrapped["isError"], false);
    }
}
