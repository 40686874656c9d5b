// ABOUTME: Protocol engine integration tests over live sessions
// ABOUTME: State machine gating, virtual-server scoping, prompt/resource flows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{create_test_state, create_test_user, personal_team, rest_tool};
use mcp_gateway::dispatch::LocalToolHandler;
use mcp_gateway::errors::{rpc_codes, AppResult};
use mcp_gateway::jsonrpc::JsonRpcRequest;
use mcp_gateway::models::{
    CatalogCommon, CreatedVia, IntegrationType, Prompt, ResourceEntry, Visibility, VirtualServer,
};
use mcp_gateway::protocol::McpEngine;
use mcp_gateway::state::AppState;
use mcp_gateway::transports::{Session, SessionPhase};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

struct EchoHandler;

#[async_trait::async_trait]
impl LocalToolHandler for EchoHandler {
    async fn call(&self, arguments: Value) -> AppResult<Value> {
        Ok(json!({ "echo": arguments }))
    }
}

async fn ready_session(
    state: &Arc<AppState>,
    email: &str,
    server_id: Option<uuid::Uuid>,
) -> Arc<Session> {
    let user = state.db.get_user(email).await.unwrap().unwrap();
    let identity = common::identity_for(state, &user).await.unwrap();
    let session = state.sessions.create(identity, server_id);
    session.set_phase(SessionPhase::Ready).await;
    session
}

async fn call(
    engine: &McpEngine,
    session: &Arc<Session>,
    id: i64,
    method: &str,
    params: Value,
) -> mcp_gateway::jsonrpc::JsonRpcResponse {
    engine
        .handle_request(
            session,
            JsonRpcRequest::new(json!(id), method, Some(params)),
            &HashMap::new(),
        )
        .await
        .expect("request should produce a response")
}

#[tokio::test]
async fn initialize_handshake_walks_the_state_machine() {
    let state = create_test_state().await.unwrap();
    let (_, identity) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();
    let session = state.sessions.create(identity, None);
    let engine = McpEngine::new(state.clone());

    // tools/list before initialize is rejected (state machine gate)
    let response = call(&engine, &session, 1, "tools/list", json!({})).await;
    assert_eq!(response.error.unwrap().code, rpc_codes::INVALID_REQUEST);

    // ping is allowed in New
    let response = call(&engine, &session, 2, "ping", json!({})).await;
    assert!(response.is_success());

    let response = call(
        &engine,
        &session,
        3,
        "initialize",
        json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "0.0.0"},
        }),
    )
    .await;
    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2025-06-18");
    assert_eq!(result["serverInfo"]["name"], "mcp-gateway");
    assert!(result["capabilities"]["federation"]["gateway_ids"].is_array());
    assert_eq!(session.phase().await, SessionPhase::Initializing);

    // initialized notification completes the handshake
    engine
        .handle_request(
            &session,
            JsonRpcRequest::notification("notifications/initialized", None),
            &HashMap::new(),
        )
        .await;
    assert_eq!(session.phase().await, SessionPhase::Ready);

    // Now list methods work
    let response = call(&engine, &session, 4, "tools/list", json!({})).await;
    assert!(response.is_success());
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let state = create_test_state().await.unwrap();
    create_test_user(&state, "alice@example.com", false).await.unwrap();
    let session = ready_session(&state, "alice@example.com", None).await;
    let engine = McpEngine::new(state);

    let response = call(&engine, &session, 1, "tools/frobnicate", json!({})).await;
    assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn local_tool_call_round_trip() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let mut tool = rest_tool("echo", team, &user.email, "http://unused.invalid/");
    tool.integration_type = IntegrationType::Local;
    tool.base_url = None;
    tool.path_template = None;
    tool.request_type = None;
    state.catalog.create_tool(&identity, tool).await.unwrap();
    state
        .dispatcher
        .register_local_handler("echo", Arc::new(EchoHandler));

    let session = ready_session(&state, "alice@example.com", None).await;
    let engine = McpEngine::new(state);

    let response = call(
        &engine,
        &session,
        1,
        "tools/call",
        json!({"name": "echo", "arguments": {"k": "v"}}),
    )
    .await;
    let result = response.result.unwrap();
    assert_eq!(result["structuredContent"]["echo"]["k"], "v");
    assert_eq!(result["isError"], false);
}

#[tokio::test]
async fn virtual_server_scoping_hides_and_rejects() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    // Two local tools, one bundled into a virtual server
    for name in ["inside", "outside"] {
        let mut tool = rest_tool(name, team, &user.email, "http://unused.invalid/");
        tool.integration_type = IntegrationType::Local;
        tool.base_url = None;
        tool.path_template = None;
        tool.request_type = None;
        state.catalog.create_tool(&identity, tool).await.unwrap();
    }
    state
        .dispatcher
        .register_local_handler("inside", Arc::new(EchoHandler));
    state
        .dispatcher
        .register_local_handler("outside", Arc::new(EchoHandler));

    let inside_id = state
        .catalog
        .resolve_tool(&identity, "inside")
        .await
        .unwrap()
        .0
        .common
        .id;
    let server = VirtualServer {
        common: CatalogCommon::new(
            "bundle".to_owned(),
            team,
            user.email.clone(),
            Visibility::Team,
            CreatedVia::Api,
        ),
        icon: None,
        associated_tools: vec![inside_id],
        associated_resources: Vec::new(),
        associated_prompts: Vec::new(),
        associated_a2a_agents: Vec::new(),
    };
    let server = state
        .catalog
        .create_server(
            &identity,
            server,
            &mcp_gateway::plugins::HookContext::new("req-vs"),
            None,
        )
        .await
        .unwrap();

    let session = ready_session(&state, "alice@example.com", Some(server.common.id)).await;
    let engine = McpEngine::new(state);

    // Scoped list shows only the bundled tool
    let response = call(&engine, &session, 1, "tools/list", json!({})).await;
    let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "inside");

    // Calling outside the bundle is method-not-found
    let response = call(
        &engine,
        &session,
        2,
        "tools/call",
        json!({"name": "outside", "arguments": {}}),
    )
    .await;
    assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);

    // Calling inside works
    let response = call(
        &engine,
        &session,
        3,
        "tools/call",
        json!({"name": "inside", "arguments": {}}),
    )
    .await;
    assert!(response.is_success());
}

#[tokio::test]
async fn prompt_get_renders_template_with_validation() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let prompt = Prompt {
        common: CatalogCommon::new(
            "summarize".to_owned(),
            team,
            user.email.clone(),
            Visibility::Team,
            CreatedVia::Api,
        ),
        gateway_id: None,
        template: "Summarize {{topic}} briefly".to_owned(),
        arguments_schema: json!({
            "type": "object",
            "required": ["topic"],
            "properties": {"topic": {"type": "string", "enum": ["rust", "ruby"]}},
        }),
    };
    state.catalog.create_prompt(&identity, prompt).await.unwrap();

    let session = ready_session(&state, "alice@example.com", None).await;
    let engine = McpEngine::new(state);

    let response = call(
        &engine,
        &session,
        1,
        "prompts/get",
        json!({"name": "summarize", "arguments": {"topic": "rust"}}),
    )
    .await;
    let text = response.result.unwrap()["messages"][0]["content"]["text"]
        .as_str()
        .unwrap()
        .to_owned();
    assert_eq!(text, "Summarize rust briefly");

    // Missing required argument is invalid params
    let response = call(
        &engine,
        &session,
        2,
        "prompts/get",
        json!({"name": "summarize", "arguments": {}}),
    )
    .await;
    assert_eq!(response.error.unwrap().code, rpc_codes::INVALID_REQUEST);

    // Completion suggests from the schema enum
    let response = call(
        &engine,
        &session,
        3,
        "completion/complete",
        json!({
            "ref": {"type": "ref/prompt", "name": "summarize"},
            "argument": {"name": "topic", "value": "ru"},
        }),
    )
    .await;
    let values = response.result.unwrap()["completion"]["values"].clone();
    assert_eq!(values, json!(["rust", "ruby"]));
}

#[tokio::test]
async fn resource_read_and_subscription_notifications() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "alice@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let resource = ResourceEntry {
        common: CatalogCommon::new(
            "notes".to_owned(),
            team,
            user.email.clone(),
            Visibility::Team,
            CreatedVia::Api,
        ),
        gateway_id: None,
        uri: "file:///notes.txt".to_owned(),
        mime_type: "text/plain".to_owned(),
        text: Some("remember the milk".to_owned()),
        blob: None,
    };
    state
        .catalog
        .create_resource(&identity, resource)
        .await
        .unwrap();

    let session = ready_session(&state, "alice@example.com", None).await;
    let mut outbound = session.take_outbound().await.unwrap();
    let engine = McpEngine::new(state.clone());

    let response = call(
        &engine,
        &session,
        1,
        "resources/read",
        json!({"uri": "file:///notes.txt"}),
    )
    .await;
    let contents = response.result.unwrap()["contents"][0].clone();
    assert_eq!(contents["text"], "remember the milk");
    assert_eq!(contents["mimeType"], "text/plain");

    // Subscribe, then a catalog-side update pushes a notification
    let response = call(
        &engine,
        &session,
        2,
        "resources/subscribe",
        json!({"uri": "file:///notes.txt"}),
    )
    .await;
    assert!(response.is_success());

    state.sessions.notify_resource_updated("file:///notes.txt").await;
    let frame = outbound.recv().await.unwrap();
    assert_eq!(frame["method"], "notifications/resources/updated");
    assert_eq!(frame["params"]["uri"], "file:///notes.txt");
}

#[tokio::test]
async fn reading_an_invisible_resource_is_not_found() {
    let state = create_test_state().await.unwrap();
    let (owner, owner_identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    create_test_user(&state, "stranger@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &owner.email).await.unwrap();

    let mut resource = ResourceEntry {
        common: CatalogCommon::new(
            "secret".to_owned(),
            team,
            owner.email.clone(),
            Visibility::Private,
            CreatedVia::Api,
        ),
        gateway_id: None,
        uri: "file:///secret.txt".to_owned(),
        mime_type: "text/plain".to_owned(),
        text: Some("classified".to_owned()),
        blob: None,
    };
    resource.common.visibility = Visibility::Private;
    state
        .catalog
        .create_resource(&owner_identity, resource)
        .await
        .unwrap();

    let session = ready_session(&state, "stranger@example.com", None).await;
    let engine = McpEngine::new(state);
    let response = call(
        &engine,
        &session,
        1,
        "resources/read",
        json!({"uri": "file:///secret.txt"}),
    )
    .await;
    assert_eq!(response.error.unwrap().code, rpc_codes::NOT_FOUND);
}
