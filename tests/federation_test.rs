// ABOUTME: Federation integration tests against an in-process stub peer
// ABOUTME: Loop rejection, catalog ingest, re-sync, and health transitions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use axum::routing::post;
use axum::{Json, Router};
use common::{create_test_state, create_test_user, personal_team, spawn_stub_upstream, StubUpstream};
use mcp_gateway::constants::violation_codes;
use mcp_gateway::errors::AppError;
use mcp_gateway::federation::{GatewayRegistration, HealthMonitor};
use mcp_gateway::metrics::MetricsRegistry;
use mcp_gateway::models::{CreatedVia, EntityKind, IntegrationType, TransportKind};
use mcp_gateway::plugins::HookContext;
use serde_json::{json, Value};
use std::sync::Arc;

/// Spawn a stub MCP peer advertising `gateway_ids` and serving `tools`
async fn spawn_stub_peer(gateway_ids: Vec<String>, tools: Vec<&'static str>) -> StubUpstream {
    let router = Router::new().route(
        "/mcp",
        post(move |Json(request): Json<Value>| {
            let gateway_ids = gateway_ids.clone();
            let tools = tools.clone();
            async move {
                let id = request.get("id").cloned().unwrap_or(Value::Null);
                let method = request.get("method").and_then(Value::as_str).unwrap_or("");
                let result = match method {
                    "initialize" => json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": {
                            "tools": {},
                            "federation": { "gateway_ids": gateway_ids },
                        },
                        "serverInfo": { "name": "stub-peer", "version": "0.0.1" },
                    }),
                    "tools/list" => json!({
                        "tools": tools.iter().map(|name| json!({
                            "name": name,
                            "description": "stub tool",
                            "inputSchema": {"type": "object"},
                        })).collect::<Vec<_>>(),
                    }),
                    "resources/list" => json!({ "resources": [] }),
                    "prompts/list" => json!({ "prompts": [] }),
                    "ping" => json!({}),
                    "tools/call" => json!({
                        "content": [{"type": "text", "text": "stub result"}],
                        "isError": false,
                    }),
                    _ => json!({}),
                };
                Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            }
        }),
    );
    spawn_stub_upstream(router).await.unwrap()
}

fn registration(name: &str, url: String, team: uuid::Uuid) -> GatewayRegistration {
    GatewayRegistration {
        name: name.to_owned(),
        url,
        transport: TransportKind::StreamableHttp,
        description: None,
        visibility: None,
        team_id: team,
        auth_type: None,
        auth_value: None,
    }
}

#[tokio::test]
async fn registration_ingests_the_peer_catalog() {
    let peer = spawn_stub_peer(vec!["peer-own-id".to_owned()], vec!["search", "fetch"]).await;
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let gateway = state
        .federation
        .register_gateway(
            &identity,
            registration("peer-a", format!("{}/mcp", peer.base_url()), team),
            &HookContext::new("req-fed"),
            None,
        )
        .await
        .unwrap();

    assert_eq!(gateway.peer_gateway_ids, vec!["peer-own-id"]);

    let tools = state.db.list_tools_for_gateway(gateway.common.id).await.unwrap();
    assert_eq!(tools.len(), 2);
    for tool in &tools {
        assert_eq!(tool.common.created_via, CreatedVia::Federation);
        assert_eq!(tool.integration_type, IntegrationType::Federated);
        assert!(!tool.common.is_client_editable());
    }

    // Qualified-name resolution reaches the federated tool
    let (resolved, via) = state
        .catalog
        .resolve_tool(&identity, "peer-a-search")
        .await
        .unwrap();
    assert_eq!(resolved.common.name, "search");
    assert_eq!(via.unwrap().common.id, gateway.common.id);
}

#[tokio::test]
async fn federation_loop_is_rejected_as_conflict() {
    // The peer's advertised reachability set contains our own gateway id,
    // so registration must fail and persist nothing
    let state = create_test_state().await.unwrap();
    let own_id = state.federation.own_gateway_id().to_owned();
    let peer = spawn_stub_peer(vec!["intermediate".to_owned(), own_id], vec!["search"]).await;

    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let err = state
        .federation
        .register_gateway(
            &identity,
            registration("loopy", format!("{}/mcp", peer.base_url()), team),
            &HookContext::new("req-loop"),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");
    assert!(err
        .to_string()
        .contains(violation_codes::FEDERATION_LOOP_DETECTED));
    assert!(state.db.list_gateways().await.unwrap().is_empty());
}

#[tokio::test]
async fn resync_disables_tools_the_peer_dropped() {
    let peer = spawn_stub_peer(vec!["peer-own-id".to_owned()], vec!["search", "fetch"]).await;
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let gateway = state
        .federation
        .register_gateway(
            &identity,
            registration("peer-a", format!("{}/mcp", peer.base_url()), team),
            &HookContext::new("req-fed"),
            None,
        )
        .await
        .unwrap();
    drop(peer);

    // The peer comes back with only one tool; the dropped one is disabled,
    // not deleted
    let shrunk = spawn_stub_peer(vec!["peer-own-id".to_owned()], vec!["search"]).await;
    let mut moved = gateway.clone();
    moved.url = format!("{}/mcp", shrunk.base_url());
    state.db.update_gateway(&moved).await.unwrap();
    state.federation.sync_gateway(&moved).await.unwrap();

    let tools = state.db.list_tools_for_gateway(gateway.common.id).await.unwrap();
    assert_eq!(tools.len(), 2);
    let fetch = tools.iter().find(|t| t.common.name == "fetch").unwrap();
    assert!(!fetch.common.enabled);
    let search = tools.iter().find(|t| t.common.name == "search").unwrap();
    assert!(search.common.enabled);
}

#[tokio::test]
async fn health_loop_marks_dead_peer_unreachable_then_recovers() {
    // Threshold consecutive failures flip reachable=false; one good
    // probe flips it back without operator action
    let peer = spawn_stub_peer(vec!["peer-own-id".to_owned()], vec!["search"]).await;
    let mut config = mcp_gateway::config::GatewayConfig::default();
    config.federation.failure_threshold = 2;
    config.federation.health_timeout = std::time::Duration::from_millis(500);
    let state = common::create_test_state_with(config.clone()).await.unwrap();

    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();
    let gateway = state
        .federation
        .register_gateway(
            &identity,
            registration("peer-a", format!("{}/mcp", peer.base_url()), team),
            &HookContext::new("req-fed"),
            None,
        )
        .await
        .unwrap();

    let monitor = HealthMonitor::new(
        state.db.clone(),
        state.federation_client.clone(),
        Arc::new(MetricsRegistry::new()),
        config.federation.clone(),
    );

    // Healthy probe keeps it reachable
    monitor.probe_all().await;
    let row = state.db.get_gateway(gateway.common.id).await.unwrap().unwrap();
    assert!(row.common.reachable);

    // Kill the peer; two consecutive failures cross the threshold
    drop(peer);
    monitor.probe_all().await;
    let row = state.db.get_gateway(gateway.common.id).await.unwrap().unwrap();
    assert!(row.common.reachable, "one failure must not flip the flag");
    monitor.probe_all().await;
    let row = state.db.get_gateway(gateway.common.id).await.unwrap().unwrap();
    assert!(!row.common.reachable);

    // Entities inherited the flag
    let tools = state.db.list_tools_for_gateway(gateway.common.id).await.unwrap();
    assert!(tools.iter().all(|t| !t.common.reachable));

    // Revive the peer at a fresh address and point the gateway at it
    let revived = spawn_stub_peer(vec!["peer-own-id".to_owned()], vec!["search"]).await;
    let mut moved = row;
    moved.url = format!("{}/mcp", revived.base_url());
    state.db.update_gateway(&moved).await.unwrap();

    monitor.probe_all().await;
    let row = state.db.get_gateway(gateway.common.id).await.unwrap().unwrap();
    assert!(row.common.reachable, "one success must reactivate");
    let tools = state.db.list_tools_for_gateway(gateway.common.id).await.unwrap();
    assert!(tools.iter().all(|t| t.common.reachable));
}

#[tokio::test]
async fn gateway_delete_with_dependents_requires_force() {
    // Live federated entities block deletion until the caller confirms
    let peer = spawn_stub_peer(vec!["peer-own-id".to_owned()], vec!["search"]).await;
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let gateway = state
        .federation
        .register_gateway(
            &identity,
            registration("peer-a", format!("{}/mcp", peer.base_url()), team),
            &HookContext::new("req-fed"),
            None,
        )
        .await
        .unwrap();

    let context = HookContext::new("req-del");
    let err = state
        .catalog
        .delete_gateway(&identity, gateway.common.id, false, &context, None)
        .await
        .unwrap_err();
    assert_eq!(
        err.violation_code(),
        Some(violation_codes::FEDERATION_DEPENDENTS_EXIST)
    );

    state
        .catalog
        .delete_gateway(&identity, gateway.common.id, true, &context, None)
        .await
        .unwrap();
    assert!(state.db.list_gateways().await.unwrap().is_empty());
    // Cascade removed the federated tools
    assert_eq!(
        state.db.count_entities(EntityKind::Tool).await.unwrap(),
        0
    );
}
