// ABOUTME: Catalog registry integration tests: uniqueness, visibility, resolution
// ABOUTME: Uniqueness keys, visibility determinism, and name resolution
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{create_test_state, create_test_user, personal_team, rest_tool};
use mcp_gateway::errors::AppError;
use mcp_gateway::models::{
    CatalogCommon, CreatedVia, EntityKind, Gateway, IntegrationType, Prompt, ResourceEntry, Tool,
    TransportKind, Visibility, VirtualServer,
};
use mcp_gateway::pagination::PageParams;
use serde_json::{json, Value};
use uuid::Uuid;

fn page() -> PageParams {
    PageParams::normalize(None, None, None, None, 50, 500)
}

fn federated_tool(name: &str, gateway: &Gateway) -> Tool {
    Tool {
        common: CatalogCommon::new(
            name.to_owned(),
            gateway.common.team_id,
            gateway.common.owner_email.clone(),
            Visibility::Public,
            CreatedVia::Federation,
        ),
        gateway_id: Some(gateway.common.id),
        integration_type: IntegrationType::Federated,
        input_schema: json!({"type": "object"}),
        output_schema: None,
        annotations: Value::Null,
        request_type: None,
        base_url: None,
        path_template: None,
        query_mapping: Value::Null,
        header_mapping: Value::Null,
        timeout_ms: 0,
        idempotent: false,
        passthrough_headers: Vec::new(),
        allowlist: None,
        plugin_chain_pre: Vec::new(),
        plugin_chain_post: Vec::new(),
    }
}

fn gateway_row(name: &str, url: &str, team_id: Uuid, owner: &str) -> Gateway {
    Gateway {
        common: CatalogCommon::new(
            name.to_owned(),
            team_id,
            owner.to_owned(),
            Visibility::Public,
            CreatedVia::Api,
        ),
        url: url.to_owned(),
        transport: TransportKind::StreamableHttp,
        auth_type: None,
        auth_value_encrypted: None,
        capabilities: Value::Null,
        peer_gateway_ids: Vec::new(),
    }
}

#[tokio::test]
async fn duplicate_local_tool_name_is_conflict() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let tool = rest_tool("search", team, &user.email, "https://api.example/");
    state.catalog.create_tool(&identity, tool).await.unwrap();

    let duplicate = rest_tool("search", team, &user.email, "https://api.example/");
    let err = state
        .catalog
        .create_tool(&identity, duplicate)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");
}

#[tokio::test]
async fn same_tool_name_under_two_gateways_is_allowed() {
    // Peers g and g2 both expose "search"; two rows exist and qualified
    // names route to the right peer
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let g1 = gateway_row("g", "https://g.example/mcp", team, &user.email);
    let g2 = gateway_row("g2", "https://g2.example/mcp", team, &user.email);
    state.db.insert_gateway(&g1).await.unwrap();
    state.db.insert_gateway(&g2).await.unwrap();

    state.db.insert_tool(&federated_tool("search", &g1)).await.unwrap();
    state.db.insert_tool(&federated_tool("search", &g2)).await.unwrap();

    let tools = state.db.list_tools().await.unwrap();
    assert_eq!(tools.iter().filter(|t| t.common.name == "search").count(), 2);

    let (resolved, via) = state.catalog.resolve_tool(&identity, "g-search").await.unwrap();
    assert_eq!(resolved.gateway_id, Some(g1.common.id));
    assert_eq!(via.unwrap().common.id, g1.common.id);

    let (resolved, via) = state
        .catalog
        .resolve_tool(&identity, "g2-search")
        .await
        .unwrap();
    assert_eq!(resolved.gateway_id, Some(g2.common.id));
    assert_eq!(via.unwrap().common.id, g2.common.id);
}

#[tokio::test]
async fn duplicate_gateway_url_in_team_is_conflict() {
    let state = create_test_state().await.unwrap();
    let (user, _) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let first = gateway_row("g", "https://g.example/mcp", team, &user.email);
    let second = gateway_row("other", "https://g.example/mcp", team, &user.email);
    state.db.insert_gateway(&first).await.unwrap();
    let err = state.db.insert_gateway(&second).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn visibility_determinism_between_list_and_get() {
    // list and get must agree with the visibility predicate for every pair
    let state = create_test_state().await.unwrap();
    let (owner, owner_identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let (_, stranger_identity) = create_test_user(&state, "stranger@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &owner.email).await.unwrap();

    let mut private_tool = rest_tool("private-tool", team, &owner.email, "https://api.example/");
    private_tool.common.visibility = Visibility::Private;
    let mut public_tool = rest_tool("public-tool", team, &owner.email, "https://api.example/");
    public_tool.common.visibility = Visibility::Public;

    let private_id = state
        .catalog
        .create_tool(&owner_identity, private_tool)
        .await
        .unwrap()
        .common
        .id;
    let public_id = state
        .catalog
        .create_tool(&owner_identity, public_tool)
        .await
        .unwrap()
        .common
        .id;

    for (identity, tool_id, expected) in [
        (&owner_identity, private_id, true),
        (&owner_identity, public_id, true),
        (&stranger_identity, private_id, false),
        (&stranger_identity, public_id, true),
    ] {
        let listed = state
            .catalog
            .list_tools(identity, &page())
            .await
            .unwrap()
            .data
            .iter()
            .any(|t| t.common.id == tool_id);
        let got = state.catalog.get_tool(identity, tool_id).await.is_ok();
        assert_eq!(listed, expected, "list disagreed for {tool_id}");
        assert_eq!(got, expected, "get disagreed for {tool_id}");
    }
}

#[tokio::test]
async fn disabled_tool_is_hidden_from_dispatch_resolution() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let tool = rest_tool("toggled", team, &user.email, "https://api.example/");
    let created = state.catalog.create_tool(&identity, tool).await.unwrap();

    assert!(state.catalog.resolve_tool(&identity, "toggled").await.is_ok());

    let context = mcp_gateway::plugins::HookContext::new("req-test");
    state
        .catalog
        .set_status(&identity, EntityKind::Tool, created.common.id, false, &context)
        .await
        .unwrap();

    let err = state
        .catalog
        .resolve_tool(&identity, "toggled")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MethodNotFound(_)));
}

#[tokio::test]
async fn resource_uniqueness_is_scoped_to_owner() {
    let state = create_test_state().await.unwrap();
    let (a, identity_a) = create_test_user(&state, "a@example.com", false).await.unwrap();
    let (b, identity_b) = create_test_user(&state, "b@example.com", false).await.unwrap();
    let team_a = personal_team(&state, &a.email).await.unwrap();
    let team_b = personal_team(&state, &b.email).await.unwrap();

    let resource = |team, owner: &str| ResourceEntry {
        common: CatalogCommon::new(
            "notes".to_owned(),
            team,
            owner.to_owned(),
            Visibility::Private,
            CreatedVia::Api,
        ),
        gateway_id: None,
        uri: "file:///notes.txt".to_owned(),
        mime_type: "text/plain".to_owned(),
        text: Some("hello".to_owned()),
        blob: None,
    };

    state
        .catalog
        .create_resource(&identity_a, resource(team_a, &a.email))
        .await
        .unwrap();
    // Same URI for a different owner is fine
    state
        .catalog
        .create_resource(&identity_b, resource(team_b, &b.email))
        .await
        .unwrap();
    // Same URI for the same owner conflicts
    let err = state
        .catalog
        .create_resource(&identity_a, resource(team_a, &a.email))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn server_associations_must_resolve() {
    // Associated ids must resolve within the creator's visibility
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let server = VirtualServer {
        common: CatalogCommon::new(
            "bundle".to_owned(),
            team,
            user.email.clone(),
            Visibility::Team,
            CreatedVia::Api,
        ),
        icon: None,
        associated_tools: vec![Uuid::new_v4()],
        associated_resources: Vec::new(),
        associated_prompts: Vec::new(),
        associated_a2a_agents: Vec::new(),
    };
    let context = mcp_gateway::plugins::HookContext::new("req-test");
    let err = state
        .catalog
        .create_server(&identity, server, &context, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
}

#[tokio::test]
async fn prompt_names_unique_per_owner_scope() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let prompt = || Prompt {
        common: CatalogCommon::new(
            "summarize".to_owned(),
            team,
            user.email.clone(),
            Visibility::Team,
            CreatedVia::Api,
        ),
        gateway_id: None,
        template: "Summarize {{topic}}".to_owned(),
        arguments_schema: json!({"type": "object", "required": ["topic"]}),
    };

    state.catalog.create_prompt(&identity, prompt()).await.unwrap();
    let err = state
        .catalog
        .create_prompt(&identity, prompt())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
