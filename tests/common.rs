// ABOUTME: Shared test utilities: state construction, users, stub upstreams
// ABOUTME: Everything runs against in-memory SQLite and the in-memory cache
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(dead_code, missing_docs)]

//! Shared test utilities for `mcp_gateway`
//!
//! Provides common setup to reduce duplication across integration tests:
//! gateway state with test defaults, seeded users with identities, and an
//! in-process stub upstream for REST-dispatch tests.

use anyhow::Result;
use axum::Router;
use mcp_gateway::config::GatewayConfig;
use mcp_gateway::crypto::hash_password;
use mcp_gateway::models::{
    CatalogCommon, CreatedVia, IntegrationType, RequestType, Team, Tool, User, Visibility,
};
use mcp_gateway::permissions::IdentityContext;
use mcp_gateway::plugins::InProcessPluginSet;
use mcp_gateway::state::AppState;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use tokio::task::JoinHandle;
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let level = match std::env::var("TEST_LOG").as_deref() {
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("TRACE") => tracing::Level::TRACE,
            _ => tracing::Level::WARN,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .init();
    });
}

/// Gateway state with test defaults: in-memory SQLite, in-memory cache, no
/// plugin manifest
pub async fn create_test_state() -> Result<Arc<AppState>> {
    create_test_state_with(GatewayConfig::default()).await
}

/// Gateway state with a customized configuration
pub async fn create_test_state_with(config: GatewayConfig) -> Result<Arc<AppState>> {
    init_test_logging();
    let state = AppState::initialize(config, InProcessPluginSet::new()).await?;
    Ok(state)
}

/// Create a user with a personal team; returns the user and a resolved
/// identity context
pub async fn create_test_user(
    state: &AppState,
    email: &str,
    is_platform_admin: bool,
) -> Result<(User, IdentityContext)> {
    let mut user = User::new(
        email.to_owned(),
        hash_password("password123")?,
        Some("Test User".to_owned()),
    );
    user.is_platform_admin = is_platform_admin;
    state.db.create_user(&user).await?;

    let team = Team {
        id: Uuid::new_v4(),
        name: format!("personal-{}", user.email_local_part()),
        owner_email: user.email.clone(),
        visibility: Visibility::Private,
        is_personal: true,
        created_at: chrono::Utc::now(),
    };
    state.db.create_team(&team).await?;

    let identity = identity_for(state, &user).await?;
    Ok((user, identity))
}

/// Build an identity context for an existing user
pub async fn identity_for(state: &AppState, user: &User) -> Result<IdentityContext> {
    let teams = state.db.membership_map(&user.email).await?;
    Ok(IdentityContext {
        email: user.email.clone(),
        is_platform_admin: user.is_platform_admin,
        teams,
        jti: Uuid::new_v4().to_string(),
        token_scope: mcp_gateway::models::TokenScope::All,
        token_scope_ref: None,
    })
}

/// The user's personal team id
pub async fn personal_team(state: &AppState, email: &str) -> Result<Uuid> {
    Ok(state
        .db
        .get_personal_team(email)
        .await?
        .expect("personal team")
        .id)
}

/// A REST tool bound to `base_url` with a `/items/{id}` template
pub fn rest_tool(name: &str, team_id: Uuid, owner: &str, base_url: &str) -> Tool {
    let mut common = CatalogCommon::new(
        name.to_owned(),
        team_id,
        owner.to_owned(),
        Visibility::Team,
        CreatedVia::Api,
    );
    common.description = Some("test REST tool".to_owned());
    Tool {
        common,
        gateway_id: None,
        integration_type: IntegrationType::Rest,
        input_schema: json!({"type": "object"}),
        output_schema: None,
        annotations: Value::Null,
        request_type: Some(RequestType::Get),
        base_url: Some(base_url.to_owned()),
        path_template: Some("/items/{id}".to_owned()),
        query_mapping: Value::Null,
        header_mapping: json!({"trace_id": "X-Trace"}),
        timeout_ms: 5_000,
        idempotent: false,
        passthrough_headers: Vec::new(),
        allowlist: None,
        plugin_chain_pre: Vec::new(),
        plugin_chain_post: Vec::new(),
    }
}

/// Handle for an in-process stub upstream; the server task aborts on drop
pub struct StubUpstream {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StubUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }
}

impl Drop for StubUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn an Axum router on an ephemeral local port
pub async fn spawn_stub_upstream(router: Router) -> Result<StubUpstream> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    // Give the listener a beat to start accepting
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    Ok(StubUpstream { addr, task })
}
