// ABOUTME: Admin REST API for catalog entities: CRUD, toggle, bulk import, connect doc
// ABOUTME: Thin handlers over CatalogService; gateways route through federation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Catalog Routes
//!
//! Per-entity endpoints: `GET /{entity}` (paginated), `POST /{entity}`,
//! `GET/PUT/DELETE /{entity}/{id}`, `POST /{entity}/{id}/toggle`. Tools add
//! `POST /tools/import`; servers add `GET /servers/{id}/connect`; gateway
//! registration runs the federation handshake.

use crate::crypto::SecretString;
use crate::errors::{AppError, AppResult};
use crate::federation::GatewayRegistration;
use crate::middleware::RequestId;
use crate::models::{
    A2aAgent, AuthScheme, CatalogCommon, CreatedVia, EntityKind, IntegrationType, Prompt,
    RequestType, ResourceEntry, Tool, VirtualServer, Visibility,
};
use crate::pagination::{Cursor, PageParams, PaginationStrategy};
use crate::permissions::IdentityContext;
use crate::plugins::HookContext;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// All protected catalog routes
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tools", get(list_tools).post(create_tool))
        .route("/tools/import", post(import_tools))
        .route(
            "/tools/:id",
            get(get_tool).put(update_tool).delete(delete_tool),
        )
        .route("/tools/:id/toggle", post(toggle_tool))
        .route("/resources", get(list_resources).post(create_resource))
        .route(
            "/resources/:id",
            get(get_resource).put(update_resource).delete(delete_resource),
        )
        .route("/resources/:id/toggle", post(toggle_resource))
        .route("/prompts", get(list_prompts).post(create_prompt))
        .route(
            "/prompts/:id",
            get(get_prompt).put(update_prompt).delete(delete_prompt),
        )
        .route("/prompts/:id/toggle", post(toggle_prompt))
        .route("/servers", get(list_servers).post(create_server))
        .route(
            "/servers/:id",
            get(get_server).put(update_server).delete(delete_server),
        )
        .route("/servers/:id/toggle", post(toggle_server))
        .route("/servers/:id/connect", get(server_connect_doc))
        .route("/gateways", get(list_gateways).post(register_gateway))
        .route(
            "/gateways/:id",
            get(get_gateway).delete(delete_gateway),
        )
        .route("/gateways/:id/toggle", post(toggle_gateway))
        .route("/a2a", get(list_agents).post(create_agent))
        .route(
            "/a2a/:id",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route("/a2a/:id/toggle", post(toggle_agent))
        .route("/audit", get(list_audit))
        .with_state(state)
}

/// Recent audit records; platform administrators only
async fn list_audit(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Response, AppError> {
    if !identity.is_platform_admin {
        return Err(AppError::forbidden("Audit log requires platform admin"));
    }
    let records = state.db.recent_audit_records(200).await?;
    Ok(Json(json!({ "records": records })).into_response())
}

// ---------------------------------------------------------------------------
// Shared extractors and helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u64>,
    size: Option<u64>,
    cursor: Option<String>,
    strategy: Option<PaginationStrategy>,
}

fn page_params(state: &AppState, query: &PageQuery) -> AppResult<PageParams> {
    let cursor = query
        .cursor
        .as_deref()
        .map(Cursor::decode)
        .transpose()?;
    Ok(PageParams::normalize(
        query.page,
        query.size,
        cursor,
        query.strategy,
        state.config.pagination.default_page_size,
        state.config.pagination.max_page_size,
    ))
}

/// The team a new entity lands in: an explicit team id from the request, or
/// the caller's personal team
async fn target_team(
    state: &AppState,
    identity: &IdentityContext,
    explicit: Option<Uuid>,
) -> AppResult<Uuid> {
    if let Some(team_id) = explicit {
        if !identity.is_team_member(team_id) && !identity.is_platform_admin {
            return Err(AppError::forbidden("Not a member of the target team"));
        }
        return Ok(team_id);
    }
    state
        .db
        .get_personal_team(&identity.email)
        .await?
        .map(|t| t.id)
        .ok_or_else(|| AppError::internal("Caller has no personal team"))
}

fn hook_context(identity: &IdentityContext, request_id: &RequestId) -> HookContext {
    HookContext::new(request_id.0.clone()).with_user(identity.email.clone())
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ToolCreate {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    integration_type: Option<IntegrationType>,
    #[serde(default)]
    input_schema: Option<Value>,
    #[serde(default)]
    output_schema: Option<Value>,
    #[serde(default)]
    annotations: Option<Value>,
    #[serde(default)]
    request_type: Option<RequestType>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    path_template: Option<String>,
    #[serde(default)]
    query_mapping: Option<Value>,
    #[serde(default)]
    header_mapping: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<i64>,
    #[serde(default)]
    idempotent: bool,
    #[serde(default)]
    passthrough_headers: Vec<String>,
    #[serde(default)]
    allowlist: Option<Vec<String>>,
    #[serde(default)]
    plugin_chain_pre: Vec<String>,
    #[serde(default)]
    plugin_chain_post: Vec<String>,
}

async fn build_tool(
    state: &AppState,
    identity: &IdentityContext,
    create: ToolCreate,
    created_via: CreatedVia,
) -> AppResult<Tool> {
    let team_id = target_team(state, identity, create.team_id).await?;
    let mut common = CatalogCommon::new(
        create.name,
        team_id,
        identity.email.clone(),
        create.visibility.unwrap_or(Visibility::Team),
        created_via,
    );
    common.description = create.description;
    common.tags = create.tags;

    Ok(Tool {
        common,
        gateway_id: None,
        integration_type: create.integration_type.unwrap_or(IntegrationType::Rest),
        input_schema: create
            .input_schema
            .unwrap_or_else(|| json!({"type": "object"})),
        output_schema: create.output_schema,
        annotations: create.annotations.unwrap_or(Value::Null),
        request_type: create.request_type,
        base_url: create.base_url,
        path_template: create.path_template,
        query_mapping: create.query_mapping.unwrap_or(Value::Null),
        header_mapping: create.header_mapping.unwrap_or(Value::Null),
        timeout_ms: create
            .timeout_ms
            .unwrap_or(i64::try_from(state.config.dispatch.default_tool_timeout_ms).unwrap_or(20_000)),
        idempotent: create.idempotent,
        passthrough_headers: create.passthrough_headers,
        allowlist: create.allowlist,
        plugin_chain_pre: create.plugin_chain_pre,
        plugin_chain_post: create.plugin_chain_post,
    })
}

async fn list_tools(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let params = page_params(&state, &query)?;
    Ok(Json(state.catalog.list_tools(&identity, &params).await?).into_response())
}

async fn create_tool(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(create): Json<ToolCreate>,
) -> Result<Response, AppError> {
    let tool = build_tool(&state, &identity, create, CreatedVia::Api).await?;
    let created = state.catalog.create_tool(&identity, tool).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn import_tools(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(creates): Json<Vec<ToolCreate>>,
) -> Result<Response, AppError> {
    let mut tools = Vec::with_capacity(creates.len());
    for create in creates {
        tools.push(build_tool(&state, &identity, create, CreatedVia::BulkImport).await?);
    }
    let (created, failures) = state.catalog.bulk_import_tools(&identity, tools).await?;
    let status = if failures.is_empty() {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    let failures: Vec<Value> = failures
        .into_iter()
        .map(|(name, error)| json!({ "name": name, "error": error }))
        .collect();
    Ok((status, Json(json!({ "created": created, "failures": failures }))).into_response())
}

async fn get_tool(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.catalog.get_tool(&identity, id).await?).into_response())
}

async fn update_tool(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
    Json(create): Json<ToolCreate>,
) -> Result<Response, AppError> {
    let existing = state.catalog.get_tool(&identity, id).await?;
    let mut updated = build_tool(&state, &identity, create, existing.common.created_via).await?;
    // Identity and provenance are immutable on update
    updated.common.id = existing.common.id;
    updated.common.team_id = existing.common.team_id;
    updated.common.owner_email = existing.common.owner_email.clone();
    updated.common.created_at = existing.common.created_at;
    updated.common.created_by = existing.common.created_by.clone();
    updated.common.enabled = existing.common.enabled;
    updated.common.reachable = existing.common.reachable;
    updated.gateway_id = existing.gateway_id;
    Ok(Json(state.catalog.update_tool(&identity, updated).await?).into_response())
}

async fn delete_tool(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.catalog.delete_tool(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn toggle_tool(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(toggle): Json<ToggleRequest>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .set_status(&identity, EntityKind::Tool, id, toggle.enabled, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ResourceCreate {
    name: String,
    uri: String,
    #[serde(default = "default_mime")]
    mime_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    text: Option<String>,
}

fn default_mime() -> String {
    "text/plain".to_owned()
}

async fn build_resource(
    state: &AppState,
    identity: &IdentityContext,
    create: ResourceCreate,
) -> AppResult<ResourceEntry> {
    let team_id = target_team(state, identity, create.team_id).await?;
    let mut common = CatalogCommon::new(
        create.name,
        team_id,
        identity.email.clone(),
        create.visibility.unwrap_or(Visibility::Team),
        CreatedVia::Api,
    );
    common.description = create.description;
    common.tags = create.tags;
    Ok(ResourceEntry {
        common,
        gateway_id: None,
        uri: create.uri,
        mime_type: create.mime_type,
        text: create.text,
        blob: None,
    })
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let params = page_params(&state, &query)?;
    Ok(Json(state.catalog.list_resources(&identity, &params).await?).into_response())
}

async fn create_resource(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(create): Json<ResourceCreate>,
) -> Result<Response, AppError> {
    let resource = build_resource(&state, &identity, create).await?;
    let created = state.catalog.create_resource(&identity, resource).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.catalog.get_resource(&identity, id).await?).into_response())
}

async fn update_resource(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
    Json(create): Json<ResourceCreate>,
) -> Result<Response, AppError> {
    let existing = state.catalog.get_resource(&identity, id).await?;
    let mut updated = build_resource(&state, &identity, create).await?;
    updated.common.id = existing.common.id;
    updated.common.team_id = existing.common.team_id;
    updated.common.owner_email = existing.common.owner_email.clone();
    updated.common.created_at = existing.common.created_at;
    updated.common.created_by = existing.common.created_by.clone();
    updated.common.created_via = existing.common.created_via;
    updated.common.enabled = existing.common.enabled;
    updated.gateway_id = existing.gateway_id;
    let resource = state.catalog.update_resource(&identity, updated).await?;
    // Local subscribers learn about the change
    state.sessions.notify_resource_updated(&resource.uri).await;
    Ok(Json(resource).into_response())
}

async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.catalog.delete_resource(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn toggle_resource(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(toggle): Json<ToggleRequest>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .set_status(&identity, EntityKind::Resource, id, toggle.enabled, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PromptCreate {
    name: String,
    template: String,
    #[serde(default)]
    arguments_schema: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    visibility: Option<Visibility>,
}

async fn build_prompt(
    state: &AppState,
    identity: &IdentityContext,
    create: PromptCreate,
) -> AppResult<Prompt> {
    let team_id = target_team(state, identity, create.team_id).await?;
    let mut common = CatalogCommon::new(
        create.name,
        team_id,
        identity.email.clone(),
        create.visibility.unwrap_or(Visibility::Team),
        CreatedVia::Api,
    );
    common.description = create.description;
    common.tags = create.tags;
    Ok(Prompt {
        common,
        gateway_id: None,
        template: create.template,
        arguments_schema: create
            .arguments_schema
            .unwrap_or_else(|| json!({"type": "object"})),
    })
}

async fn list_prompts(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let params = page_params(&state, &query)?;
    Ok(Json(state.catalog.list_prompts(&identity, &params).await?).into_response())
}

async fn create_prompt(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(create): Json<PromptCreate>,
) -> Result<Response, AppError> {
    let prompt = build_prompt(&state, &identity, create).await?;
    let created = state.catalog.create_prompt(&identity, prompt).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn get_prompt(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.catalog.get_prompt(&identity, id).await?).into_response())
}

async fn update_prompt(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
    Json(create): Json<PromptCreate>,
) -> Result<Response, AppError> {
    let existing = state.catalog.get_prompt(&identity, id).await?;
    let mut updated = build_prompt(&state, &identity, create).await?;
    updated.common.id = existing.common.id;
    updated.common.team_id = existing.common.team_id;
    updated.common.owner_email = existing.common.owner_email.clone();
    updated.common.created_at = existing.common.created_at;
    updated.common.created_by = existing.common.created_by.clone();
    updated.common.created_via = existing.common.created_via;
    updated.common.enabled = existing.common.enabled;
    updated.gateway_id = existing.gateway_id;
    Ok(Json(state.catalog.update_prompt(&identity, updated).await?).into_response())
}

async fn delete_prompt(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.catalog.delete_prompt(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn toggle_prompt(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(toggle): Json<ToggleRequest>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .set_status(&identity, EntityKind::Prompt, id, toggle.enabled, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Virtual servers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ServerCreate {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    associated_tools: Vec<Uuid>,
    #[serde(default)]
    associated_resources: Vec<Uuid>,
    #[serde(default)]
    associated_prompts: Vec<Uuid>,
    #[serde(default)]
    associated_a2a_agents: Vec<Uuid>,
}

async fn build_server(
    state: &AppState,
    identity: &IdentityContext,
    create: ServerCreate,
) -> AppResult<VirtualServer> {
    let team_id = target_team(state, identity, create.team_id).await?;
    let mut common = CatalogCommon::new(
        create.name,
        team_id,
        identity.email.clone(),
        create.visibility.unwrap_or(Visibility::Team),
        CreatedVia::Api,
    );
    common.description = create.description;
    common.tags = create.tags;
    Ok(VirtualServer {
        common,
        icon: create.icon,
        associated_tools: create.associated_tools,
        associated_resources: create.associated_resources,
        associated_prompts: create.associated_prompts,
        associated_a2a_agents: create.associated_a2a_agents,
    })
}

async fn list_servers(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let params = page_params(&state, &query)?;
    Ok(Json(state.catalog.list_servers(&identity, &params).await?).into_response())
}

async fn create_server(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Json(create): Json<ServerCreate>,
) -> Result<Response, AppError> {
    let server = build_server(&state, &identity, create).await?;
    let context = hook_context(&identity, &request_id);
    let created = state
        .catalog
        .create_server(&identity, server, &context, None)
        .await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn get_server(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.catalog.get_server(&identity, id).await?).into_response())
}

async fn update_server(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(create): Json<ServerCreate>,
) -> Result<Response, AppError> {
    let existing = state.catalog.get_server(&identity, id).await?;
    let mut updated = build_server(&state, &identity, create).await?;
    updated.common.id = existing.common.id;
    updated.common.team_id = existing.common.team_id;
    updated.common.owner_email = existing.common.owner_email.clone();
    updated.common.created_at = existing.common.created_at;
    updated.common.created_by = existing.common.created_by.clone();
    updated.common.created_via = existing.common.created_via;
    updated.common.enabled = existing.common.enabled;
    let context = hook_context(&identity, &request_id);
    Ok(Json(
        state
            .catalog
            .update_server(&identity, updated, &context, None)
            .await?,
    )
    .into_response())
}

async fn delete_server(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .delete_server(&identity, id, &context, None)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn toggle_server(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(toggle): Json<ToggleRequest>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .set_status(&identity, EntityKind::Server, id, toggle.enabled, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Ready-to-paste connection snippets for the three client transports
async fn server_connect_doc(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let server = state.catalog.get_server(&identity, id).await?;
    let base = format!(
        "http://{}:{}",
        state.config.http.bind_address, state.config.http.port
    );
    Ok(Json(json!({
        "server": server.common.name,
        "transports": {
            "streamable_http": {
                "url": format!("{base}/servers/{id}/mcp"),
                "headers": { "Authorization": "Bearer <your-token>" },
            },
            "sse": {
                "url": format!("{base}/servers/{id}/sse"),
                "headers": { "Authorization": "Bearer <your-token>" },
            },
            "stdio": {
                "command": "mcp-translate",
                "args": ["--sse", format!("{base}/servers/{id}/sse")],
            },
        },
    }))
    .into_response())
}

// ---------------------------------------------------------------------------
// Gateways
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GatewayCreate {
    name: String,
    url: String,
    #[serde(default = "default_transport")]
    transport: crate::models::TransportKind,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    auth_type: Option<AuthScheme>,
    #[serde(default)]
    auth_value: Option<String>,
}

fn default_transport() -> crate::models::TransportKind {
    crate::models::TransportKind::StreamableHttp
}

async fn list_gateways(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let params = page_params(&state, &query)?;
    Ok(Json(state.catalog.list_gateways(&identity, &params).await?).into_response())
}

async fn register_gateway(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Json(create): Json<GatewayCreate>,
) -> Result<Response, AppError> {
    let team_id = target_team(&state, &identity, create.team_id).await?;
    let registration = GatewayRegistration {
        name: create.name,
        url: create.url,
        transport: create.transport,
        description: create.description,
        visibility: create.visibility,
        team_id,
        auth_type: create.auth_type,
        auth_value: create.auth_value,
    };
    let context = hook_context(&identity, &request_id);
    let gateway = state
        .federation
        .register_gateway(&identity, registration, &context, None)
        .await?;
    Ok((StatusCode::CREATED, Json(gateway)).into_response())
}

async fn get_gateway(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.catalog.get_gateway(&identity, id).await?).into_response())
}

#[derive(Debug, Deserialize)]
struct DeleteGatewayQuery {
    #[serde(default)]
    force: bool,
}

async fn delete_gateway(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteGatewayQuery>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .delete_gateway(&identity, id, query.force, &context, None)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn toggle_gateway(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(toggle): Json<ToggleRequest>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .set_status(&identity, EntityKind::Gateway, id, toggle.enabled, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// A2A agents
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AgentCreate {
    name: String,
    endpoint: String,
    slug: String,
    #[serde(default = "default_protocol_version")]
    protocol_version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    team_id: Option<Uuid>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    auth_type: Option<AuthScheme>,
    #[serde(default)]
    auth_value: Option<String>,
}

fn default_protocol_version() -> String {
    "1.0".to_owned()
}

async fn build_agent(
    state: &AppState,
    identity: &IdentityContext,
    create: AgentCreate,
) -> AppResult<A2aAgent> {
    let team_id = target_team(state, identity, create.team_id).await?;
    let auth_value_encrypted = create
        .auth_value
        .map(|plain| state.vault.encrypt(&SecretString::new(plain)))
        .transpose()?;
    let mut common = CatalogCommon::new(
        create.name,
        team_id,
        identity.email.clone(),
        create.visibility.unwrap_or(Visibility::Team),
        CreatedVia::Api,
    );
    common.description = create.description;
    common.tags = create.tags;
    Ok(A2aAgent {
        common,
        endpoint: create.endpoint,
        protocol_version: create.protocol_version,
        auth_type: create.auth_type,
        auth_value_encrypted,
        slug: create.slug,
    })
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let params = page_params(&state, &query)?;
    Ok(Json(state.catalog.list_a2a_agents(&identity, &params).await?).into_response())
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Json(create): Json<AgentCreate>,
) -> Result<Response, AppError> {
    let agent = build_agent(&state, &identity, create).await?;
    let created = state.catalog.create_a2a_agent(&identity, agent).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.catalog.get_a2a_agent(&identity, id).await?).into_response())
}

async fn update_agent(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
    Json(create): Json<AgentCreate>,
) -> Result<Response, AppError> {
    let existing = state.catalog.get_a2a_agent(&identity, id).await?;
    let mut updated = build_agent(&state, &identity, create).await?;
    updated.common.id = existing.common.id;
    updated.common.team_id = existing.common.team_id;
    updated.common.owner_email = existing.common.owner_email.clone();
    updated.common.created_at = existing.common.created_at;
    updated.common.created_by = existing.common.created_by.clone();
    updated.common.created_via = existing.common.created_via;
    updated.common.enabled = existing.common.enabled;
    Ok(Json(state.catalog.update_a2a_agent(&identity, updated).await?).into_response())
}

async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.catalog.delete_a2a_agent(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn toggle_agent(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(toggle): Json<ToggleRequest>,
) -> Result<Response, AppError> {
    let context = hook_context(&identity, &request_id);
    state
        .catalog
        .set_status(&identity, EntityKind::A2aAgent, id, toggle.enabled, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
