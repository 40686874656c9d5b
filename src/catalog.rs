// ABOUTME: Catalog registry service: visibility-enforced CRUD over all entity kinds
// ABOUTME: Admin hooks wrap gateway/server lifecycle; caches invalidate after commit
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Catalog Registry
//!
//! Every read goes through the visibility predicate and every write through
//! the mutation rule, so `list`, `get`, and dispatch can never disagree about
//! what a caller may touch. Gateway and virtual-server lifecycle
//! operations run the admin hook chain; a pre-hook violation aborts before
//! anything is persisted.

use crate::constants::violation_codes;
use crate::cache::CacheBackend;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    A2aAgent, CatalogEntity, EntityKind, Gateway, Prompt, ResourceEntry, Tool, VirtualServer,
};
use crate::pagination::{Cursor, Page, PageParams, PaginationStrategy};
use crate::permissions::{allowed, can_mutate, IdentityContext};
use crate::plugins::{ElicitationTransport, HookContext, HookPayload, HookPoint, PluginExecutor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Catalog registry over the database, plugin executor, and cache
pub struct CatalogService {
    db: Database,
    plugins: Arc<PluginExecutor>,
    cache: Arc<dyn CacheBackend>,
    cache_ttl: Duration,
    cursor_threshold: u64,
}

impl CatalogService {
    /// Assemble the service
    #[must_use]
    pub fn new(
        db: Database,
        plugins: Arc<PluginExecutor>,
        cache: Arc<dyn CacheBackend>,
        cache_ttl: Duration,
        cursor_threshold: u64,
    ) -> Self {
        Self {
            db,
            plugins,
            cache,
            cache_ttl,
            cursor_threshold,
        }
    }

    /// Direct database access for components that bypass visibility
    /// (federation manager, health loop)
    #[must_use]
    pub const fn db(&self) -> &Database {
        &self.db
    }

    async fn invalidate_kind(&self, kind: EntityKind) {
        // Invalidation happens after the write committed, so readers never
        // see a cache entry newer than the table
        let _ = self
            .cache
            .invalidate_prefix(&format!("catalog:{}:", kind.table()))
            .await;
    }

    /// Read-through cache over the tools table, the hottest listing.
    /// `invalidate_kind` drops the entry after every committed tool write.
    async fn all_tools_cached(&self) -> AppResult<Vec<Tool>> {
        const KEY: &str = "catalog:tools:all";
        if let Some(cached) = self.cache.get(KEY).await? {
            if let Ok(tools) = serde_json::from_str::<Vec<Tool>>(&cached) {
                return Ok(tools);
            }
        }
        let tools = self.db.list_tools().await?;
        if let Ok(serialized) = serde_json::to_string(&tools) {
            let _ = self.cache.set(KEY, &serialized, self.cache_ttl).await;
        }
        Ok(tools)
    }

    /// Paginate an already visibility-filtered vec into the response envelope
    fn paginate<T: CatalogEntity + Clone>(
        items: Vec<T>,
        params: &PageParams,
        cursor_threshold: u64,
        path: &str,
    ) -> Page<T> {
        let total = items.len() as u64;
        match params.effective_strategy(total, cursor_threshold) {
            PaginationStrategy::Offset => {
                let start = usize::try_from(params.offset()).unwrap_or(usize::MAX);
                let data: Vec<T> = items
                    .into_iter()
                    .skip(start)
                    .take(usize::try_from(params.size).unwrap_or(usize::MAX))
                    .collect();
                Page::offset(data, params, total, path)
            }
            PaginationStrategy::Cursor => {
                // Items arrive ordered (created_at DESC, id DESC); resume
                // strictly after the cursor row
                let after = params.cursor.clone();
                let filtered: Vec<T> = items
                    .into_iter()
                    .filter(|item| {
                        after.as_ref().is_none_or(|c| {
                            let common = item.common();
                            common.created_at < c.created_at
                                || (common.created_at == c.created_at
                                    && common.id.to_string() < c.id)
                        })
                    })
                    .collect();
                let has_more = filtered.len() as u64 > params.size;
                let data: Vec<T> = filtered
                    .into_iter()
                    .take(usize::try_from(params.size).unwrap_or(usize::MAX))
                    .collect();
                let next = has_more
                    .then(|| {
                        data.last().map(|item| {
                            Cursor::new(item.common().created_at, item.common().id.to_string())
                        })
                    })
                    .flatten();
                Page::cursor(data, params, total, next, path)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tools
    // -----------------------------------------------------------------------

    /// Register a tool
    ///
    /// # Errors
    /// Returns `Conflict` on duplicate names, `Forbidden` when the caller's
    /// token does not reach the target team.
    pub async fn create_tool(&self, identity: &IdentityContext, tool: Tool) -> AppResult<Tool> {
        if !identity.token_allows_team(tool.common.team_id) {
            return Err(AppError::forbidden("Token does not reach this team"));
        }
        self.db.insert_tool(&tool).await?;
        self.invalidate_kind(EntityKind::Tool).await;
        info!(tool = %tool.common.name, "Tool registered");
        Ok(tool)
    }

    /// Get a visible tool
    ///
    /// # Errors
    /// Returns `NotFound` when absent or not visible — indistinguishable by
    /// design.
    pub async fn get_tool(&self, identity: &IdentityContext, id: Uuid) -> AppResult<Tool> {
        let tool = self
            .db
            .get_tool(id)
            .await?
            .filter(|t| allowed(identity, &t.common))
            .ok_or_else(|| AppError::not_found(format!("Tool {id}")))?;
        Ok(tool)
    }

    /// List visible tools with pagination
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_tools(
        &self,
        identity: &IdentityContext,
        params: &PageParams,
    ) -> AppResult<Page<Tool>> {
        let visible: Vec<Tool> = self
            .all_tools_cached()
            .await?
            .into_iter()
            .filter(|t| allowed(identity, &t.common))
            .collect();
        Ok(Self::paginate(visible, params, self.cursor_threshold, "/tools"))
    }

    /// Update a tool
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the tool
    pub async fn update_tool(&self, identity: &IdentityContext, tool: Tool) -> AppResult<Tool> {
        let existing = self.get_tool(identity, tool.common.id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to modify this tool"));
        }
        let mut updated = tool;
        updated.common.updated_at = chrono::Utc::now();
        self.db.update_tool(&updated).await?;
        self.invalidate_kind(EntityKind::Tool).await;
        Ok(updated)
    }

    /// Delete a tool. Virtual servers referencing it keep a dangling id that
    /// resolves to nothing; referential integrity is enforced at resolve time.
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the tool
    pub async fn delete_tool(&self, identity: &IdentityContext, id: Uuid) -> AppResult<()> {
        let existing = self.get_tool(identity, id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to delete this tool"));
        }
        self.db.delete_tool(id).await?;
        self.invalidate_kind(EntityKind::Tool).await;
        info!(tool = %existing.common.name, "Tool deleted");
        Ok(())
    }

    /// Resolve a client-supplied tool name to a dispatchable tool.
    ///
    /// Local tools match by bare name. Federated tools match by qualified
    /// name: the longest registered gateway name that prefixes the call name
    /// wins, the remainder is the peer-side tool name.
    ///
    /// # Errors
    /// Returns `MethodNotFound` when nothing visible and enabled matches.
    pub async fn resolve_tool(
        &self,
        identity: &IdentityContext,
        name: &str,
    ) -> AppResult<(Tool, Option<Gateway>)> {
        if let Some(tool) = self.db.find_local_tool(name).await? {
            if allowed(identity, &tool.common) && tool.common.enabled {
                return Ok((tool, None));
            }
        }

        // Qualified name: try each visible gateway whose name prefixes the call
        let mut gateways: Vec<Gateway> = self
            .db
            .list_gateways()
            .await?
            .into_iter()
            .filter(|g| allowed(identity, &g.common))
            .collect();
        // Longest prefix first so "peer-a" beats "peer"
        gateways.sort_by_key(|g| std::cmp::Reverse(g.common.name.len()));

        for gateway in gateways {
            let prefix = format!(
                "{}{}",
                gateway.common.name,
                crate::constants::protocol::QUALIFIED_NAME_SEPARATOR
            );
            if let Some(remainder) = name.strip_prefix(&prefix) {
                if let Some(tool) = self.db.find_gateway_tool(gateway.common.id, remainder).await? {
                    if allowed(identity, &tool.common) && tool.common.enabled {
                        return Ok((tool, Some(gateway)));
                    }
                }
            }
        }

        Err(AppError::method_not_found(format!("Unknown tool: {name}")))
    }

    /// Bulk-import tools; each item succeeds or fails independently.
    /// Returns `(created, per-item errors)`.
    ///
    /// # Errors
    /// Only infrastructure failures error the whole call.
    pub async fn bulk_import_tools(
        &self,
        identity: &IdentityContext,
        tools: Vec<Tool>,
    ) -> AppResult<(Vec<Tool>, Vec<(String, String)>)> {
        let mut created = Vec::new();
        let mut failures = Vec::new();
        for tool in tools {
            let name = tool.common.name.clone();
            match self.create_tool(identity, tool).await {
                Ok(tool) => created.push(tool),
                Err(e) => failures.push((name, e.client_message())),
            }
        }
        Ok((created, failures))
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    /// Register a resource
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate URI within the owner scope.
    pub async fn create_resource(
        &self,
        identity: &IdentityContext,
        resource: ResourceEntry,
    ) -> AppResult<ResourceEntry> {
        if !identity.token_allows_team(resource.common.team_id) {
            return Err(AppError::forbidden("Token does not reach this team"));
        }
        self.db.insert_resource(&resource).await?;
        self.invalidate_kind(EntityKind::Resource).await;
        Ok(resource)
    }

    /// Get a visible resource
    ///
    /// # Errors
    /// Returns `NotFound` when absent or not visible
    pub async fn get_resource(
        &self,
        identity: &IdentityContext,
        id: Uuid,
    ) -> AppResult<ResourceEntry> {
        self.db
            .get_resource(id)
            .await?
            .filter(|r| allowed(identity, &r.common))
            .ok_or_else(|| AppError::not_found(format!("Resource {id}")))
    }

    /// List visible resources with pagination
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_resources(
        &self,
        identity: &IdentityContext,
        params: &PageParams,
    ) -> AppResult<Page<ResourceEntry>> {
        let visible: Vec<ResourceEntry> = self
            .db
            .list_resources()
            .await?
            .into_iter()
            .filter(|r| allowed(identity, &r.common))
            .collect();
        Ok(Self::paginate(
            visible,
            params,
            self.cursor_threshold,
            "/resources",
        ))
    }

    /// Resolve a resource URI for a read: the first visible, enabled row wins
    ///
    /// # Errors
    /// Returns `NotFound` when nothing visible matches
    pub async fn resolve_resource(
        &self,
        identity: &IdentityContext,
        uri: &str,
    ) -> AppResult<ResourceEntry> {
        self.db
            .find_resources_by_uri(uri)
            .await?
            .into_iter()
            .find(|r| allowed(identity, &r.common) && r.common.enabled)
            .ok_or_else(|| AppError::not_found(format!("Resource {uri}")))
    }

    /// Update a resource
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the resource
    pub async fn update_resource(
        &self,
        identity: &IdentityContext,
        resource: ResourceEntry,
    ) -> AppResult<ResourceEntry> {
        let existing = self.get_resource(identity, resource.common.id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to modify this resource"));
        }
        let mut updated = resource;
        updated.common.updated_at = chrono::Utc::now();
        self.db.update_resource(&updated).await?;
        self.invalidate_kind(EntityKind::Resource).await;
        Ok(updated)
    }

    /// Delete a resource
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the resource
    pub async fn delete_resource(&self, identity: &IdentityContext, id: Uuid) -> AppResult<()> {
        let existing = self.get_resource(identity, id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to delete this resource"));
        }
        self.db.delete_resource(id).await?;
        self.invalidate_kind(EntityKind::Resource).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Prompts
    // -----------------------------------------------------------------------

    /// Register a prompt
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate name within the owner scope.
    pub async fn create_prompt(
        &self,
        identity: &IdentityContext,
        prompt: Prompt,
    ) -> AppResult<Prompt> {
        if !identity.token_allows_team(prompt.common.team_id) {
            return Err(AppError::forbidden("Token does not reach this team"));
        }
        self.db.insert_prompt(&prompt).await?;
        self.invalidate_kind(EntityKind::Prompt).await;
        Ok(prompt)
    }

    /// Get a visible prompt
    ///
    /// # Errors
    /// Returns `NotFound` when absent or not visible
    pub async fn get_prompt(&self, identity: &IdentityContext, id: Uuid) -> AppResult<Prompt> {
        self.db
            .get_prompt(id)
            .await?
            .filter(|p| allowed(identity, &p.common))
            .ok_or_else(|| AppError::not_found(format!("Prompt {id}")))
    }

    /// List visible prompts with pagination
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_prompts(
        &self,
        identity: &IdentityContext,
        params: &PageParams,
    ) -> AppResult<Page<Prompt>> {
        let visible: Vec<Prompt> = self
            .db
            .list_prompts()
            .await?
            .into_iter()
            .filter(|p| allowed(identity, &p.common))
            .collect();
        Ok(Self::paginate(
            visible,
            params,
            self.cursor_threshold,
            "/prompts",
        ))
    }

    /// Resolve a prompt by name for `prompts/get`
    ///
    /// # Errors
    /// Returns `NotFound` when nothing visible matches
    pub async fn resolve_prompt(
        &self,
        identity: &IdentityContext,
        name: &str,
    ) -> AppResult<Prompt> {
        self.db
            .find_prompts_by_name(name)
            .await?
            .into_iter()
            .find(|p| allowed(identity, &p.common) && p.common.enabled)
            .ok_or_else(|| AppError::not_found(format!("Prompt {name}")))
    }

    /// Update a prompt
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the prompt
    pub async fn update_prompt(
        &self,
        identity: &IdentityContext,
        prompt: Prompt,
    ) -> AppResult<Prompt> {
        let existing = self.get_prompt(identity, prompt.common.id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to modify this prompt"));
        }
        let mut updated = prompt;
        updated.common.updated_at = chrono::Utc::now();
        self.db.update_prompt(&updated).await?;
        self.invalidate_kind(EntityKind::Prompt).await;
        Ok(updated)
    }

    /// Delete a prompt
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the prompt
    pub async fn delete_prompt(&self, identity: &IdentityContext, id: Uuid) -> AppResult<()> {
        let existing = self.get_prompt(identity, id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to delete this prompt"));
        }
        self.db.delete_prompt(id).await?;
        self.invalidate_kind(EntityKind::Prompt).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Virtual servers (admin hooks apply)
    // -----------------------------------------------------------------------

    async fn run_admin_hook(
        &self,
        hook: HookPoint,
        payload: HookPayload,
        context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<()> {
        self.plugins
            .run_hook(hook, payload, context, elicitor)
            .await?;
        Ok(())
    }

    /// Every associated id must resolve and be visible to the creator
    /// within their tenant scope
    async fn validate_server_associations(
        &self,
        identity: &IdentityContext,
        server: &VirtualServer,
    ) -> AppResult<()> {
        for id in &server.associated_tools {
            self.get_tool(identity, *id).await.map_err(|_| {
                AppError::invalid_input(format!("Associated tool {id} does not resolve"))
            })?;
        }
        for id in &server.associated_resources {
            self.get_resource(identity, *id).await.map_err(|_| {
                AppError::invalid_input(format!("Associated resource {id} does not resolve"))
            })?;
        }
        for id in &server.associated_prompts {
            self.get_prompt(identity, *id).await.map_err(|_| {
                AppError::invalid_input(format!("Associated prompt {id} does not resolve"))
            })?;
        }
        for id in &server.associated_a2a_agents {
            self.get_a2a_agent(identity, *id).await.map_err(|_| {
                AppError::invalid_input(format!("Associated A2A agent {id} does not resolve"))
            })?;
        }
        Ok(())
    }

    /// Register a virtual server, running the server admin hooks
    ///
    /// # Errors
    /// Returns `PolicyDenied` when a pre-hook blocks, `InvalidRequest` when
    /// an association does not resolve.
    pub async fn create_server(
        &self,
        identity: &IdentityContext,
        server: VirtualServer,
        hook_context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<VirtualServer> {
        if !identity.token_allows_team(server.common.team_id) {
            return Err(AppError::forbidden("Token does not reach this team"));
        }
        self.validate_server_associations(identity, &server).await?;

        let payload = HookPayload::AdminEntity {
            entity_kind: EntityKind::Server,
            entity: serde_json::to_value(&server)?,
        };
        self.run_admin_hook(HookPoint::ServerPreRegister, payload.clone(), hook_context, elicitor)
            .await?;

        self.db.insert_server(&server).await?;
        self.invalidate_kind(EntityKind::Server).await;

        self.run_admin_hook(HookPoint::ServerPostRegister, payload, hook_context, None)
            .await?;
        info!(server = %server.common.name, "Virtual server registered");
        Ok(server)
    }

    /// Get a visible virtual server
    ///
    /// # Errors
    /// Returns `NotFound` when absent or not visible
    pub async fn get_server(
        &self,
        identity: &IdentityContext,
        id: Uuid,
    ) -> AppResult<VirtualServer> {
        self.db
            .get_server(id)
            .await?
            .filter(|s| allowed(identity, &s.common))
            .ok_or_else(|| AppError::not_found(format!("Server {id}")))
    }

    /// List visible virtual servers with pagination
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_servers(
        &self,
        identity: &IdentityContext,
        params: &PageParams,
    ) -> AppResult<Page<VirtualServer>> {
        let visible: Vec<VirtualServer> = self
            .db
            .list_servers()
            .await?
            .into_iter()
            .filter(|s| allowed(identity, &s.common))
            .collect();
        Ok(Self::paginate(
            visible,
            params,
            self.cursor_threshold,
            "/servers",
        ))
    }

    /// Update a virtual server, running the update admin hooks
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the server
    pub async fn update_server(
        &self,
        identity: &IdentityContext,
        server: VirtualServer,
        hook_context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<VirtualServer> {
        let existing = self.get_server(identity, server.common.id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to modify this server"));
        }
        self.validate_server_associations(identity, &server).await?;

        let payload = HookPayload::AdminEntity {
            entity_kind: EntityKind::Server,
            entity: serde_json::to_value(&server)?,
        };
        self.run_admin_hook(HookPoint::ServerPreUpdate, payload.clone(), hook_context, elicitor)
            .await?;

        let mut updated = server;
        updated.common.updated_at = chrono::Utc::now();
        self.db.update_server(&updated).await?;
        self.invalidate_kind(EntityKind::Server).await;

        self.run_admin_hook(HookPoint::ServerPostUpdate, payload, hook_context, None)
            .await?;
        Ok(updated)
    }

    /// Delete a virtual server, running the delete admin hooks
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the server
    pub async fn delete_server(
        &self,
        identity: &IdentityContext,
        id: Uuid,
        hook_context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<()> {
        let existing = self.get_server(identity, id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to delete this server"));
        }

        let payload = HookPayload::AdminEntity {
            entity_kind: EntityKind::Server,
            entity: serde_json::to_value(&existing)?,
        };
        self.run_admin_hook(HookPoint::ServerPreDelete, payload.clone(), hook_context, elicitor)
            .await?;

        self.db.delete_server(id).await?;
        self.invalidate_kind(EntityKind::Server).await;

        self.run_admin_hook(HookPoint::ServerPostDelete, payload, hook_context, None)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // A2A agents
    // -----------------------------------------------------------------------

    /// Register an A2A agent
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate slug within the owner scope.
    pub async fn create_a2a_agent(
        &self,
        identity: &IdentityContext,
        agent: A2aAgent,
    ) -> AppResult<A2aAgent> {
        if !identity.token_allows_team(agent.common.team_id) {
            return Err(AppError::forbidden("Token does not reach this team"));
        }
        self.db.insert_a2a_agent(&agent).await?;
        self.invalidate_kind(EntityKind::A2aAgent).await;
        Ok(agent)
    }

    /// Get a visible A2A agent
    ///
    /// # Errors
    /// Returns `NotFound` when absent or not visible
    pub async fn get_a2a_agent(&self, identity: &IdentityContext, id: Uuid) -> AppResult<A2aAgent> {
        self.db
            .get_a2a_agent(id)
            .await?
            .filter(|a| allowed(identity, &a.common))
            .ok_or_else(|| AppError::not_found(format!("A2A agent {id}")))
    }

    /// List visible A2A agents with pagination
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_a2a_agents(
        &self,
        identity: &IdentityContext,
        params: &PageParams,
    ) -> AppResult<Page<A2aAgent>> {
        let visible: Vec<A2aAgent> = self
            .db
            .list_a2a_agents()
            .await?
            .into_iter()
            .filter(|a| allowed(identity, &a.common))
            .collect();
        Ok(Self::paginate(visible, params, self.cursor_threshold, "/a2a"))
    }

    /// Update an A2A agent
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the agent
    pub async fn update_a2a_agent(
        &self,
        identity: &IdentityContext,
        agent: A2aAgent,
    ) -> AppResult<A2aAgent> {
        let existing = self.get_a2a_agent(identity, agent.common.id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to modify this agent"));
        }
        let mut updated = agent;
        updated.common.updated_at = chrono::Utc::now();
        self.db.update_a2a_agent(&updated).await?;
        self.invalidate_kind(EntityKind::A2aAgent).await;
        Ok(updated)
    }

    /// Delete an A2A agent
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the agent
    pub async fn delete_a2a_agent(&self, identity: &IdentityContext, id: Uuid) -> AppResult<()> {
        let existing = self.get_a2a_agent(identity, id).await?;
        if !can_mutate(identity, &existing.common) {
            return Err(AppError::forbidden("Not allowed to delete this agent"));
        }
        self.db.delete_a2a_agent(id).await?;
        self.invalidate_kind(EntityKind::A2aAgent).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Gateways (registration itself lives in the federation manager; the
    // service handles visibility-checked reads and guarded deletes)
    // -----------------------------------------------------------------------

    /// Get a visible gateway
    ///
    /// # Errors
    /// Returns `NotFound` when absent or not visible
    pub async fn get_gateway(&self, identity: &IdentityContext, id: Uuid) -> AppResult<Gateway> {
        self.db
            .get_gateway(id)
            .await?
            .filter(|g| allowed(identity, &g.common))
            .ok_or_else(|| AppError::not_found(format!("Gateway {id}")))
    }

    /// List visible gateways with pagination
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_gateways(
        &self,
        identity: &IdentityContext,
        params: &PageParams,
    ) -> AppResult<Page<Gateway>> {
        let visible: Vec<Gateway> = self
            .db
            .list_gateways()
            .await?
            .into_iter()
            .filter(|g| allowed(identity, &g.common))
            .collect();
        Ok(Self::paginate(
            visible,
            params,
            self.cursor_threshold,
            "/gateways",
        ))
    }

    /// Delete a gateway. A gateway with live federated entities is a
    /// dependency violation unless the caller confirmed (`force`), which the
    /// admin routes obtain through an elicitation round-trip.
    ///
    /// # Errors
    /// Returns `Conflict` with `FEDERATION_DEPENDENTS_EXIST` when dependents
    /// exist and `force` is false.
    pub async fn delete_gateway(
        &self,
        identity: &IdentityContext,
        id: Uuid,
        force: bool,
        hook_context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<()> {
        let existing = self
            .db
            .get_gateway(id)
            .await?
            .filter(|g| allowed(identity, &g.common))
            .ok_or_else(|| AppError::not_found(format!("Gateway {id}")))?;

        if !identity.is_platform_admin
            && existing.common.owner_email != identity.email
            && !identity.is_team_owner(existing.common.team_id)
        {
            return Err(AppError::forbidden("Not allowed to delete this gateway"));
        }

        let dependents = self.db.list_tools_for_gateway(id).await?;
        let active = dependents.iter().filter(|t| t.common.enabled).count();
        if active > 0 && !force {
            debug!(gateway = %existing.common.name, active, "Delete blocked by dependents");
            return Err(AppError::policy_denied(
                violation_codes::FEDERATION_DEPENDENTS_EXIST,
                format!(
                    "Gateway {} still provides {active} enabled entities; confirm to delete",
                    existing.common.name
                ),
            ));
        }

        let payload = HookPayload::AdminEntity {
            entity_kind: EntityKind::Gateway,
            entity: serde_json::to_value(&existing)?,
        };
        self.run_admin_hook(HookPoint::GatewayPreDelete, payload.clone(), hook_context, elicitor)
            .await?;

        self.db.delete_gateway(id).await?;
        self.invalidate_kind(EntityKind::Gateway).await;
        self.invalidate_kind(EntityKind::Tool).await;

        self.run_admin_hook(HookPoint::GatewayPostDelete, payload, hook_context, None)
            .await?;
        info!(gateway = %existing.common.name, "Gateway deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Kind-generic status toggle
    // -----------------------------------------------------------------------

    /// Flip operator intent for an entity, running status-change admin hooks
    /// for gateways and servers
    ///
    /// # Errors
    /// Returns `Forbidden` unless the caller may mutate the entity
    pub async fn set_status(
        &self,
        identity: &IdentityContext,
        kind: EntityKind,
        id: Uuid,
        enabled: bool,
        hook_context: &HookContext,
    ) -> AppResult<()> {
        // Load the common block through the kind-specific visible getter
        let common = match kind {
            EntityKind::Tool => self.get_tool(identity, id).await?.common,
            EntityKind::Resource => self.get_resource(identity, id).await?.common,
            EntityKind::Prompt => self.get_prompt(identity, id).await?.common,
            EntityKind::Server => self.get_server(identity, id).await?.common,
            EntityKind::Gateway => self.get_gateway(identity, id).await?.common,
            EntityKind::A2aAgent => self.get_a2a_agent(identity, id).await?.common,
        };
        if !can_mutate(identity, &common) && !identity.is_platform_admin {
            return Err(AppError::forbidden("Not allowed to toggle this entity"));
        }

        let status_payload = HookPayload::StatusChange {
            entity_kind: kind,
            id,
            enabled,
        };
        let (pre, post) = match kind {
            EntityKind::Server => (
                Some(HookPoint::ServerPreStatusChange),
                Some(HookPoint::ServerPostStatusChange),
            ),
            EntityKind::Gateway => (
                Some(HookPoint::GatewayPreStatusChange),
                Some(HookPoint::GatewayPostStatusChange),
            ),
            _ => (None, None),
        };

        if let Some(hook) = pre {
            self.run_admin_hook(hook, status_payload.clone(), hook_context, None)
                .await?;
        }

        self.db.set_entity_enabled(kind, id, enabled).await?;
        self.invalidate_kind(kind).await;

        if let Some(hook) = post {
            self.run_admin_hook(hook, status_payload, hook_context, None)
                .await?;
        }
        info!(kind = ?kind, %id, enabled, "Entity status changed");
        Ok(())
    }
}
