// ABOUTME: Catalog entity database operations for all six entity kinds
// ABOUTME: Uniqueness keys are backed by UNIQUE indexes; violations map to Conflict
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::{
    parse_json, parse_string_vec, parse_uuid, parse_uuid_vec, to_json_text, uuids_to_json_text,
    Database,
};
use crate::errors::{AppError, AppResult};
use crate::models::{
    A2aAgent, AuthScheme, CatalogCommon, CreatedVia, EntityKind, Gateway, IntegrationType, Prompt,
    RequestType, ResourceEntry, Tool, TransportKind, VirtualServer, Visibility,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Map a driver unique violation into a catalog `Conflict`
fn map_insert_error(err: sqlx::Error, kind: EntityKind, name: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::conflict(format!(
            "A {} with the same uniqueness key as '{name}' already exists",
            kind.display()
        )),
        _ => AppError::database(format!("Failed to insert {}: {err}", kind.display())),
    }
}

fn row_to_common(row: &SqliteRow, table: &str) -> AppResult<CatalogCommon> {
    let id: String = row.get("id");
    let team_id: String = row.get("team_id");
    let visibility: String = row.get("visibility");
    let created_via: String = row.get("created_via");
    Ok(CatalogCommon {
        id: parse_uuid(&id, &format!("{table}.id"))?,
        name: row.get("name"),
        description: row.get("description"),
        tags: parse_string_vec(row.get("tags")),
        team_id: parse_uuid(&team_id, &format!("{table}.team_id"))?,
        owner_email: row.get("owner_email"),
        visibility: Visibility::from_str_lossy(&visibility),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        created_by: row.get("created_by"),
        created_via: CreatedVia::from_str_lossy(&created_via),
        enabled: row.get("enabled"),
        reachable: row.get("reachable"),
    })
}

fn opt_uuid(row: &SqliteRow, column: &str) -> AppResult<Option<Uuid>> {
    let value: Option<String> = row.get(column);
    value.as_deref().map(|v| parse_uuid(v, column)).transpose()
}

const COMMON_COLUMNS: &str = "id, name, description, tags, team_id, owner_email, visibility, \
     created_at, updated_at, created_by, created_via, enabled, reachable";

// Shared block binds in COMMON_COLUMNS order; callers chain entity columns after.
macro_rules! bind_common {
    ($query:expr, $common:expr) => {
        $query
            .bind($common.id.to_string())
            .bind(&$common.name)
            .bind(&$common.description)
            .bind(to_json_text(&$common.tags)?)
            .bind($common.team_id.to_string())
            .bind(&$common.owner_email)
            .bind($common.visibility.as_str())
            .bind($common.created_at)
            .bind($common.updated_at)
            .bind(&$common.created_by)
            .bind($common.created_via.as_str())
            .bind($common.enabled)
            .bind($common.reachable)
    };
}

impl Database {
    // -----------------------------------------------------------------------
    // Gateways
    // -----------------------------------------------------------------------

    /// Insert a gateway. Uniqueness: `(team_id, url)`.
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate URL within the team.
    pub async fn insert_gateway(&self, gateway: &Gateway) -> AppResult<()> {
        let sql = format!(
            r"
            INSERT INTO gateways ({COMMON_COLUMNS},
                url, transport, auth_type, auth_value, capabilities, peer_gateway_ids)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            "
        );
        let query = sqlx::query(&sql);
        bind_common!(query, gateway.common)
            .bind(&gateway.url)
            .bind(gateway.transport.as_str())
            .bind(gateway.auth_type.map(|a| a.as_str()))
            .bind(&gateway.auth_value_encrypted)
            .bind(to_json_text(&gateway.capabilities)?)
            .bind(to_json_text(&gateway.peer_gateway_ids)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, EntityKind::Gateway, &gateway.common.name))?;
        Ok(())
    }

    /// Get a gateway by id
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn get_gateway(&self, id: Uuid) -> AppResult<Option<Gateway>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, url, transport, auth_type, auth_value, capabilities, \
             peer_gateway_ids FROM gateways WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get gateway: {e}")))?;

        row.as_ref().map(Self::row_to_gateway).transpose()
    }

    /// Get a gateway by its uniqueness key
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn get_gateway_by_url(&self, team_id: Uuid, url: &str) -> AppResult<Option<Gateway>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, url, transport, auth_type, auth_value, capabilities, \
             peer_gateway_ids FROM gateways WHERE team_id = $1 AND url = $2"
        ))
        .bind(team_id.to_string())
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get gateway by url: {e}")))?;

        row.as_ref().map(Self::row_to_gateway).transpose()
    }

    /// All gateways, newest first
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_gateways(&self) -> AppResult<Vec<Gateway>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, url, transport, auth_type, auth_value, capabilities, \
             peer_gateway_ids FROM gateways ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list gateways: {e}")))?;

        rows.iter().map(Self::row_to_gateway).collect()
    }

    fn row_to_gateway(row: &SqliteRow) -> AppResult<Gateway> {
        let transport: String = row.get("transport");
        let auth_type: Option<String> = row.get("auth_type");
        Ok(Gateway {
            common: row_to_common(row, "gateways")?,
            url: row.get("url"),
            transport: TransportKind::parse(&transport).unwrap_or(TransportKind::StreamableHttp),
            auth_type: auth_type.as_deref().and_then(AuthScheme::parse),
            auth_value_encrypted: row.get("auth_value"),
            capabilities: parse_json(row.get("capabilities")),
            peer_gateway_ids: parse_string_vec(row.get("peer_gateway_ids")),
        })
    }

    /// Update a gateway's mutable fields
    ///
    /// # Errors
    /// Returns `NotFound` if the gateway does not exist
    pub async fn update_gateway(&self, gateway: &Gateway) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE gateways SET
                name = $1, description = $2, tags = $3, visibility = $4, updated_at = $5,
                url = $6, transport = $7, auth_type = $8, auth_value = $9,
                capabilities = $10, peer_gateway_ids = $11, enabled = $12, reachable = $13
            WHERE id = $14
            ",
        )
        .bind(&gateway.common.name)
        .bind(&gateway.common.description)
        .bind(to_json_text(&gateway.common.tags)?)
        .bind(gateway.common.visibility.as_str())
        .bind(gateway.common.updated_at)
        .bind(&gateway.url)
        .bind(gateway.transport.as_str())
        .bind(gateway.auth_type.map(|a| a.as_str()))
        .bind(&gateway.auth_value_encrypted)
        .bind(to_json_text(&gateway.capabilities)?)
        .bind(to_json_text(&gateway.peer_gateway_ids)?)
        .bind(gateway.common.enabled)
        .bind(gateway.common.reachable)
        .bind(gateway.common.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update gateway: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!(
                "Gateway {}",
                gateway.common.id
            )));
        }
        Ok(())
    }

    /// Delete a gateway; federated entities cascade
    ///
    /// # Errors
    /// Returns `NotFound` if the gateway does not exist
    pub async fn delete_gateway(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM gateways WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete gateway: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Gateway {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tools
    // -----------------------------------------------------------------------

    /// Insert a tool. Uniqueness: `(gateway_id, name)`; local tools (NULL
    /// gateway) are unique among themselves.
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate name under the same provenance.
    pub async fn insert_tool(&self, tool: &Tool) -> AppResult<()> {
        let sql = format!(
            r"
            INSERT INTO tools ({COMMON_COLUMNS},
                gateway_id, integration_type, input_schema, output_schema, annotations,
                request_type, base_url, path_template, query_mapping, header_mapping,
                timeout_ms, idempotent, passthrough_headers, allowlist,
                plugin_chain_pre, plugin_chain_post)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,
                    $14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25,$26,$27,$28,$29)
            "
        );
        let query = sqlx::query(&sql);
        bind_common!(query, tool.common)
            .bind(tool.gateway_id.map(|g| g.to_string()))
            .bind(tool.integration_type.as_str())
            .bind(to_json_text(&tool.input_schema)?)
            .bind(
                tool.output_schema
                    .as_ref()
                    .map(to_json_text)
                    .transpose()?,
            )
            .bind(to_json_text(&tool.annotations)?)
            .bind(tool.request_type.map(|r| r.as_str()))
            .bind(&tool.base_url)
            .bind(&tool.path_template)
            .bind(to_json_text(&tool.query_mapping)?)
            .bind(to_json_text(&tool.header_mapping)?)
            .bind(tool.timeout_ms)
            .bind(tool.idempotent)
            .bind(to_json_text(&tool.passthrough_headers)?)
            .bind(tool.allowlist.as_ref().map(to_json_text).transpose()?)
            .bind(to_json_text(&tool.plugin_chain_pre)?)
            .bind(to_json_text(&tool.plugin_chain_post)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, EntityKind::Tool, &tool.common.name))?;
        Ok(())
    }

    const TOOL_COLUMNS: &'static str = "gateway_id, integration_type, input_schema, \
         output_schema, annotations, request_type, base_url, path_template, query_mapping, \
         header_mapping, timeout_ms, idempotent, passthrough_headers, allowlist, \
         plugin_chain_pre, plugin_chain_post";

    /// Get a tool by id
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn get_tool(&self, id: Uuid) -> AppResult<Option<Tool>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, {} FROM tools WHERE id = $1",
            Self::TOOL_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get tool: {e}")))?;

        row.as_ref().map(Self::row_to_tool).transpose()
    }

    /// Find a locally registered tool by bare name
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn find_local_tool(&self, name: &str) -> AppResult<Option<Tool>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, {} FROM tools WHERE name = $1 AND gateway_id IS NULL",
            Self::TOOL_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to find local tool: {e}")))?;

        row.as_ref().map(Self::row_to_tool).transpose()
    }

    /// Find a federated tool by its uniqueness key
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn find_gateway_tool(&self, gateway_id: Uuid, name: &str) -> AppResult<Option<Tool>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, {} FROM tools WHERE gateway_id = $1 AND name = $2",
            Self::TOOL_COLUMNS
        ))
        .bind(gateway_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to find gateway tool: {e}")))?;

        row.as_ref().map(Self::row_to_tool).transpose()
    }

    /// All tools, newest first
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_tools(&self) -> AppResult<Vec<Tool>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, {} FROM tools ORDER BY created_at DESC, id DESC",
            Self::TOOL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list tools: {e}")))?;

        rows.iter().map(Self::row_to_tool).collect()
    }

    /// Tools ingested from one gateway
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_tools_for_gateway(&self, gateway_id: Uuid) -> AppResult<Vec<Tool>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, {} FROM tools WHERE gateway_id = $1 ORDER BY name ASC",
            Self::TOOL_COLUMNS
        ))
        .bind(gateway_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list gateway tools: {e}")))?;

        rows.iter().map(Self::row_to_tool).collect()
    }

    fn row_to_tool(row: &SqliteRow) -> AppResult<Tool> {
        let integration: String = row.get("integration_type");
        let request_type: Option<String> = row.get("request_type");
        let output_schema: Option<String> = row.get("output_schema");
        let allowlist: Option<String> = row.get("allowlist");
        Ok(Tool {
            common: row_to_common(row, "tools")?,
            gateway_id: opt_uuid(row, "gateway_id")?,
            integration_type: IntegrationType::parse(&integration)
                .unwrap_or(IntegrationType::Local),
            input_schema: parse_json(row.get("input_schema")),
            output_schema: output_schema
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok()),
            annotations: parse_json(row.get("annotations")),
            request_type: request_type.as_deref().and_then(RequestType::parse),
            base_url: row.get("base_url"),
            path_template: row.get("path_template"),
            query_mapping: parse_json(row.get("query_mapping")),
            header_mapping: parse_json(row.get("header_mapping")),
            timeout_ms: row.get("timeout_ms"),
            idempotent: row.get("idempotent"),
            passthrough_headers: parse_string_vec(row.get("passthrough_headers")),
            allowlist: allowlist
                .as_deref()
                .and_then(|v| serde_json::from_str(v).ok()),
            plugin_chain_pre: parse_string_vec(row.get("plugin_chain_pre")),
            plugin_chain_post: parse_string_vec(row.get("plugin_chain_post")),
        })
    }

    /// Update a tool's mutable fields
    ///
    /// # Errors
    /// Returns `NotFound` if the tool does not exist
    pub async fn update_tool(&self, tool: &Tool) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE tools SET
                name = $1, description = $2, tags = $3, visibility = $4, updated_at = $5,
                integration_type = $6, input_schema = $7, output_schema = $8, annotations = $9,
                request_type = $10, base_url = $11, path_template = $12, query_mapping = $13,
                header_mapping = $14, timeout_ms = $15, idempotent = $16,
                passthrough_headers = $17, allowlist = $18,
                plugin_chain_pre = $19, plugin_chain_post = $20,
                enabled = $21, reachable = $22
            WHERE id = $23
            ",
        )
        .bind(&tool.common.name)
        .bind(&tool.common.description)
        .bind(to_json_text(&tool.common.tags)?)
        .bind(tool.common.visibility.as_str())
        .bind(tool.common.updated_at)
        .bind(tool.integration_type.as_str())
        .bind(to_json_text(&tool.input_schema)?)
        .bind(
            tool.output_schema
                .as_ref()
                .map(to_json_text)
                .transpose()?,
        )
        .bind(to_json_text(&tool.annotations)?)
        .bind(tool.request_type.map(|r| r.as_str()))
        .bind(&tool.base_url)
        .bind(&tool.path_template)
        .bind(to_json_text(&tool.query_mapping)?)
        .bind(to_json_text(&tool.header_mapping)?)
        .bind(tool.timeout_ms)
        .bind(tool.idempotent)
        .bind(to_json_text(&tool.passthrough_headers)?)
        .bind(tool.allowlist.as_ref().map(to_json_text).transpose()?)
        .bind(to_json_text(&tool.plugin_chain_pre)?)
        .bind(to_json_text(&tool.plugin_chain_post)?)
        .bind(tool.common.enabled)
        .bind(tool.common.reachable)
        .bind(tool.common.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update tool: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Tool {}", tool.common.id)));
        }
        Ok(())
    }

    /// Delete a tool
    ///
    /// # Errors
    /// Returns `NotFound` if the tool does not exist
    pub async fn delete_tool(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM tools WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete tool: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Tool {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    /// Insert a resource. Uniqueness: `(team_id, owner_email, uri)`.
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate URI within the owner scope.
    pub async fn insert_resource(&self, resource: &ResourceEntry) -> AppResult<()> {
        let sql = format!(
            r"
            INSERT INTO resources ({COMMON_COLUMNS},
                gateway_id, uri, mime_type, text_content, blob_content)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            "
        );
        let query = sqlx::query(&sql);
        bind_common!(query, resource.common)
            .bind(resource.gateway_id.map(|g| g.to_string()))
            .bind(&resource.uri)
            .bind(&resource.mime_type)
            .bind(&resource.text)
            .bind(&resource.blob)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, EntityKind::Resource, &resource.common.name))?;
        Ok(())
    }

    /// Get a resource by id
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn get_resource(&self, id: Uuid) -> AppResult<Option<ResourceEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, gateway_id, uri, mime_type, text_content, blob_content \
             FROM resources WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get resource: {e}")))?;

        row.as_ref().map(Self::row_to_resource).transpose()
    }

    /// Find a resource by URI across all rows (dispatch path; visibility is
    /// applied by the caller)
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn find_resources_by_uri(&self, uri: &str) -> AppResult<Vec<ResourceEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, gateway_id, uri, mime_type, text_content, blob_content \
             FROM resources WHERE uri = $1"
        ))
        .bind(uri)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to find resources: {e}")))?;

        rows.iter().map(Self::row_to_resource).collect()
    }

    /// All resources, newest first
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_resources(&self) -> AppResult<Vec<ResourceEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, gateway_id, uri, mime_type, text_content, blob_content \
             FROM resources ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list resources: {e}")))?;

        rows.iter().map(Self::row_to_resource).collect()
    }

    fn row_to_resource(row: &SqliteRow) -> AppResult<ResourceEntry> {
        Ok(ResourceEntry {
            common: row_to_common(row, "resources")?,
            gateway_id: opt_uuid(row, "gateway_id")?,
            uri: row.get("uri"),
            mime_type: row.get("mime_type"),
            text: row.get("text_content"),
            blob: row.get("blob_content"),
        })
    }

    /// Update a resource's mutable fields
    ///
    /// # Errors
    /// Returns `NotFound` if the resource does not exist
    pub async fn update_resource(&self, resource: &ResourceEntry) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE resources SET
                name = $1, description = $2, tags = $3, visibility = $4, updated_at = $5,
                uri = $6, mime_type = $7, text_content = $8, blob_content = $9,
                enabled = $10, reachable = $11
            WHERE id = $12
            ",
        )
        .bind(&resource.common.name)
        .bind(&resource.common.description)
        .bind(to_json_text(&resource.common.tags)?)
        .bind(resource.common.visibility.as_str())
        .bind(resource.common.updated_at)
        .bind(&resource.uri)
        .bind(&resource.mime_type)
        .bind(&resource.text)
        .bind(&resource.blob)
        .bind(resource.common.enabled)
        .bind(resource.common.reachable)
        .bind(resource.common.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update resource: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!(
                "Resource {}",
                resource.common.id
            )));
        }
        Ok(())
    }

    /// Delete a resource
    ///
    /// # Errors
    /// Returns `NotFound` if the resource does not exist
    pub async fn delete_resource(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete resource: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Resource {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Prompts
    // -----------------------------------------------------------------------

    /// Insert a prompt. Uniqueness: `(team_id, owner_email, name)`.
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate name within the owner scope.
    pub async fn insert_prompt(&self, prompt: &Prompt) -> AppResult<()> {
        let sql = format!(
            r"
            INSERT INTO prompts ({COMMON_COLUMNS}, gateway_id, template, arguments_schema)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            "
        );
        let query = sqlx::query(&sql);
        bind_common!(query, prompt.common)
            .bind(prompt.gateway_id.map(|g| g.to_string()))
            .bind(&prompt.template)
            .bind(to_json_text(&prompt.arguments_schema)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, EntityKind::Prompt, &prompt.common.name))?;
        Ok(())
    }

    /// Get a prompt by id
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn get_prompt(&self, id: Uuid) -> AppResult<Option<Prompt>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, gateway_id, template, arguments_schema \
             FROM prompts WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get prompt: {e}")))?;

        row.as_ref().map(Self::row_to_prompt).transpose()
    }

    /// Find prompts by name across all rows (fetch path; visibility is
    /// applied by the caller)
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn find_prompts_by_name(&self, name: &str) -> AppResult<Vec<Prompt>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, gateway_id, template, arguments_schema \
             FROM prompts WHERE name = $1"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to find prompts: {e}")))?;

        rows.iter().map(Self::row_to_prompt).collect()
    }

    /// All prompts, newest first
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_prompts(&self) -> AppResult<Vec<Prompt>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, gateway_id, template, arguments_schema \
             FROM prompts ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list prompts: {e}")))?;

        rows.iter().map(Self::row_to_prompt).collect()
    }

    fn row_to_prompt(row: &SqliteRow) -> AppResult<Prompt> {
        Ok(Prompt {
            common: row_to_common(row, "prompts")?,
            gateway_id: opt_uuid(row, "gateway_id")?,
            template: row.get("template"),
            arguments_schema: parse_json(row.get("arguments_schema")),
        })
    }

    /// Update a prompt's mutable fields
    ///
    /// # Errors
    /// Returns `NotFound` if the prompt does not exist
    pub async fn update_prompt(&self, prompt: &Prompt) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE prompts SET
                name = $1, description = $2, tags = $3, visibility = $4, updated_at = $5,
                template = $6, arguments_schema = $7, enabled = $8, reachable = $9
            WHERE id = $10
            ",
        )
        .bind(&prompt.common.name)
        .bind(&prompt.common.description)
        .bind(to_json_text(&prompt.common.tags)?)
        .bind(prompt.common.visibility.as_str())
        .bind(prompt.common.updated_at)
        .bind(&prompt.template)
        .bind(to_json_text(&prompt.arguments_schema)?)
        .bind(prompt.common.enabled)
        .bind(prompt.common.reachable)
        .bind(prompt.common.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update prompt: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Prompt {}", prompt.common.id)));
        }
        Ok(())
    }

    /// Delete a prompt
    ///
    /// # Errors
    /// Returns `NotFound` if the prompt does not exist
    pub async fn delete_prompt(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM prompts WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete prompt: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Prompt {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Virtual servers
    // -----------------------------------------------------------------------

    /// Insert a virtual server. Uniqueness: `(team_id, owner_email, name)`.
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate name within the owner scope.
    pub async fn insert_server(&self, server: &VirtualServer) -> AppResult<()> {
        let sql = format!(
            r"
            INSERT INTO servers ({COMMON_COLUMNS},
                icon, associated_tools, associated_resources,
                associated_prompts, associated_a2a_agents)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            "
        );
        let query = sqlx::query(&sql);
        bind_common!(query, server.common)
            .bind(&server.icon)
            .bind(uuids_to_json_text(&server.associated_tools)?)
            .bind(uuids_to_json_text(&server.associated_resources)?)
            .bind(uuids_to_json_text(&server.associated_prompts)?)
            .bind(uuids_to_json_text(&server.associated_a2a_agents)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, EntityKind::Server, &server.common.name))?;
        Ok(())
    }

    /// Get a virtual server by id
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn get_server(&self, id: Uuid) -> AppResult<Option<VirtualServer>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, icon, associated_tools, associated_resources, \
             associated_prompts, associated_a2a_agents FROM servers WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get server: {e}")))?;

        row.as_ref().map(Self::row_to_server).transpose()
    }

    /// All virtual servers, newest first
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_servers(&self) -> AppResult<Vec<VirtualServer>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, icon, associated_tools, associated_resources, \
             associated_prompts, associated_a2a_agents \
             FROM servers ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list servers: {e}")))?;

        rows.iter().map(Self::row_to_server).collect()
    }

    fn row_to_server(row: &SqliteRow) -> AppResult<VirtualServer> {
        Ok(VirtualServer {
            common: row_to_common(row, "servers")?,
            icon: row.get("icon"),
            associated_tools: parse_uuid_vec(row.get("associated_tools")),
            associated_resources: parse_uuid_vec(row.get("associated_resources")),
            associated_prompts: parse_uuid_vec(row.get("associated_prompts")),
            associated_a2a_agents: parse_uuid_vec(row.get("associated_a2a_agents")),
        })
    }

    /// Update a virtual server's mutable fields
    ///
    /// # Errors
    /// Returns `NotFound` if the server does not exist
    pub async fn update_server(&self, server: &VirtualServer) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE servers SET
                name = $1, description = $2, tags = $3, visibility = $4, updated_at = $5,
                icon = $6, associated_tools = $7, associated_resources = $8,
                associated_prompts = $9, associated_a2a_agents = $10,
                enabled = $11, reachable = $12
            WHERE id = $13
            ",
        )
        .bind(&server.common.name)
        .bind(&server.common.description)
        .bind(to_json_text(&server.common.tags)?)
        .bind(server.common.visibility.as_str())
        .bind(server.common.updated_at)
        .bind(&server.icon)
        .bind(uuids_to_json_text(&server.associated_tools)?)
        .bind(uuids_to_json_text(&server.associated_resources)?)
        .bind(uuids_to_json_text(&server.associated_prompts)?)
        .bind(uuids_to_json_text(&server.associated_a2a_agents)?)
        .bind(server.common.enabled)
        .bind(server.common.reachable)
        .bind(server.common.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update server: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Server {}", server.common.id)));
        }
        Ok(())
    }

    /// Delete a virtual server
    ///
    /// # Errors
    /// Returns `NotFound` if the server does not exist
    pub async fn delete_server(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete server: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Server {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // A2A agents
    // -----------------------------------------------------------------------

    /// Insert an A2A agent. Uniqueness: `(team_id, owner_email, slug)`.
    ///
    /// # Errors
    /// Returns `Conflict` on a duplicate slug within the owner scope.
    pub async fn insert_a2a_agent(&self, agent: &A2aAgent) -> AppResult<()> {
        let sql = format!(
            r"
            INSERT INTO a2a_agents ({COMMON_COLUMNS},
                endpoint, protocol_version, auth_type, auth_value, slug)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            "
        );
        let query = sqlx::query(&sql);
        bind_common!(query, agent.common)
            .bind(&agent.endpoint)
            .bind(&agent.protocol_version)
            .bind(agent.auth_type.map(|a| a.as_str()))
            .bind(&agent.auth_value_encrypted)
            .bind(&agent.slug)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, EntityKind::A2aAgent, &agent.common.name))?;
        Ok(())
    }

    /// Get an A2A agent by id
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn get_a2a_agent(&self, id: Uuid) -> AppResult<Option<A2aAgent>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, endpoint, protocol_version, auth_type, auth_value, slug \
             FROM a2a_agents WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get A2A agent: {e}")))?;

        row.as_ref().map(Self::row_to_a2a_agent).transpose()
    }

    /// All A2A agents, newest first
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list_a2a_agents(&self) -> AppResult<Vec<A2aAgent>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMON_COLUMNS}, endpoint, protocol_version, auth_type, auth_value, slug \
             FROM a2a_agents ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list A2A agents: {e}")))?;

        rows.iter().map(Self::row_to_a2a_agent).collect()
    }

    fn row_to_a2a_agent(row: &SqliteRow) -> AppResult<A2aAgent> {
        let auth_type: Option<String> = row.get("auth_type");
        Ok(A2aAgent {
            common: row_to_common(row, "a2a_agents")?,
            endpoint: row.get("endpoint"),
            protocol_version: row.get("protocol_version"),
            auth_type: auth_type.as_deref().and_then(AuthScheme::parse),
            auth_value_encrypted: row.get("auth_value"),
            slug: row.get("slug"),
        })
    }

    /// Update an A2A agent's mutable fields
    ///
    /// # Errors
    /// Returns `NotFound` if the agent does not exist
    pub async fn update_a2a_agent(&self, agent: &A2aAgent) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE a2a_agents SET
                name = $1, description = $2, tags = $3, visibility = $4, updated_at = $5,
                endpoint = $6, protocol_version = $7, auth_type = $8, auth_value = $9,
                slug = $10, enabled = $11, reachable = $12
            WHERE id = $13
            ",
        )
        .bind(&agent.common.name)
        .bind(&agent.common.description)
        .bind(to_json_text(&agent.common.tags)?)
        .bind(agent.common.visibility.as_str())
        .bind(agent.common.updated_at)
        .bind(&agent.endpoint)
        .bind(&agent.protocol_version)
        .bind(agent.auth_type.map(|a| a.as_str()))
        .bind(&agent.auth_value_encrypted)
        .bind(&agent.slug)
        .bind(agent.common.enabled)
        .bind(agent.common.reachable)
        .bind(agent.common.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update A2A agent: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("A2A agent {}", agent.common.id)));
        }
        Ok(())
    }

    /// Delete an A2A agent
    ///
    /// # Errors
    /// Returns `NotFound` if the agent does not exist
    pub async fn delete_a2a_agent(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM a2a_agents WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete A2A agent: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("A2A agent {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Kind-generic operations
    // -----------------------------------------------------------------------

    /// Toggle operator intent for any catalog entity
    ///
    /// # Errors
    /// Returns `NotFound` if the entity does not exist
    pub async fn set_entity_enabled(
        &self,
        kind: EntityKind,
        id: Uuid,
        enabled: bool,
    ) -> AppResult<()> {
        // Table name comes from the EntityKind enum, never from input
        let sql = format!("UPDATE {} SET enabled = $1 WHERE id = $2", kind.table());
        let result = sqlx::query(&sql)
            .bind(enabled)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to set enabled: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("{} {id}", kind.display())));
        }
        Ok(())
    }

    /// Record a health probe outcome for any catalog entity
    ///
    /// # Errors
    /// Returns an error if the database update fails
    pub async fn set_entity_reachable(
        &self,
        kind: EntityKind,
        id: Uuid,
        reachable: bool,
    ) -> AppResult<()> {
        let sql = format!("UPDATE {} SET reachable = $1 WHERE id = $2", kind.table());
        sqlx::query(&sql)
            .bind(reachable)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to set reachable: {e}")))?;
        Ok(())
    }

    /// Row count for a kind, used to pick the pagination strategy
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn count_entities(&self, kind: EntityKind) -> AppResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count entities: {e}")))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Propagate a gateway probe outcome to every entity it provides
    ///
    /// # Errors
    /// Returns an error if the database update fails
    pub async fn set_gateway_entities_reachable(
        &self,
        gateway_id: Uuid,
        reachable: bool,
    ) -> AppResult<()> {
        for table in ["tools", "resources", "prompts"] {
            let sql = format!("UPDATE {table} SET reachable = $1 WHERE gateway_id = $2");
            sqlx::query(&sql)
                .bind(reachable)
                .bind(gateway_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::database(format!("Failed to propagate reachability: {e}"))
                })?;
        }
        Ok(())
    }

    /// Disable federated entities that vanished from the peer's catalog.
    /// Rows are kept (not deleted) so references stay resolvable until the
    /// grace-period cleanup. Returns the number of rows disabled.
    ///
    /// # Errors
    /// Returns an error if the database update fails
    pub async fn disable_federated_entities_not_in(
        &self,
        kind: EntityKind,
        gateway_id: Uuid,
        keep_names: &[String],
    ) -> AppResult<u64> {
        let keep_json = to_json_text(&keep_names)?;
        let sql = format!(
            r"
            UPDATE {} SET enabled = 0
            WHERE gateway_id = $1
              AND name NOT IN (SELECT value FROM json_each($2))
              AND enabled = 1
            ",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(gateway_id.to_string())
            .bind(keep_json)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to disable removed entities: {e}")))?;
        Ok(result.rows_affected())
    }
}
