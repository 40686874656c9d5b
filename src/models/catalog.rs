// ABOUTME: Catalog entity records: gateways, tools, resources, prompts, servers, agents
// ABOUTME: All six kinds embed the shared CatalogCommon ownership block
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::{AuthScheme, Visibility};
use crate::constants::protocol::QUALIFIED_NAME_SEPARATOR;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The six catalog entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Invocable capability
    Tool,
    /// Readable content addressed by URI
    Resource,
    /// Parameterized template
    Prompt,
    /// Virtual server bundle
    Server,
    /// Peer gateway
    Gateway,
    /// External agent endpoint
    A2aAgent,
}

impl EntityKind {
    /// Table name backing this kind
    #[must_use]
    pub const fn table(&self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Resource => "resources",
            Self::Prompt => "prompts",
            Self::Server => "servers",
            Self::Gateway => "gateways",
            Self::A2aAgent => "a2a_agents",
        }
    }

    /// Singular display name
    #[must_use]
    pub const fn display(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
            Self::Server => "server",
            Self::Gateway => "gateway",
            Self::A2aAgent => "a2a agent",
        }
    }
}

/// How an entity entered the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedVia {
    /// Admin REST API
    Api,
    /// Admin UI
    Ui,
    /// Bulk import endpoint
    BulkImport,
    /// Federation catalog pull; read-only provenance
    Federation,
}

impl CreatedVia {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Ui => "ui",
            Self::BulkImport => "bulk_import",
            Self::Federation => "federation",
        }
    }

    /// Parse the persisted form, defaulting unknown values to api
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "ui" => Self::Ui,
            "bulk_import" => Self::BulkImport,
            "federation" => Self::Federation,
            _ => Self::Api,
        }
    }
}

/// Transport a peer gateway is reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Legacy SSE (GET stream + POST endpoint)
    Sse,
    /// Streamable HTTP (single endpoint)
    StreamableHttp,
}

impl TransportKind {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::StreamableHttp => "streamablehttp",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sse" => Some(Self::Sse),
            "streamablehttp" => Some(Self::StreamableHttp),
            _ => None,
        }
    }
}

/// How a tool call is carried to its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationType {
    /// In-process JSON-RPC handler
    Local,
    /// HTTP request built from the tool's REST template
    Rest,
    /// gRPC upstream (registered but dispatched through the REST adapter contract)
    Grpc,
    /// Message to an A2A agent endpoint
    A2a,
    /// Forwarded to a peer gateway
    Federated,
}

impl IntegrationType {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Rest => "rest",
            Self::Grpc => "grpc",
            Self::A2a => "a2a",
            Self::Federated => "federated",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "rest" => Some(Self::Rest),
            "grpc" => Some(Self::Grpc),
            "a2a" => Some(Self::A2a),
            "federated" => Some(Self::Federated),
            _ => None,
        }
    }
}

/// HTTP verb for REST-integrated tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestType {
    /// GET — idempotent by definition
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl RequestType {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PATCH" => Some(Self::Patch),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Whether the verb is idempotent by HTTP semantics
    #[must_use]
    pub const fn is_idempotent_verb(&self) -> bool {
        matches!(self, Self::Get | Self::Put | Self::Delete)
    }
}

/// Ownership, visibility, and lifecycle block shared by all catalog entities.
///
/// `enabled` reflects operator intent; `reachable` reflects the most recent
/// health probe. A disabled entity is hidden from dispatch; an unreachable
/// but enabled entity dispatches with a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCommon {
    /// Primary key
    pub id: Uuid,
    /// Entity name; uniqueness rules are per-kind
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Owning team
    pub team_id: Uuid,
    /// Owning account
    pub owner_email: String,
    /// Access classification
    pub visibility: Visibility,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Account that created the entity
    pub created_by: String,
    /// Provenance channel
    pub created_via: CreatedVia,
    /// Operator intent
    pub enabled: bool,
    /// Most recent health probe outcome
    pub reachable: bool,
}

impl CatalogCommon {
    /// Build a fresh common block owned by `owner_email` in `team_id`
    #[must_use]
    pub fn new(
        name: String,
        team_id: Uuid,
        owner_email: String,
        visibility: Visibility,
        created_via: CreatedVia,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            description: None,
            tags: Vec::new(),
            team_id,
            owner_email: owner_email.clone(),
            visibility,
            created_at: now,
            updated_at: now,
            created_by: owner_email,
            created_via,
            enabled: true,
            reachable: true,
        }
    }

    /// Whether clients may edit this entity. Federation-origin entities are
    /// refreshed on catalog sync and are read-only to clients.
    #[must_use]
    pub const fn is_client_editable(&self) -> bool {
        !matches!(self.created_via, CreatedVia::Federation)
    }
}

/// Accessors every catalog entity provides
pub trait CatalogEntity {
    /// The shared ownership block
    fn common(&self) -> &CatalogCommon;
    /// Mutable access to the shared block
    fn common_mut(&mut self) -> &mut CatalogCommon;
    /// The entity kind
    fn kind(&self) -> EntityKind;
}

macro_rules! impl_catalog_entity {
    ($ty:ident, $kind:expr) => {
        impl CatalogEntity for $ty {
            fn common(&self) -> &CatalogCommon {
                &self.common
            }
            fn common_mut(&mut self) -> &mut CatalogCommon {
                &mut self.common
            }
            fn kind(&self) -> EntityKind {
                $kind
            }
        }
    };
}

/// A registered peer gateway. Uniqueness: `(team_id, url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    /// Shared block
    #[serde(flatten)]
    pub common: CatalogCommon,
    /// Peer MCP endpoint URL
    pub url: String,
    /// Transport used toward the peer
    pub transport: TransportKind,
    /// Upstream auth scheme
    pub auth_type: Option<AuthScheme>,
    /// Encrypted credential blob; plaintext never leaves the vault boundary
    #[serde(skip_serializing)]
    pub auth_value_encrypted: Option<String>,
    /// Capabilities captured at handshake
    pub capabilities: Value,
    /// Gateway ids the peer reports reaching, used for loop detection
    pub peer_gateway_ids: Vec<String>,
}

impl_catalog_entity!(Gateway, EntityKind::Gateway);

/// A registered tool. Uniqueness: `(gateway_id, name)`.
///
/// Exactly one of the two provenances holds: `gateway_id` present means the
/// tool was ingested from a federation peer; absent means it is locally
/// registered (LOCAL/REST/GRPC/A2A integration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Shared block
    #[serde(flatten)]
    pub common: CatalogCommon,
    /// Owning peer when federated
    pub gateway_id: Option<Uuid>,
    /// Carrier for invocations
    pub integration_type: IntegrationType,
    /// JSON Schema for call arguments
    pub input_schema: Value,
    /// JSON Schema for results, when declared
    pub output_schema: Option<Value>,
    /// MCP tool annotations
    pub annotations: Value,
    /// HTTP verb for REST tools
    pub request_type: Option<RequestType>,
    /// Base URL for REST tools
    pub base_url: Option<String>,
    /// Path template with `{name}` placeholders
    pub path_template: Option<String>,
    /// argument name -> query parameter name
    pub query_mapping: Value,
    /// argument name -> outbound header name
    pub header_mapping: Value,
    /// Invocation timeout in milliseconds
    pub timeout_ms: i64,
    /// Whether non-GET invocations may be retried
    pub idempotent: bool,
    /// Inbound headers forwarded upstream
    pub passthrough_headers: Vec<String>,
    /// Allowed upstream hosts; `None` means no restriction
    pub allowlist: Option<Vec<String>>,
    /// Plugin names pinned to run before invocation
    pub plugin_chain_pre: Vec<String>,
    /// Plugin names pinned to run after invocation
    pub plugin_chain_post: Vec<String>,
}

impl_catalog_entity!(Tool, EntityKind::Tool);

impl Tool {
    /// Display name: `gateway-name<sep>tool-name` for federated tools,
    /// the bare name otherwise. The uniqueness key stays `(gateway_id, name)`.
    #[must_use]
    pub fn qualified_name(&self, gateway_name: Option<&str>) -> String {
        match (self.gateway_id, gateway_name) {
            (Some(_), Some(prefix)) => {
                format!("{prefix}{QUALIFIED_NAME_SEPARATOR}{}", self.common.name)
            }
            _ => self.common.name.clone(),
        }
    }
}

/// A readable resource. Uniqueness: `(team_id, owner_email, uri)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Shared block
    #[serde(flatten)]
    pub common: CatalogCommon,
    /// Owning peer when ingested through federation
    pub gateway_id: Option<Uuid>,
    /// Resource URI
    pub uri: String,
    /// MIME type
    pub mime_type: String,
    /// Inline text content
    pub text: Option<String>,
    /// Inline binary content
    pub blob: Option<Vec<u8>>,
}

impl_catalog_entity!(ResourceEntry, EntityKind::Resource);

/// A prompt template. Uniqueness: `(team_id, owner_email, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Shared block
    #[serde(flatten)]
    pub common: CatalogCommon,
    /// Owning peer when ingested through federation
    pub gateway_id: Option<Uuid>,
    /// Template body with `{{argument}}` placeholders
    pub template: String,
    /// JSON Schema describing the arguments
    pub arguments_schema: Value,
}

impl_catalog_entity!(Prompt, EntityKind::Prompt);

/// A virtual server: a named bundle of catalog entries exposed as one MCP
/// endpoint. Uniqueness: `(team_id, owner_email, name)`. Associations are
/// stored by id only and resolved on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualServer {
    /// Shared block
    #[serde(flatten)]
    pub common: CatalogCommon,
    /// Optional icon URL
    pub icon: Option<String>,
    /// Bundled tools
    pub associated_tools: Vec<Uuid>,
    /// Bundled resources
    pub associated_resources: Vec<Uuid>,
    /// Bundled prompts
    pub associated_prompts: Vec<Uuid>,
    /// Bundled A2A agents
    pub associated_a2a_agents: Vec<Uuid>,
}

impl_catalog_entity!(VirtualServer, EntityKind::Server);

/// An external agent registered as a tool surface.
/// Uniqueness: `(team_id, owner_email, slug)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aAgent {
    /// Shared block
    #[serde(flatten)]
    pub common: CatalogCommon,
    /// Agent endpoint URL
    pub endpoint: String,
    /// Declared protocol version
    pub protocol_version: String,
    /// Upstream auth scheme
    pub auth_type: Option<AuthScheme>,
    /// Encrypted credential blob
    #[serde(skip_serializing)]
    pub auth_value_encrypted: Option<String>,
    /// URL-safe identifier
    pub slug: String,
}

impl_catalog_entity!(A2aAgent, EntityKind::A2aAgent);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn tool(gateway_id: Option<Uuid>) -> Tool {
        Tool {
            common: CatalogCommon::new(
                "search".to_owned(),
                Uuid::new_v4(),
                "a@example.com".to_owned(),
                Visibility::Team,
                CreatedVia::Api,
            ),
            gateway_id,
            integration_type: IntegrationType::Rest,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: Value::Null,
            request_type: Some(RequestType::Get),
            base_url: None,
            path_template: None,
            query_mapping: Value::Null,
            header_mapping: Value::Null,
            timeout_ms: 20_000,
            idempotent: false,
            passthrough_headers: Vec::new(),
            allowlist: None,
            plugin_chain_pre: Vec::new(),
            plugin_chain_post: Vec::new(),
        }
    }

    #[test]
    fn qualified_name_prefixes_federated_tools() {
        let local = tool(None);
        assert_eq!(local.qualified_name(None), "search");

        let federated = tool(Some(Uuid::new_v4()));
        assert_eq!(federated.qualified_name(Some("peer-a")), "peer-a-search");
    }

    #[test]
    fn federation_entities_are_read_only() {
        let mut common = CatalogCommon::new(
            "g".to_owned(),
            Uuid::new_v4(),
            "a@example.com".to_owned(),
            Visibility::Public,
            CreatedVia::Federation,
        );
        assert!(!common.is_client_editable());
        common.created_via = CreatedVia::Api;
        assert!(common.is_client_editable());
    }

    #[test]
    fn idempotent_verbs() {
        assert!(RequestType::Get.is_idempotent_verb());
        assert!(RequestType::Put.is_idempotent_verb());
        assert!(!RequestType::Post.is_idempotent_verb());
    }
}
