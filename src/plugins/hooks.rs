// ABOUTME: Hook taxonomy, typed payloads, and the HookResult contract
// ABOUTME: Violations and elicitations are result variants, never exceptions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Plugin Hooks
//!
//! Every extension point in the request lifecycle is a [`HookPoint`]. A
//! plugin receives a typed [`HookPayload`] plus the shared [`HookContext`]
//! and returns a [`HookResult`] — a plain value whose variants (continue,
//! mutate, violation, elicitation) the executor inspects. Policy is never
//! decided by catching errors.

use crate::models::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Every hook the framework can invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    /// Before a prompt template is fetched/rendered
    PromptPreFetch,
    /// After a prompt is rendered, before it returns to the client
    PromptPostFetch,
    /// Before a tool call dispatches upstream
    ToolPreInvoke,
    /// After a tool result arrives, before it returns to the client
    ToolPostInvoke,
    /// Before a resource read
    ResourcePreFetch,
    /// After a resource read
    ResourcePostFetch,
    /// Before an A2A agent invocation
    AgentPreInvoke,
    /// After an A2A agent invocation
    AgentPostInvoke,
    /// First stage of the HTTP pipeline
    HttpPreRequest,
    /// May resolve the user, short-circuiting built-in auth
    HttpAuthResolveUser,
    /// May veto access, short-circuiting built-in RBAC
    HttpAuthCheckPermission,
    /// Last stage of the HTTP pipeline
    HttpPostRequest,
    /// Admin hooks around virtual-server lifecycle
    ServerPreRegister,
    /// After a virtual server is persisted
    ServerPostRegister,
    /// Before a virtual-server update
    ServerPreUpdate,
    /// After a virtual-server update
    ServerPostUpdate,
    /// Before a virtual-server delete
    ServerPreDelete,
    /// After a virtual-server delete
    ServerPostDelete,
    /// Before a virtual-server enable/disable flip
    ServerPreStatusChange,
    /// After a virtual-server enable/disable flip
    ServerPostStatusChange,
    /// Admin hooks around gateway lifecycle
    GatewayPreRegister,
    /// After a gateway is persisted
    GatewayPostRegister,
    /// Before a gateway update
    GatewayPreUpdate,
    /// After a gateway update
    GatewayPostUpdate,
    /// Before a gateway delete
    GatewayPreDelete,
    /// After a gateway delete
    GatewayPostDelete,
    /// Before a gateway enable/disable flip
    GatewayPreStatusChange,
    /// After a gateway enable/disable flip
    GatewayPostStatusChange,
}

impl HookPoint {
    /// Whether this is a pre-variant hook (eligible for short-circuit and
    /// elicitation)
    #[must_use]
    pub const fn is_pre(&self) -> bool {
        matches!(
            self,
            Self::PromptPreFetch
                | Self::ToolPreInvoke
                | Self::ResourcePreFetch
                | Self::AgentPreInvoke
                | Self::HttpPreRequest
                | Self::HttpAuthResolveUser
                | Self::HttpAuthCheckPermission
                | Self::ServerPreRegister
                | Self::ServerPreUpdate
                | Self::ServerPreDelete
                | Self::ServerPreStatusChange
                | Self::GatewayPreRegister
                | Self::GatewayPreUpdate
                | Self::GatewayPreDelete
                | Self::GatewayPreStatusChange
        )
    }
}

/// Typed payload handed to a hook. A tagged union rather than a free-form
/// dictionary so plugins cannot silently disagree about shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HookPayload {
    /// A tool call about to dispatch
    ToolCall {
        /// Tool name as the client called it
        name: String,
        /// Call arguments
        arguments: Value,
    },
    /// A tool result about to return
    ToolResult {
        /// Tool name
        name: String,
        /// Upstream result
        result: Value,
    },
    /// A prompt about to render
    PromptFetch {
        /// Prompt name
        name: String,
        /// Supplied arguments
        arguments: Value,
    },
    /// A rendered prompt about to return
    PromptRendered {
        /// Prompt name
        name: String,
        /// Rendered text
        text: String,
    },
    /// A resource about to be read
    ResourceFetch {
        /// Resource URI
        uri: String,
    },
    /// Resource content about to return
    ResourceContent {
        /// Resource URI
        uri: String,
        /// Content (text or base64 blob)
        content: Value,
    },
    /// An A2A agent message about to send
    AgentInvoke {
        /// Agent slug
        slug: String,
        /// Outbound message
        message: Value,
    },
    /// An A2A agent reply about to return
    AgentResult {
        /// Agent slug
        slug: String,
        /// Agent reply
        result: Value,
    },
    /// An HTTP request in the admin pipeline
    HttpRequest {
        /// Method
        method: String,
        /// Path
        path: String,
        /// Selected headers (sensitive values already stripped)
        headers: HashMap<String, String>,
        /// Resolved user, populated by `http_auth_resolve_user`
        user: Option<String>,
    },
    /// An admin operation on a catalog entity
    AdminEntity {
        /// Entity kind
        entity_kind: EntityKind,
        /// The entity being registered/updated/deleted, as JSON
        entity: Value,
    },
    /// An enable/disable flip
    StatusChange {
        /// Entity kind
        entity_kind: EntityKind,
        /// Entity id
        id: Uuid,
        /// The new intent
        enabled: bool,
    },
}

impl HookPayload {
    /// The tool/prompt/agent name this payload targets, for condition matching
    #[must_use]
    pub fn target_name(&self) -> Option<&str> {
        match self {
            Self::ToolCall { name, .. }
            | Self::ToolResult { name, .. }
            | Self::PromptFetch { name, .. }
            | Self::PromptRendered { name, .. } => Some(name),
            Self::AgentInvoke { slug, .. } | Self::AgentResult { slug, .. } => Some(slug),
            _ => None,
        }
    }
}

/// A declared policy violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Stable machine-readable code
    pub code: String,
    /// Short reason
    pub reason: String,
    /// Longer, possibly localized description
    pub description: String,
}

/// A request for structured client input, relayed as `elicitation/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationRequest {
    /// Message shown to the user
    pub message: String,
    /// JSON Schema for the requested data
    pub schema: Value,
    /// Seconds to wait before failing closed; `None` uses the global default
    pub timeout_secs: Option<u64>,
}

/// The client's answer to an elicitation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ElicitationResponse {
    /// Accepted with the collected data
    Accept {
        /// Data matching the requested schema
        data: Value,
    },
    /// Explicitly declined
    Decline,
    /// Cancelled (dialog dismissed, disconnect)
    Cancel,
}

/// What a hook invocation produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResult {
    /// False halts the chain without a violation (rare; prefer violations)
    #[serde(default = "default_true")]
    pub continue_processing: bool,
    /// Replacement payload for downstream plugins and the pipeline
    #[serde(default)]
    pub modified_payload: Option<HookPayload>,
    /// Declared violation; blocking per mode
    #[serde(default)]
    pub violation: Option<Violation>,
    /// Request for client input; pre-hooks only
    #[serde(default)]
    pub elicitation_request: Option<ElicitationRequest>,
    /// Metadata merged into the request context
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

const fn default_true() -> bool {
    true
}

impl HookResult {
    /// Pass through unchanged
    #[must_use]
    pub fn ok() -> Self {
        Self {
            continue_processing: true,
            ..Self::default()
        }
    }

    /// Replace the payload
    #[must_use]
    pub fn modify(payload: HookPayload) -> Self {
        Self {
            continue_processing: true,
            modified_payload: Some(payload),
            ..Self::default()
        }
    }

    /// Declare a violation
    #[must_use]
    pub fn block(violation: Violation) -> Self {
        Self {
            continue_processing: false,
            violation: Some(violation),
            ..Self::default()
        }
    }

    /// Ask the client for input before deciding
    #[must_use]
    pub fn elicit(request: ElicitationRequest) -> Self {
        Self {
            continue_processing: false,
            elicitation_request: Some(request),
            ..Self::default()
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Shared context for every hook of one request
#[derive(Clone)]
pub struct HookContext {
    /// Process-unique request id
    pub request_id: String,
    /// Client session, when the request arrived over a session transport
    pub session_id: Option<String>,
    /// Authenticated user
    pub user: Option<String>,
    /// Active team scope
    pub team_id: Option<Uuid>,
    /// Virtual server the session is bound to
    pub server_id: Option<Uuid>,
    /// State shared across hooks of the same request
    pub state: Arc<Mutex<Map<String, Value>>>,
    /// Metadata accumulated from hook results
    pub metadata: Arc<Mutex<Map<String, Value>>>,
    /// Elicitation responses keyed by plugin name, injected on re-invocation
    pub elicitation_responses: Arc<Mutex<HashMap<String, ElicitationResponse>>>,
}

impl HookContext {
    /// Fresh context for a request
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            user: None,
            team_id: None,
            server_id: None,
            state: Arc::new(Mutex::new(Map::new())),
            metadata: Arc::new(Mutex::new(Map::new())),
            elicitation_responses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach the session id
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the authenticated user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// The elicitation response previously collected for `plugin`, if any
    pub async fn elicitation_response(&self, plugin: &str) -> Option<ElicitationResponse> {
        self.elicitation_responses.lock().await.get(plugin).cloned()
    }
}

/// The interface every in-process plugin implements. Plugins publish the
/// hooks they serve; the framework enumerates and orders them.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name, referenced by manifests and tool chains
    fn name(&self) -> &str;

    /// The hook points this plugin serves
    fn hooks(&self) -> &[HookPoint];

    /// Handle one hook invocation
    ///
    /// # Errors
    /// Unexpected failures return an error; policy outcomes (violations,
    /// elicitations) are `Ok` results.
    async fn handle(
        &self,
        hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
    ) -> crate::errors::AppResult<HookResult>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn pre_hook_classification() {
        assert!(HookPoint::ToolPreInvoke.is_pre());
        assert!(HookPoint::GatewayPreRegister.is_pre());
        assert!(!HookPoint::ToolPostInvoke.is_pre());
        assert!(!HookPoint::ServerPostRegister.is_pre());
    }

    #[test]
    fn payload_target_names() {
        let call = HookPayload::ToolCall {
            name: "search".to_owned(),
            arguments: Value::Null,
        };
        assert_eq!(call.target_name(), Some("search"));

        let http = HookPayload::HttpRequest {
            method: "GET".to_owned(),
            path: "/tools".to_owned(),
            headers: HashMap::new(),
            user: None,
        };
        assert_eq!(http.target_name(), None);
    }

    #[test]
    fn hook_result_serde_defaults() {
        let parsed: HookResult = serde_json::from_str("{}").unwrap();
        assert!(parsed.continue_processing);
        assert!(parsed.violation.is_none());
    }
}
