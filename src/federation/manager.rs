// ABOUTME: Federation manager: peer registration, loop detection, catalog sync
// ABOUTME: Federated entities carry read-only provenance and survive peer churn disabled
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Federation Manager
//!
//! Registration runs the full sequence: gateway pre-register hook →
//! handshake → transitive loop detection → persist → catalog pull →
//! post-register hook. Catalog sync reconciles against the peer's current
//! listings; entities that vanished upstream are disabled rather than
//! deleted so references stay resolvable until the grace-period cleanup.

use super::client::{FederationClient, PeerHandshake};
use crate::constants::violation_codes;
use crate::crypto::{SecretString, SecretVault};
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    CatalogCommon, CreatedVia, EntityKind, Gateway, IntegrationType, Prompt, ResourceEntry, Tool,
    TransportKind, Visibility,
};
use crate::models::AuthScheme;
use crate::permissions::IdentityContext;
use crate::plugins::{
    ElicitationTransport, HookContext, HookPayload, HookPoint, PluginExecutor,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Registration request for a new peer
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRegistration {
    /// Display name; becomes the qualified-name prefix
    pub name: String,
    /// Peer MCP endpoint
    pub url: String,
    /// Transport toward the peer
    pub transport: TransportKind,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Visibility of the gateway and its ingested entities
    #[serde(default)]
    pub visibility: Option<Visibility>,
    /// Team scope
    pub team_id: Uuid,
    /// Upstream auth scheme
    #[serde(default)]
    pub auth_type: Option<AuthScheme>,
    /// Upstream credential (plaintext on the wire, encrypted at rest)
    #[serde(default)]
    pub auth_value: Option<String>,
}

/// Registers peers and keeps their catalogs in sync
pub struct FederationManager {
    db: Database,
    client: Arc<FederationClient>,
    vault: Arc<SecretVault>,
    plugins: Arc<PluginExecutor>,
    /// This gateway's own federation identity, advertised to peers
    own_gateway_id: String,
}

impl FederationManager {
    /// Assemble the manager
    #[must_use]
    pub fn new(
        db: Database,
        client: Arc<FederationClient>,
        vault: Arc<SecretVault>,
        plugins: Arc<PluginExecutor>,
        own_gateway_id: String,
    ) -> Self {
        Self {
            db,
            client,
            vault,
            plugins,
            own_gateway_id,
        }
    }

    /// The federation identity advertised in our initialize responses
    #[must_use]
    pub fn own_gateway_id(&self) -> &str {
        &self.own_gateway_id
    }

    /// The reachability set we advertise: our id plus every registered peer's
    /// reported set
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn advertised_gateway_ids(&self) -> AppResult<Vec<String>> {
        let mut ids = vec![self.own_gateway_id.clone()];
        for gateway in self.db.list_gateways().await? {
            for id in gateway.peer_gateway_ids {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Register a peer gateway end to end
    ///
    /// # Errors
    /// Returns `Conflict` with `FEDERATION_LOOP_DETECTED` when the peer
    /// transitively reaches back to this gateway, `Conflict` on a duplicate
    /// URL, `UpstreamError` when the handshake fails.
    pub async fn register_gateway(
        &self,
        identity: &IdentityContext,
        registration: GatewayRegistration,
        hook_context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<Gateway> {
        if self
            .db
            .get_gateway_by_url(registration.team_id, &registration.url)
            .await?
            .is_some()
        {
            return Err(AppError::conflict(format!(
                "Gateway URL {} is already registered in this team",
                registration.url
            )));
        }

        let mut gateway = self.build_gateway(identity, &registration)?;

        let payload = HookPayload::AdminEntity {
            entity_kind: EntityKind::Gateway,
            entity: serde_json::to_value(&gateway)?,
        };
        self.plugins
            .run_hook(
                HookPoint::GatewayPreRegister,
                payload.clone(),
                hook_context,
                elicitor,
            )
            .await?;

        // Handshake: capture capabilities and the peer's reachability set
        let handshake = self.client.initialize(&gateway).await?;
        self.detect_loop(&handshake)?;

        gateway.capabilities = handshake.capabilities.clone();
        gateway.peer_gateway_ids = handshake.reachable_gateway_ids.clone();
        self.db.insert_gateway(&gateway).await?;

        // Catalog pull; a partial failure leaves the gateway registered and
        // is repaired by the next periodic sync
        if let Err(e) = self.sync_gateway(&gateway).await {
            warn!(gateway = %gateway.common.name, error = %e, "Initial catalog pull incomplete");
        }

        self.plugins
            .run_hook(HookPoint::GatewayPostRegister, payload, hook_context, None)
            .await?;

        info!(
            gateway = %gateway.common.name,
            url = %gateway.url,
            "Peer gateway registered"
        );
        Ok(gateway)
    }

    fn build_gateway(
        &self,
        identity: &IdentityContext,
        registration: &GatewayRegistration,
    ) -> AppResult<Gateway> {
        let auth_value_encrypted = registration
            .auth_value
            .as_ref()
            .map(|plain| self.vault.encrypt(&SecretString::new(plain.clone())))
            .transpose()?;

        Ok(Gateway {
            common: CatalogCommon::new(
                registration.name.clone(),
                registration.team_id,
                identity.email.clone(),
                registration.visibility.unwrap_or(Visibility::Team),
                CreatedVia::Api,
            ),
            url: registration.url.clone(),
            transport: registration.transport,
            auth_type: registration.auth_type,
            auth_value_encrypted,
            capabilities: Value::Null,
            peer_gateway_ids: Vec::new(),
        })
    }

    fn detect_loop(&self, handshake: &PeerHandshake) -> AppResult<()> {
        if handshake
            .reachable_gateway_ids
            .iter()
            .any(|id| *id == self.own_gateway_id)
        {
            // Dependency violation, not a plugin policy: Conflict per taxonomy
            return Err(AppError::conflict(format!(
                "{}: peer transitively federates back to this gateway",
                violation_codes::FEDERATION_LOOP_DETECTED
            )));
        }
        Ok(())
    }

    /// Pull the peer's catalog and reconcile local federated entities:
    /// upsert what the peer lists, disable what it no longer lists.
    ///
    /// # Errors
    /// Returns `UpstreamError` when the peer cannot be listed.
    pub async fn sync_gateway(&self, gateway: &Gateway) -> AppResult<()> {
        let tools = self.client.list_tools(gateway).await?;
        let mut tool_names = Vec::with_capacity(tools.len());
        for def in tools {
            tool_names.push(def.name.clone());
            let existing = self
                .db
                .find_gateway_tool(gateway.common.id, &def.name)
                .await?;
            match existing {
                Some(mut tool) => {
                    tool.common.description = def.description;
                    tool.common.enabled = true;
                    tool.common.updated_at = chrono::Utc::now();
                    tool.input_schema = def.input_schema;
                    tool.annotations = def.annotations;
                    self.db.update_tool(&tool).await?;
                }
                None => {
                    let mut common = CatalogCommon::new(
                        def.name,
                        gateway.common.team_id,
                        gateway.common.owner_email.clone(),
                        gateway.common.visibility,
                        CreatedVia::Federation,
                    );
                    common.description = def.description;
                    let tool = Tool {
                        common,
                        gateway_id: Some(gateway.common.id),
                        integration_type: IntegrationType::Federated,
                        input_schema: def.input_schema,
                        output_schema: None,
                        annotations: def.annotations,
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
                    };
                    self.db.insert_tool(&tool).await?;
                }
            }
        }
        let disabled = self
            .db
            .disable_federated_entities_not_in(EntityKind::Tool, gateway.common.id, &tool_names)
            .await?;
        if disabled > 0 {
            info!(gateway = %gateway.common.name, disabled, "Peer removed tools; disabled locally");
        }

        self.sync_resources(gateway).await?;
        self.sync_prompts(gateway).await?;
        Ok(())
    }

    async fn sync_resources(&self, gateway: &Gateway) -> AppResult<()> {
        let resources = self.client.list_resources(gateway).await?;
        let mut names = Vec::with_capacity(resources.len());
        for def in resources {
            names.push(def.name.clone());
            let mut common = CatalogCommon::new(
                def.name,
                gateway.common.team_id,
                gateway.common.owner_email.clone(),
                gateway.common.visibility,
                CreatedVia::Federation,
            );
            common.reachable = gateway.common.reachable;
            let entry = ResourceEntry {
                common,
                gateway_id: Some(gateway.common.id),
                uri: def.uri,
                mime_type: def.mime_type.unwrap_or_else(|| "text/plain".to_owned()),
                text: None,
                blob: None,
            };
            // Duplicate URIs from re-syncs are fine; the row already exists
            match self.db.insert_resource(&entry).await {
                Ok(()) | Err(AppError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.db
            .disable_federated_entities_not_in(EntityKind::Resource, gateway.common.id, &names)
            .await?;
        Ok(())
    }

    async fn sync_prompts(&self, gateway: &Gateway) -> AppResult<()> {
        let prompts = self.client.list_prompts(gateway).await?;
        let mut names = Vec::with_capacity(prompts.len());
        for def in prompts {
            names.push(def.name.clone());
            let mut common = CatalogCommon::new(
                def.name,
                gateway.common.team_id,
                gateway.common.owner_email.clone(),
                gateway.common.visibility,
                CreatedVia::Federation,
            );
            common.description = def.description;
            let prompt = Prompt {
                common,
                gateway_id: Some(gateway.common.id),
                template: String::new(),
                arguments_schema: def.arguments,
            };
            match self.db.insert_prompt(&prompt).await {
                Ok(()) | Err(AppError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.db
            .disable_federated_entities_not_in(EntityKind::Prompt, gateway.common.id, &names)
            .await?;
        Ok(())
    }

    /// Apply a gateway update, re-running the handshake when connectivity
    /// fields (URL, auth, transport) changed
    ///
    /// # Errors
    /// Returns `PolicyDenied` when a pre-update hook blocks.
    pub async fn update_gateway(
        &self,
        existing: &Gateway,
        mut updated: Gateway,
        hook_context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<Gateway> {
        let payload = HookPayload::AdminEntity {
            entity_kind: EntityKind::Gateway,
            entity: serde_json::to_value(&updated)?,
        };
        self.plugins
            .run_hook(HookPoint::GatewayPreUpdate, payload.clone(), hook_context, elicitor)
            .await?;

        let connectivity_changed = existing.url != updated.url
            || existing.transport != updated.transport
            || existing.auth_value_encrypted != updated.auth_value_encrypted
            || existing.auth_type != updated.auth_type;

        if connectivity_changed {
            let handshake = self.client.initialize(&updated).await?;
            self.detect_loop(&handshake)?;
            updated.capabilities = handshake.capabilities;
            updated.peer_gateway_ids = handshake.reachable_gateway_ids;
        }

        updated.common.updated_at = chrono::Utc::now();
        self.db.update_gateway(&updated).await?;

        if connectivity_changed {
            if let Err(e) = self.sync_gateway(&updated).await {
                warn!(gateway = %updated.common.name, error = %e, "Refresh after update incomplete");
            }
        }

        self.plugins
            .run_hook(HookPoint::GatewayPostUpdate, payload, hook_context, None)
            .await?;
        Ok(updated)
    }

    /// Periodic re-sync across every enabled gateway
    pub async fn sync_all(&self) {
        let gateways = match self.db.list_gateways().await {
            Ok(gateways) => gateways,
            Err(e) => {
                warn!(error = %e, "Catalog sync skipped: cannot list gateways");
                return;
            }
        };
        for gateway in gateways.into_iter().filter(|g| g.common.enabled) {
            if let Err(e) = self.sync_gateway(&gateway).await {
                warn!(gateway = %gateway.common.name, error = %e, "Periodic sync failed");
            }
        }
    }
}
