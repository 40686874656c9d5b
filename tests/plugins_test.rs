// ABOUTME: Plugin framework integration tests against the catalog service
// ABOUTME: Masking pre-hooks, declined elicitations, and permissive mode
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{create_test_state, create_test_user, personal_team};
use mcp_gateway::config::GatewayConfig;
use mcp_gateway::catalog::CatalogService;
use mcp_gateway::errors::{AppError, AppResult};
use mcp_gateway::models::{CatalogCommon, CreatedVia, Visibility, VirtualServer};
use mcp_gateway::plugins::{
    ElicitationRequest, ElicitationResponse, ElicitationTransport, HookContext, HookPayload,
    HookPoint, HookResult, Plugin, PluginConditions, PluginExecutor, PluginMode, PluginSettings,
    RegisteredPlugin, Violation,
};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Masks SSNs in prompt arguments, leaving the last four digits
struct PiiMaskPlugin {
    pattern: Regex,
}

impl PiiMaskPlugin {
    fn new() -> Self {
        Self {
            pattern: Regex::new(r"\b\d{3}-\d{2}-(\d{4})\b").unwrap(),
        }
    }
}

#[async_trait::async_trait]
impl Plugin for PiiMaskPlugin {
    fn name(&self) -> &str {
        "pii-mask"
    }
    fn hooks(&self) -> &[HookPoint] {
        &[HookPoint::PromptPreFetch]
    }
    async fn handle(
        &self,
        _hook: HookPoint,
        payload: &HookPayload,
        _context: &HookContext,
    ) -> AppResult<HookResult> {
        let HookPayload::PromptFetch { name, arguments } = payload else {
            return Ok(HookResult::ok());
        };
        let text = serde_json::to_string(arguments)
            .map_err(|e| AppError::internal(e.to_string()))?;
        if !self.pattern.is_match(&text) {
            return Ok(HookResult::ok());
        }
        let masked = self.pattern.replace_all(&text, "XXX-XX-$1").into_owned();
        let arguments: Value =
            serde_json::from_str(&masked).map_err(|e| AppError::internal(e.to_string()))?;
        Ok(HookResult::modify(HookPayload::PromptFetch {
            name: name.clone(),
            arguments,
        })
        .with_metadata("pii_masked", json!(true)))
    }
}

fn executor_with(plugin: Arc<dyn Plugin>, mode: PluginMode) -> PluginExecutor {
    PluginExecutor::new(
        vec![RegisteredPlugin {
            settings: PluginSettings {
                name: plugin.name().to_owned(),
                priority: 10,
                mode,
                parallel_within_band: false,
                accept_unresolved_elicitations: false,
                conditions: PluginConditions::default(),
            },
            plugin,
        }],
        GatewayConfig::default().plugins,
    )
}

#[tokio::test]
async fn pii_pre_hook_masks_prompt_arguments() {
    // SSNs are masked before the prompt renders, and the request context
    // records that masking happened
    let executor = executor_with(Arc::new(PiiMaskPlugin::new()), PluginMode::Enforce);
    let context = HookContext::new("req-pii");

    let outcome = executor
        .run_hook(
            HookPoint::PromptPreFetch,
            HookPayload::PromptFetch {
                name: "summarize".to_owned(),
                arguments: json!({"text": "Customer SSN: 123-45-6789, handle with care"}),
            },
            &context,
            None,
        )
        .await
        .unwrap();

    let HookPayload::PromptFetch { arguments, .. } = outcome.payload else {
        panic!("payload kind changed");
    };
    let text = arguments["text"].as_str().unwrap();
    assert!(text.contains("XXX-XX-6789"), "got {text}");
    assert!(!text.contains("123-45-6789"));

    let metadata = context.metadata.lock().await;
    assert_eq!(metadata.get("pii_masked"), Some(&json!(true)));
}

/// Requires client confirmation before a "production"-tagged server registers
struct ProductionGuardPlugin;

#[async_trait::async_trait]
impl Plugin for ProductionGuardPlugin {
    fn name(&self) -> &str {
        "production-guard"
    }
    fn hooks(&self) -> &[HookPoint] {
        &[HookPoint::ServerPreRegister]
    }
    async fn handle(
        &self,
        _hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
    ) -> AppResult<HookResult> {
        let HookPayload::AdminEntity { entity, .. } = payload else {
            return Ok(HookResult::ok());
        };
        let tagged_production = entity["tags"]
            .as_array()
            .is_some_and(|tags| tags.iter().any(|t| t == "production"));
        if !tagged_production {
            return Ok(HookResult::ok());
        }

        match context.elicitation_response("production-guard").await {
            Some(ElicitationResponse::Accept { .. }) => Ok(HookResult::ok()),
            Some(_) => Ok(HookResult::block(Violation {
                code: "PRODUCTION_REGISTRATION_DECLINED".to_owned(),
                reason: "Operator declined production registration".to_owned(),
                description: "Registering production-tagged servers requires confirmation"
                    .to_owned(),
            })),
            None => Ok(HookResult::elicit(ElicitationRequest {
                message: "Register a production-tagged server?".to_owned(),
                schema: json!({"type": "object", "properties": {"confirm": {"type": "boolean"}}}),
                timeout_secs: Some(5),
            })),
        }
    }
}

struct DecliningClient;

#[async_trait::async_trait]
impl ElicitationTransport for DecliningClient {
    async fn elicit(
        &self,
        _request: &ElicitationRequest,
        _timeout: Duration,
    ) -> AppResult<ElicitationResponse> {
        Ok(ElicitationResponse::Decline)
    }
}

struct AcceptingClient;

#[async_trait::async_trait]
impl ElicitationTransport for AcceptingClient {
    async fn elicit(
        &self,
        _request: &ElicitationRequest,
        _timeout: Duration,
    ) -> AppResult<ElicitationResponse> {
        Ok(ElicitationResponse::Accept {
            data: json!({"confirm": true}),
        })
    }
}

fn production_server(team: uuid::Uuid, owner: &str) -> VirtualServer {
    let mut common = CatalogCommon::new(
        "prod-bundle".to_owned(),
        team,
        owner.to_owned(),
        Visibility::Team,
        CreatedVia::Api,
    );
    common.tags = vec!["production".to_owned()];
    VirtualServer {
        common,
        icon: None,
        associated_tools: Vec::new(),
        associated_resources: Vec::new(),
        associated_prompts: Vec::new(),
        associated_a2a_agents: Vec::new(),
    }
}

#[tokio::test]
async fn declined_elicitation_rejects_registration_without_persisting() {
    // The client declines; the violation surfaces with its code and
    // nothing is persisted
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let executor = Arc::new(executor_with(
        Arc::new(ProductionGuardPlugin),
        PluginMode::Enforce,
    ));
    let catalog = CatalogService::new(
        state.db.clone(),
        executor,
        state.cache.clone(),
        Duration::from_secs(60),
        10_000,
    );

    let context = HookContext::new("req-prod");
    let err = catalog
        .create_server(
            &identity,
            production_server(team, &user.email),
            &context,
            Some(&DecliningClient),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.violation_code(),
        Some("PRODUCTION_REGISTRATION_DECLINED")
    );

    // No row persisted
    assert!(state.db.list_servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn accepted_elicitation_lets_registration_proceed() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let executor = Arc::new(executor_with(
        Arc::new(ProductionGuardPlugin),
        PluginMode::Enforce,
    ));
    let catalog = CatalogService::new(
        state.db.clone(),
        executor,
        state.cache.clone(),
        Duration::from_secs(60),
        10_000,
    );

    let context = HookContext::new("req-prod-ok");
    catalog
        .create_server(
            &identity,
            production_server(team, &user.email),
            &context,
            Some(&AcceptingClient),
        )
        .await
        .unwrap();

    assert_eq!(state.db.list_servers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn permissive_mode_logs_but_allows() {
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    struct AlwaysBlock;
    #[async_trait::async_trait]
    impl Plugin for AlwaysBlock {
        fn name(&self) -> &str {
            "always-block"
        }
        fn hooks(&self) -> &[HookPoint] {
            &[HookPoint::ServerPreRegister]
        }
        async fn handle(
            &self,
            _hook: HookPoint,
            _payload: &HookPayload,
            _context: &HookContext,
        ) -> AppResult<HookResult> {
            Ok(HookResult::block(Violation {
                code: "NOPE".to_owned(),
                reason: "never".to_owned(),
                description: String::new(),
            }))
        }
    }

    let executor = Arc::new(executor_with(Arc::new(AlwaysBlock), PluginMode::Permissive));
    let catalog = CatalogService::new(
        state.db.clone(),
        executor,
        state.cache.clone(),
        Duration::from_secs(60),
        10_000,
    );

    let context = HookContext::new("req-permissive");
    catalog
        .create_server(
            &identity,
            production_server(team, &user.email),
            &context,
            None,
        )
        .await
        .unwrap();
    assert_eq!(state.db.list_servers().await.unwrap().len(), 1);
}
