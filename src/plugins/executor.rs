// ABOUTME: Priority-ordered hook execution with modes, bands, and elicitation
// ABOUTME: Plugin failures are isolated; fail_on_plugin_error overrides all modes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Hook Executor
//!
//! Plugins run strictly in priority order (lower first). Plugins sharing a
//! priority form a *band*; a band runs in parallel only when every member
//! declares `parallel_within_band` (payload mutation is sequential-only —
//! parallel bands contribute violations and metadata but cannot rewrite the
//! payload). Execution halts at the first blocking outcome, so a later
//! plugin never observes a request an earlier plugin rejected.

use super::hooks::{
    ElicitationRequest, ElicitationResponse, HookContext, HookPayload, HookPoint, HookResult,
    Plugin, Violation,
};
use crate::config::PluginConfig;
use crate::constants::violation_codes;
use crate::errors::{AppError, AppResult};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Execution mode governing how violations and errors are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginMode {
    /// Violations block; plugin errors block
    #[default]
    Enforce,
    /// Violations block; plugin errors are logged and skipped
    EnforceIgnoreError,
    /// Violations are logged and skipped; errors are logged and skipped
    Permissive,
    /// Plugin never runs
    Disabled,
}

/// Applicability conditions; empty lists mean "all"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConditions {
    /// Restrict to these tool names
    #[serde(default)]
    pub tools: Vec<String>,
    /// Restrict to these prompt names
    #[serde(default)]
    pub prompts: Vec<String>,
    /// Restrict to these virtual server ids
    #[serde(default)]
    pub server_ids: Vec<String>,
    /// Restrict to these team ids
    #[serde(default)]
    pub tenant_ids: Vec<String>,
}

impl PluginConditions {
    /// Whether the plugin applies to this payload/context combination
    #[must_use]
    pub fn applies(&self, payload: &HookPayload, context: &HookContext) -> bool {
        let name_ok = |restriction: &[String]| {
            restriction.is_empty()
                || payload
                    .target_name()
                    .is_some_and(|n| restriction.iter().any(|r| r == n))
        };
        match payload {
            HookPayload::ToolCall { .. } | HookPayload::ToolResult { .. } => {
                if !name_ok(&self.tools) {
                    return false;
                }
            }
            HookPayload::PromptFetch { .. } | HookPayload::PromptRendered { .. } => {
                if !name_ok(&self.prompts) {
                    return false;
                }
            }
            _ => {}
        }
        if !self.server_ids.is_empty() {
            let Some(server_id) = context.server_id else {
                return false;
            };
            if !self.server_ids.iter().any(|s| *s == server_id.to_string()) {
                return false;
            }
        }
        if !self.tenant_ids.is_empty() {
            let Some(team_id) = context.team_id else {
                return false;
            };
            if !self.tenant_ids.iter().any(|t| *t == team_id.to_string()) {
                return false;
            }
        }
        true
    }
}

/// Per-plugin settings from the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Plugin name; must match a registered implementation
    pub name: String,
    /// Execution order; lower runs earlier
    #[serde(default)]
    pub priority: i32,
    /// Violation/error handling mode
    #[serde(default)]
    pub mode: PluginMode,
    /// Member of a parallelizable band (side-effect-free)
    #[serde(default)]
    pub parallel_within_band: bool,
    /// When true, an unresolved elicitation (timeout) is handed back to the
    /// plugin instead of failing closed
    #[serde(default)]
    pub accept_unresolved_elicitations: bool,
    /// Applicability filter
    #[serde(default)]
    pub conditions: PluginConditions,
}

/// A plugin with its manifest settings attached
pub struct RegisteredPlugin {
    /// Manifest settings
    pub settings: PluginSettings,
    /// The implementation
    pub plugin: Arc<dyn Plugin>,
}

/// Transport used to relay an elicitation to the client mid-request
#[async_trait::async_trait]
pub trait ElicitationTransport: Send + Sync {
    /// Send `elicitation/create` and wait for the response within `timeout`
    ///
    /// # Errors
    /// Returns `Timeout` when the client does not answer in time.
    async fn elicit(
        &self,
        request: &ElicitationRequest,
        timeout: Duration,
    ) -> AppResult<ElicitationResponse>;
}

/// Outcome of running a hook chain
#[derive(Debug)]
pub struct HookOutcome {
    /// The payload after any sequential mutations
    pub payload: HookPayload,
    /// Number of plugins that actually ran
    pub plugins_run: usize,
}

/// Executes hook chains over the registered plugins
pub struct PluginExecutor {
    plugins: Vec<RegisteredPlugin>,
    config: PluginConfig,
}

impl PluginExecutor {
    /// Build an executor; plugins are sorted by `(priority, load order)`
    #[must_use]
    pub fn new(mut plugins: Vec<RegisteredPlugin>, config: PluginConfig) -> Self {
        plugins.sort_by_key(|p| p.settings.priority);
        Self { plugins, config }
    }

    /// Names and priorities of registered plugins, for diagnostics
    #[must_use]
    pub fn roster(&self) -> Vec<(String, i32)> {
        self.plugins
            .iter()
            .map(|p| (p.settings.name.clone(), p.settings.priority))
            .collect()
    }

    /// Run the chain for `hook` over `payload`.
    ///
    /// `elicitor` relays elicitation requests to the client; `None` (no
    /// session transport, e.g. health probes) fails elicitations closed.
    ///
    /// # Errors
    /// Returns `PolicyDenied` when a blocking violation fires, `PluginError`
    /// when `fail_on_plugin_error` is set and a plugin fails.
    pub async fn run_hook(
        &self,
        hook: HookPoint,
        payload: HookPayload,
        context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<HookOutcome> {
        if !self.config.enabled {
            return Ok(HookOutcome {
                payload,
                plugins_run: 0,
            });
        }

        let applicable: Vec<&RegisteredPlugin> = self
            .plugins
            .iter()
            .filter(|p| p.settings.mode != PluginMode::Disabled)
            .filter(|p| p.plugin.hooks().contains(&hook))
            .filter(|p| p.settings.conditions.applies(&payload, context))
            .collect();

        let mut current = payload;
        let mut plugins_run = 0usize;
        let mut index = 0usize;

        while index < applicable.len() {
            // Collect the band: consecutive plugins sharing a priority
            let band_priority = applicable[index].settings.priority;
            let band_end = applicable[index..]
                .iter()
                .take_while(|p| p.settings.priority == band_priority)
                .count()
                + index;
            let band = &applicable[index..band_end];
            index = band_end;

            let parallel_ok = band.len() > 1
                && band.iter().all(|p| p.settings.parallel_within_band);

            if parallel_ok {
                // Parallel band: violations and metadata only; no payload rewrites
                let futures = band
                    .iter()
                    .map(|p| self.invoke_one(p, hook, &current, context, elicitor));
                let results = join_all(futures).await;
                for (registered, result) in band.iter().zip(results) {
                    plugins_run += 1;
                    match self.settle(registered, result, context).await? {
                        Settled::Continue(Some(_)) => {
                            warn!(
                                plugin = %registered.settings.name,
                                "Payload mutation ignored in parallel band"
                            );
                        }
                        Settled::Continue(None) => {}
                        Settled::Halt(err) => return Err(err),
                    }
                }
            } else {
                for registered in band {
                    plugins_run += 1;
                    let result = self
                        .invoke_one(registered, hook, &current, context, elicitor)
                        .await;
                    match self.settle(registered, result, context).await? {
                        Settled::Continue(Some(mutated)) => current = mutated,
                        Settled::Continue(None) => {}
                        Settled::Halt(err) => return Err(err),
                    }
                }
            }
        }

        Ok(HookOutcome {
            payload: current,
            plugins_run,
        })
    }

    /// Invoke one plugin with timeout and the elicitation round-trip
    async fn invoke_one(
        &self,
        registered: &RegisteredPlugin,
        hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
        elicitor: Option<&dyn ElicitationTransport>,
    ) -> AppResult<HookResult> {
        let result = self
            .invoke_with_timeout(registered, hook, payload, context)
            .await?;

        let Some(request) = result.elicitation_request.clone() else {
            return Ok(result);
        };
        if !hook.is_pre() {
            warn!(
                plugin = %registered.settings.name,
                "Elicitation from a post-hook is ignored"
            );
            return Ok(result);
        }

        // One elicitation round per plugin per request: relay, inject
        // the response, re-invoke exactly once.
        let timeout = request
            .timeout_secs
            .map_or(self.config.elicitation_timeout, Duration::from_secs);

        let response = match elicitor {
            Some(elicitor) => elicitor.elicit(&request, timeout).await,
            None => Err(AppError::timeout("No elicitation transport for session")),
        };

        let response = match response {
            Ok(response) => response,
            Err(_) if registered.settings.accept_unresolved_elicitations => {
                ElicitationResponse::Cancel
            }
            Err(_) => {
                return Ok(HookResult::block(Violation {
                    code: violation_codes::ELICITATION_TIMEOUT.to_owned(),
                    reason: "Elicitation timed out".to_owned(),
                    description: format!(
                        "Plugin {} required client input that did not arrive in time",
                        registered.settings.name
                    ),
                }))
            }
        };

        context
            .elicitation_responses
            .lock()
            .await
            .insert(registered.settings.name.clone(), response);

        self.invoke_with_timeout(registered, hook, payload, context)
            .await
    }

    async fn invoke_with_timeout(
        &self,
        registered: &RegisteredPlugin,
        hook: HookPoint,
        payload: &HookPayload,
        context: &HookContext,
    ) -> AppResult<HookResult> {
        tokio::time::timeout(
            self.config.plugin_timeout,
            registered.plugin.handle(hook, payload, context),
        )
        .await
        .map_err(|_| {
            AppError::timeout(format!(
                "Plugin {} exceeded its timeout",
                registered.settings.name
            ))
        })?
    }

    /// Apply mode rules to one plugin outcome
    async fn settle(
        &self,
        registered: &RegisteredPlugin,
        result: AppResult<HookResult>,
        context: &HookContext,
    ) -> AppResult<Settled> {
        let name = &registered.settings.name;
        let mode = registered.settings.mode;

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                // fail_on_plugin_error overrides every mode
                if self.config.fail_on_plugin_error {
                    return Err(AppError::plugin(format!("Plugin {name} failed: {err}")));
                }
                return match mode {
                    PluginMode::Enforce => Ok(Settled::Halt(AppError::plugin(format!(
                        "Plugin {name} failed: {err}"
                    )))),
                    PluginMode::EnforceIgnoreError | PluginMode::Permissive => {
                        warn!(plugin = %name, error = %err, "Plugin error ignored by mode");
                        Ok(Settled::Continue(None))
                    }
                    PluginMode::Disabled => Ok(Settled::Continue(None)),
                };
            }
        };

        // Merge metadata regardless of outcome
        if !result.metadata.is_empty() {
            let mut metadata = context.metadata.lock().await;
            for (key, value) in result.metadata {
                metadata.insert(key, value);
            }
        }

        if let Some(violation) = result.violation {
            match mode {
                PluginMode::Enforce | PluginMode::EnforceIgnoreError => {
                    debug!(plugin = %name, code = %violation.code, "Blocking violation");
                    return Ok(Settled::Halt(AppError::policy_denied(
                        violation.code,
                        violation.reason,
                    )));
                }
                PluginMode::Permissive => {
                    warn!(
                        plugin = %name,
                        code = %violation.code,
                        reason = %violation.reason,
                        "Violation logged in permissive mode"
                    );
                }
                PluginMode::Disabled => {}
            }
        } else if !result.continue_processing {
            // Halt without a violation: treated as a generic policy stop
            return Ok(Settled::Halt(AppError::policy_denied(
                "PLUGIN_HALTED",
                format!("Plugin {name} halted processing"),
            )));
        }

        Ok(Settled::Continue(result.modified_payload))
    }
}

enum Settled {
    /// Keep going, optionally with a mutated payload
    Continue(Option<HookPayload>),
    /// Stop the chain with this error
    Halt(AppError),
}
