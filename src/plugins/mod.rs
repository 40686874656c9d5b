// ABOUTME: Plugin framework: manifest loading and executor assembly
// ABOUTME: In-process plugins register by name; external ones spawn from the manifest
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Plugin Framework
//!
//! The manifest (JSON, path in `MCPGATEWAY_PLUGIN_CONFIG`) lists plugins with
//! settings — priority, mode, conditions — and, for external plugins, their
//! transport. In-process plugins are compiled into the host; the manifest
//! references them by name through the [`InProcessPluginSet`] the host
//! assembles at startup.

pub mod executor;
pub mod external;
pub mod hooks;

pub use executor::{
    ElicitationTransport, HookOutcome, PluginConditions, PluginExecutor, PluginMode,
    PluginSettings, RegisteredPlugin,
};
pub use hooks::{
    ElicitationRequest, ElicitationResponse, HookContext, HookPayload, HookPoint, HookResult,
    Plugin, Violation,
};

use crate::config::PluginConfig;
use crate::errors::{AppError, AppResult};
use external::{ExternalPlugin, ExternalTransport};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Compiled-in plugins the manifest may reference by name
pub type InProcessPluginSet = HashMap<String, Arc<dyn Plugin>>;

/// One manifest entry
#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    settings: PluginSettings,
    /// Present for external plugins
    #[serde(default)]
    external: Option<ExternalSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExternalSpec {
    /// `http` or `stdio`
    transport: String,
    /// Endpoint for http transport
    #[serde(default)]
    url: Option<String>,
    /// Program + args for stdio transport
    #[serde(default)]
    command: Vec<String>,
    /// Hooks the plugin serves (the framework cannot introspect a remote)
    hooks: Vec<HookPoint>,
}

#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    #[serde(default)]
    plugins: Vec<ManifestEntry>,
}

/// Assemble the executor from the manifest file and compiled-in plugins.
///
/// Manifest entries naming an unknown in-process plugin are skipped with a
/// warning rather than failing startup; external entries always resolve.
///
/// # Errors
/// Returns an error when the manifest file exists but cannot be read or
/// parsed, or an external entry is malformed.
pub async fn build_executor(
    config: &PluginConfig,
    in_process: &InProcessPluginSet,
) -> AppResult<PluginExecutor> {
    let mut registered = Vec::new();

    if let Some(path) = &config.config_path {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::internal(format!("Cannot read plugin manifest {path}: {e}")))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .map_err(|e| AppError::invalid_input(format!("Malformed plugin manifest: {e}")))?;

        for entry in manifest.plugins {
            let name = entry.settings.name.clone();
            let plugin: Arc<dyn Plugin> = match entry.external {
                Some(spec) => Arc::new(build_external(&name, spec, config)?),
                None => match in_process.get(&name) {
                    Some(plugin) => plugin.clone(),
                    None => {
                        warn!(plugin = %name, "Manifest references an unknown in-process plugin");
                        continue;
                    }
                },
            };
            registered.push(RegisteredPlugin {
                settings: entry.settings,
                plugin,
            });
        }
    } else {
        // No manifest: every compiled-in plugin runs with default settings
        for (name, plugin) in in_process {
            registered.push(RegisteredPlugin {
                settings: PluginSettings {
                    name: name.clone(),
                    priority: 100,
                    mode: PluginMode::Enforce,
                    parallel_within_band: false,
                    accept_unresolved_elicitations: false,
                    conditions: PluginConditions::default(),
                },
                plugin: plugin.clone(),
            });
        }
    }

    info!(count = registered.len(), "Plugin executor assembled");
    Ok(PluginExecutor::new(registered, config.clone()))
}

fn build_external(
    name: &str,
    spec: ExternalSpec,
    config: &PluginConfig,
) -> AppResult<ExternalPlugin> {
    let transport = match spec.transport.as_str() {
        "http" => {
            let url = spec.url.ok_or_else(|| {
                AppError::invalid_input(format!("External plugin {name} is missing its url"))
            })?;
            ExternalTransport::Http { url }
        }
        "stdio" => {
            if spec.command.is_empty() {
                return Err(AppError::invalid_input(format!(
                    "External plugin {name} is missing its command"
                )));
            }
            ExternalTransport::Stdio {
                command: spec.command,
            }
        }
        other => {
            return Err(AppError::invalid_input(format!(
                "External plugin {name} has unknown transport: {other}"
            )))
        }
    };
    Ok(ExternalPlugin::new(
        name.to_owned(),
        spec.hooks,
        transport,
        config.external_timeout,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[tokio::test]
    async fn empty_manifest_path_registers_compiled_plugins() {
        let config = GatewayConfig::default().plugins;
        let executor = build_executor(&config, &InProcessPluginSet::new())
            .await
            .unwrap();
        assert!(executor.roster().is_empty());
    }

    #[tokio::test]
    async fn manifest_parses_external_entries() {
        let manifest = r#"{
            "plugins": [
                {
                    "name": "guard",
                    "priority": 5,
                    "mode": "enforce",
                    "external": {
                        "transport": "http",
                        "url": "http://localhost:9900/mcp",
                        "hooks": ["tool_pre_invoke", "tool_post_invoke"]
                    }
                }
            ]
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        std::fs::write(&path, manifest).unwrap();

        let mut config = GatewayConfig::default().plugins;
        config.config_path = Some(path.to_string_lossy().into_owned());

        let executor = build_executor(&config, &InProcessPluginSet::new())
            .await
            .unwrap();
        assert_eq!(executor.roster(), vec![("guard".to_owned(), 5)]);
    }

    #[tokio::test]
    async fn unknown_in_process_plugin_is_skipped() {
        let manifest = r#"{"plugins": [{"name": "ghost", "priority": 1}]}"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        std::fs::write(&path, manifest).unwrap();

        let mut config = GatewayConfig::default().plugins;
        config.config_path = Some(path.to_string_lossy().into_owned());

        let executor = build_executor(&config, &InProcessPluginSet::new())
            .await
            .unwrap();
        assert!(executor.roster().is_empty());
    }
}
