// ABOUTME: AppState: every long-lived component, constructed once at startup
// ABOUTME: Explicitly passed everywhere; no global mutable state
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Application State
//!
//! All long-lived components are constructed here, in dependency order, and
//! shared behind one `Arc<AppState>`. Configuration is immutable after this
//! point; mutable pieces (sessions, caches, pools) live behind their own
//! concurrency primitives inside their components.

use crate::auth::api_tokens::ApiTokenService;
use crate::auth::sso::IdentityProviderRegistry;
use crate::auth::AuthManager;
use crate::cache::{build_cache, CacheBackend};
use crate::cancellation::CancellationToken;
use crate::catalog::CatalogService;
use crate::config::GatewayConfig;
use crate::crypto::SecretVault;
use crate::database::Database;
use crate::dispatch::Dispatcher;
use crate::errors::AppResult;
use crate::federation::{FederationClient, FederationManager, HealthMonitor};
use crate::metrics::MetricsRegistry;
use crate::plugins::{build_executor, InProcessPluginSet, PluginExecutor};
use crate::rate_limiting::RateLimiter;
use crate::transports::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared state for the whole gateway process
pub struct AppState {
    /// Immutable configuration
    pub config: GatewayConfig,
    /// Relational store
    pub db: Database,
    /// Cache backend
    pub cache: Arc<dyn CacheBackend>,
    /// Credential vault
    pub vault: Arc<SecretVault>,
    /// JWT issuance/validation
    pub auth: Arc<AuthManager>,
    /// API token catalog
    pub api_tokens: Arc<ApiTokenService>,
    /// SSO provider registry
    pub identity_providers: Arc<IdentityProviderRegistry>,
    /// Plugin executor
    pub plugins: Arc<PluginExecutor>,
    /// Catalog registry
    pub catalog: Arc<CatalogService>,
    /// Tool dispatcher
    pub dispatcher: Arc<Dispatcher>,
    /// Federation manager
    pub federation: Arc<FederationManager>,
    /// Federation peer client
    pub federation_client: Arc<FederationClient>,
    /// Metrics registry
    pub metrics: Arc<MetricsRegistry>,
    /// Client session registry
    pub sessions: Arc<SessionRegistry>,
    /// Root shutdown token; cancelling it stops background loops and sessions
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Construct everything in dependency order
    ///
    /// # Errors
    /// Returns an error when the database, cache, plugin manifest, or key
    /// material cannot be initialized.
    pub async fn initialize(
        config: GatewayConfig,
        in_process_plugins: InProcessPluginSet,
    ) -> AppResult<Arc<Self>> {
        let db = Database::connect(&config.database).await?;
        let cache = build_cache(&config.cache).await?;
        let vault = Arc::new(SecretVault::from_config(config.encryption_key_b64.as_deref())?);

        let auth = Arc::new(AuthManager::new(config.auth.clone())?);
        let api_tokens = Arc::new(ApiTokenService::new(db.clone()));

        let plugins = Arc::new(build_executor(&config.plugins, &in_process_plugins).await?);

        let catalog = Arc::new(CatalogService::new(
            db.clone(),
            plugins.clone(),
            cache.clone(),
            Duration::from_secs(config.cache.default_ttl_secs),
            config.pagination.cursor_threshold,
        ));

        let metrics = Arc::new(MetricsRegistry::new());
        let rate_limiter = Arc::new(RateLimiter::new(cache.clone(), &config.dispatch));
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatch.clone(),
            metrics.clone(),
            rate_limiter,
            vault.clone(),
        ));

        let federation_client = Arc::new(FederationClient::new(
            vault.clone(),
            config.federation.handshake_timeout,
        ));
        dispatcher.set_peer_invoker(federation_client.clone());

        let federation = Arc::new(FederationManager::new(
            db.clone(),
            federation_client.clone(),
            vault.clone(),
            plugins.clone(),
            Uuid::new_v4().to_string(),
        ));

        let shutdown = CancellationToken::new();
        let sessions = Arc::new(SessionRegistry::new(
            config.http.session_idle_timeout,
            metrics.clone(),
            shutdown.child(),
        ));

        Ok(Arc::new(Self {
            config,
            db,
            cache,
            vault,
            auth,
            api_tokens,
            identity_providers: Arc::new(IdentityProviderRegistry::new()),
            plugins,
            catalog,
            dispatcher,
            federation,
            federation_client,
            metrics,
            sessions,
            shutdown,
        }))
    }

    /// Spawn the background loops: federation health probes, periodic catalog
    /// sync, and idle-session eviction
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let monitor = Arc::new(HealthMonitor::new(
            self.db.clone(),
            self.federation_client.clone(),
            self.metrics.clone(),
            self.config.federation.clone(),
        ));
        tokio::spawn(monitor.run(self.shutdown.child()));

        let federation = self.federation.clone();
        let sync_interval = self.config.federation.sync_interval;
        let sync_shutdown = self.shutdown.child();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sync_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => federation.sync_all().await,
                    () = sync_shutdown.cancelled() => return,
                }
            }
        });

        let sessions = self.sessions.clone();
        tokio::spawn(sessions.run_eviction_loop());
    }
}
