// ABOUTME: Background health loop probing peer gateways
// ABOUTME: Threshold-based unreachable marking with automatic reactivation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Federation Health Loop
//!
//! Probes every enabled gateway at the configured interval. A peer flips to
//! `reachable=false` only after `failure_threshold` consecutive failures;
//! a single successful probe flips it back without operator action.
//! Reachability propagates to the peer's ingested entities and the metrics
//! gauges.

use super::client::FederationClient;
use crate::cancellation::CancellationToken;
use crate::config::FederationConfig;
use crate::database::Database;
use crate::metrics::MetricsRegistry;
use crate::models::EntityKind;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs the probe loop until the shutdown token fires
pub struct HealthMonitor {
    db: Database,
    client: Arc<FederationClient>,
    metrics: Arc<MetricsRegistry>,
    config: FederationConfig,
    consecutive_failures: DashMap<Uuid, u32>,
}

impl HealthMonitor {
    /// Assemble the monitor
    #[must_use]
    pub fn new(
        db: Database,
        client: Arc<FederationClient>,
        metrics: Arc<MetricsRegistry>,
        config: FederationConfig,
    ) -> Self {
        Self {
            db,
            client,
            metrics,
            config,
            consecutive_failures: DashMap::new(),
        }
    }

    /// Probe loop; returns when `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.health_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.health_interval.as_secs(),
            "Federation health loop started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => self.probe_all().await,
                () = shutdown.cancelled() => {
                    info!("Federation health loop stopped");
                    return;
                }
            }
        }
    }

    /// One probe round across every enabled gateway
    pub async fn probe_all(&self) {
        let gateways = match self.db.list_gateways().await {
            Ok(gateways) => gateways,
            Err(e) => {
                warn!(error = %e, "Health probe skipped: cannot list gateways");
                return;
            }
        };

        for gateway in gateways.into_iter().filter(|g| g.common.enabled) {
            let healthy = self.client.ping(&gateway, self.config.health_timeout).await;
            let id = gateway.common.id;

            if healthy {
                self.consecutive_failures.remove(&id);
                if !gateway.common.reachable {
                    // One good probe reactivates a previously unreachable peer
                    info!(gateway = %gateway.common.name, "Peer recovered; marking reachable");
                    self.set_reachable(&gateway.common.name, id, true).await;
                }
            } else {
                let failures = {
                    let mut entry = self.consecutive_failures.entry(id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                debug!(gateway = %gateway.common.name, failures, "Peer probe failed");
                if failures >= self.config.failure_threshold && gateway.common.reachable {
                    warn!(
                        gateway = %gateway.common.name,
                        failures,
                        "Peer unreachable past threshold; marking unreachable"
                    );
                    self.set_reachable(&gateway.common.name, id, false).await;
                }
            }
        }
    }

    async fn set_reachable(&self, name: &str, id: Uuid, reachable: bool) {
        if let Err(e) = self
            .db
            .set_entity_reachable(EntityKind::Gateway, id, reachable)
            .await
        {
            warn!(error = %e, "Failed to record gateway reachability");
            return;
        }
        if let Err(e) = self.db.set_gateway_entities_reachable(id, reachable).await {
            warn!(error = %e, "Failed to propagate reachability to entities");
        }
        self.metrics.set_gateway_reachable(name, reachable);
    }
}
