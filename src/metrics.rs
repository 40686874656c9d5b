// ABOUTME: Per-entity counters, per-tool latency histograms, federation gauges
// ABOUTME: Exposed as JSON at GET /metrics; counters are lock-free atomics
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Metrics Registry
//!
//! In-process counters and histograms recorded throughout the request
//! pipeline: tool invocations/errors/retries, per-tool latency buckets, and
//! federation reachability gauges. The registry is cheap to update on the hot
//! path (`DashMap` of atomics) and snapshots into plain JSON for `/metrics`.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fixed latency bucket upper bounds in milliseconds
const LATENCY_BUCKETS_MS: [u64; 8] = [5, 25, 100, 250, 500, 1_000, 5_000, 20_000];

#[derive(Default)]
struct ToolMetrics {
    invocations: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    latency_buckets: [AtomicU64; 8],
    latency_total_ms: AtomicU64,
}

/// Snapshot of one tool's counters
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetricsSnapshot {
    /// Total invocations
    pub invocations: u64,
    /// Invocations that ended in an error
    pub errors: u64,
    /// Retries performed across all invocations
    pub retries: u64,
    /// Cumulative histogram counts per bucket bound
    pub latency_buckets: Vec<(u64, u64)>,
    /// Mean latency across all invocations
    pub mean_latency_ms: f64,
}

/// Full snapshot rendered at `/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Per-tool counters keyed by tool name
    pub tools: std::collections::BTreeMap<String, ToolMetricsSnapshot>,
    /// Per-method request counters keyed by MCP method
    pub requests: std::collections::BTreeMap<String, u64>,
    /// Gateway reachability gauges keyed by gateway name (1 = reachable)
    pub federation: std::collections::BTreeMap<String, u64>,
    /// Currently open client sessions
    pub open_sessions: u64,
}

/// Lock-free metrics registry shared across components
#[derive(Default)]
pub struct MetricsRegistry {
    tools: DashMap<String, ToolMetrics>,
    requests: DashMap<String, AtomicU64>,
    federation: DashMap<String, AtomicU64>,
    open_sessions: AtomicU64,
}

impl MetricsRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed tool invocation
    pub fn record_tool_invocation(
        &self,
        tool: &str,
        duration: Duration,
        retries: u32,
        success: bool,
    ) {
        let entry = self.tools.entry(tool.to_owned()).or_default();
        entry.invocations.fetch_add(1, Ordering::Relaxed);
        if !success {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
        entry
            .retries
            .fetch_add(u64::from(retries), Ordering::Relaxed);

        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        entry.latency_total_ms.fetch_add(millis, Ordering::Relaxed);
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if millis <= *bound {
                entry.latency_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count one protocol request by method
    pub fn record_request(&self, method: &str) {
        self.requests
            .entry(method.to_owned())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Set a gateway reachability gauge
    pub fn set_gateway_reachable(&self, gateway: &str, reachable: bool) {
        self.federation
            .entry(gateway.to_owned())
            .or_default()
            .store(u64::from(reachable), Ordering::Relaxed);
    }

    /// Session opened
    pub fn session_opened(&self) {
        self.open_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Session closed
    pub fn session_closed(&self) {
        // Saturating: a double-close must not wrap the gauge
        let _ = self
            .open_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Snapshot every counter for the `/metrics` endpoint
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tools = self
            .tools
            .iter()
            .map(|entry| {
                let invocations = entry.invocations.load(Ordering::Relaxed);
                let total_ms = entry.latency_total_ms.load(Ordering::Relaxed);
                let mean = if invocations == 0 {
                    0.0
                } else {
                    total_ms as f64 / invocations as f64
                };
                (
                    entry.key().clone(),
                    ToolMetricsSnapshot {
                        invocations,
                        errors: entry.errors.load(Ordering::Relaxed),
                        retries: entry.retries.load(Ordering::Relaxed),
                        latency_buckets: LATENCY_BUCKETS_MS
                            .iter()
                            .enumerate()
                            .map(|(i, bound)| {
                                (*bound, entry.latency_buckets[i].load(Ordering::Relaxed))
                            })
                            .collect(),
                        mean_latency_ms: mean,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            tools,
            requests: self
                .requests
                .iter()
                .map(|e| (e.key().clone(), e.load(Ordering::Relaxed)))
                .collect(),
            federation: self
                .federation
                .iter()
                .map(|e| (e.key().clone(), e.load(Ordering::Relaxed)))
                .collect(),
            open_sessions: self.open_sessions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn tool_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.record_tool_invocation("search", Duration::from_millis(40), 2, true);
        metrics.record_tool_invocation("search", Duration::from_millis(600), 0, false);

        let snap = metrics.snapshot();
        let tool = &snap.tools["search"];
        assert_eq!(tool.invocations, 2);
        assert_eq!(tool.errors, 1);
        assert_eq!(tool.retries, 2);
        // 40ms lands in every bucket from 100ms up; 600ms from 1000ms up
        let bucket_100 = tool.latency_buckets.iter().find(|(b, _)| *b == 100).unwrap();
        assert_eq!(bucket_100.1, 1);
        let bucket_1000 = tool
            .latency_buckets
            .iter()
            .find(|(b, _)| *b == 1_000)
            .unwrap();
        assert_eq!(bucket_1000.1, 2);
    }

    #[test]
    fn session_gauge_never_wraps() {
        let metrics = MetricsRegistry::new();
        metrics.session_closed();
        assert_eq!(metrics.snapshot().open_sessions, 0);
        metrics.session_opened();
        assert_eq!(metrics.snapshot().open_sessions, 1);
    }

    #[test]
    fn federation_gauges_toggle() {
        let metrics = MetricsRegistry::new();
        metrics.set_gateway_reachable("peer-a", true);
        metrics.set_gateway_reachable("peer-a", false);
        assert_eq!(metrics.snapshot().federation["peer-a"], 0);
    }
}
