// ABOUTME: Token-bucket rate limiting for users and tools
// ABOUTME: Buckets live in the cache backend so multi-worker deployments share them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Rate Limiting
//!
//! Per-user and per-tool buckets enforced at dispatch entry. Buckets are
//! windowed counters stored in the cache backend (in-memory by default,
//! Redis when configured), so the same limits hold across workers when a
//! shared backend is in use.

use crate::cache::CacheBackend;
use crate::config::DispatchConfig;
use crate::errors::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a successful bucket check, surfaced as `X-RateLimit-*` headers
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    /// Requests admitted per window
    pub limit: u32,
    /// Requests remaining in the current window
    pub remaining: u32,
    /// Seconds until the window resets
    pub reset_secs: u64,
}

/// Token-bucket limiter over the cache backend
pub struct RateLimiter {
    cache: Arc<dyn CacheBackend>,
    user_rate_per_minute: u32,
    tool_rate_per_minute: u32,
}

impl RateLimiter {
    /// Build from dispatcher configuration
    #[must_use]
    pub fn new(cache: Arc<dyn CacheBackend>, config: &DispatchConfig) -> Self {
        Self {
            cache,
            user_rate_per_minute: config.user_rate_per_minute,
            tool_rate_per_minute: config.tool_rate_per_minute,
        }
    }

    async fn check(&self, key: &str, limit: u32) -> AppResult<RateLimitStatus> {
        if limit == 0 {
            // Zero disables the bucket
            return Ok(RateLimitStatus {
                limit: 0,
                remaining: 0,
                reset_secs: 0,
            });
        }
        let (count, reset_secs) = self.cache.incr_within_window(key, WINDOW).await?;
        if count > u64::from(limit) {
            return Err(AppError::rate_limited(reset_secs));
        }
        Ok(RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(u32::try_from(count).unwrap_or(u32::MAX)),
            reset_secs,
        })
    }

    /// Admit or reject a request on the caller's bucket
    ///
    /// # Errors
    /// Returns `RateLimited` with a retry-after once the bucket is drained.
    pub async fn check_user(&self, email: &str) -> AppResult<RateLimitStatus> {
        self.check(&format!("rl:user:{email}"), self.user_rate_per_minute)
            .await
    }

    /// Admit or reject an invocation on the tool's bucket
    ///
    /// # Errors
    /// Returns `RateLimited` with a retry-after once the bucket is drained.
    pub async fn check_tool(&self, tool_name: &str) -> AppResult<RateLimitStatus> {
        self.check(&format!("rl:tool:{tool_name}"), self.tool_rate_per_minute)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::GatewayConfig;

    fn limiter(user_rate: u32, tool_rate: u32) -> RateLimiter {
        let mut config = GatewayConfig::default().dispatch;
        config.user_rate_per_minute = user_rate;
        config.tool_rate_per_minute = tool_rate;
        RateLimiter::new(Arc::new(MemoryCache::new(64)), &config)
    }

    #[tokio::test]
    async fn user_bucket_drains_and_rejects() {
        let limiter = limiter(2, 100);
        assert_eq!(limiter.check_user("a@x.com").await.unwrap().remaining, 1);
        assert_eq!(limiter.check_user("a@x.com").await.unwrap().remaining, 0);
        let err = limiter.check_user("a@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
        // Another user has an independent bucket
        assert!(limiter.check_user("b@x.com").await.is_ok());
    }

    #[tokio::test]
    async fn tool_bucket_is_independent_of_user_bucket() {
        let limiter = limiter(1, 2);
        limiter.check_user("a@x.com").await.unwrap();
        assert!(limiter.check_tool("search").await.is_ok());
        assert!(limiter.check_tool("search").await.is_ok());
        assert!(limiter.check_tool("search").await.is_err());
    }
}
