// ABOUTME: Cache abstraction with in-memory and Redis backends
// ABOUTME: Also hosts the windowed counter primitive used by rate limiting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Cache Layer
//!
//! The caching contract behind catalog caches, session affinity data, and
//! rate-limit buckets: `get`, `set` (with TTL), `invalidate`,
//! `invalidate_prefix`, and `incr_within_window` (an atomic windowed counter).
//!
//! Two backends implement the contract: a bounded in-memory LRU (default) and
//! Redis (selected when `REDIS_URL` is configured). Backend choice never
//! changes semantics; tests run against the in-memory backend.

use crate::config::CacheConfig;
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// The caching contract
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    /// Store a value with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;
    /// Drop one key
    async fn invalidate(&self, key: &str) -> AppResult<()>;
    /// Drop every key beginning with `prefix`
    async fn invalidate_prefix(&self, prefix: &str) -> AppResult<()>;
    /// Increment the counter at `key`, resetting it when `window` has
    /// elapsed since the first hit. Returns the post-increment count and the
    /// seconds remaining in the window.
    async fn incr_within_window(&self, key: &str, window: Duration) -> AppResult<(u64, u64)>;
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

struct WindowEntry {
    count: u64,
    window_start: Instant,
}

/// Bounded in-memory backend
pub struct MemoryCache {
    entries: Mutex<LruCache<String, MemoryEntry>>,
    windows: Mutex<LruCache<String, WindowEntry>>,
}

impl MemoryCache {
    /// Build with a maximum entry bound
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            windows: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock_entries(&self) -> AppResult<std::sync::MutexGuard<'_, LruCache<String, MemoryEntry>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::internal("Cache mutex poisoned"))
    }

    fn lock_windows(&self) -> AppResult<std::sync::MutexGuard<'_, LruCache<String, WindowEntry>>> {
        self.windows
            .lock()
            .map_err(|_| AppError::internal("Cache mutex poisoned"))
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut entries = self.lock_entries()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut entries = self.lock_entries()?;
        entries.put(
            key.to_owned(),
            MemoryEntry {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> AppResult<()> {
        self.lock_entries()?.pop(key);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> AppResult<()> {
        let mut entries = self.lock_entries()?;
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            entries.pop(&key);
        }
        Ok(())
    }

    async fn incr_within_window(&self, key: &str, window: Duration) -> AppResult<(u64, u64)> {
        let mut windows = self.lock_windows()?;
        let now = Instant::now();
        let entry = windows.get_mut(key);
        match entry {
            Some(w) if now.duration_since(w.window_start) < window => {
                w.count += 1;
                let remaining = window.saturating_sub(now.duration_since(w.window_start));
                Ok((w.count, remaining.as_secs().max(1)))
            }
            _ => {
                windows.put(
                    key.to_owned(),
                    WindowEntry {
                        count: 1,
                        window_start: now,
                    },
                );
                Ok((1, window.as_secs().max(1)))
            }
        }
    }
}

/// Redis backend using a managed connection
pub struct RedisCache {
    connection: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis
    ///
    /// # Errors
    /// Returns `Internal` if the connection cannot be established.
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::internal(format!("Invalid Redis URL: {e}")))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::internal(format!("Redis connection failed: {e}")))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis SET failed: {e}")))
    }

    async fn invalidate(&self, key: &str) -> AppResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis DEL failed: {e}")))
    }

    async fn invalidate_prefix(&self, prefix: &str) -> AppResult<()> {
        let mut conn = self.connection.clone();
        // SCAN + DEL keeps the server responsive on large keyspaces
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{prefix}*"))
                .arg("COUNT")
                .arg(256)
                .query_async(&mut conn)
                .await
                .map_err(|e| AppError::internal(format!("Redis SCAN failed: {e}")))?;
            if !keys.is_empty() {
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| AppError::internal(format!("Redis DEL failed: {e}")))?;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn incr_within_window(&self, key: &str, window: Duration) -> AppResult<(u64, u64)> {
        let mut conn = self.connection.clone();
        let count: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis INCR failed: {e}")))?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(window.as_secs().max(1))
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| AppError::internal(format!("Redis EXPIRE failed: {e}")))?;
        }
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis TTL failed: {e}")))?;
        Ok((count, u64::try_from(ttl.max(1)).unwrap_or(1)))
    }
}

/// Build the configured backend: Redis when a URL is set, in-memory otherwise
///
/// # Errors
/// Returns an error when the configured Redis is unreachable.
pub async fn build_cache(config: &CacheConfig) -> AppResult<std::sync::Arc<dyn CacheBackend>> {
    match &config.redis_url {
        Some(url) => {
            info!("Using Redis cache backend");
            Ok(std::sync::Arc::new(RedisCache::connect(url).await?))
        }
        None => {
            info!(
                max_entries = config.max_entries,
                "Using in-memory cache backend"
            );
            Ok(std::sync::Arc::new(MemoryCache::new(config.max_entries)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_get_set_invalidate() {
        let cache = MemoryCache::new(16);
        cache
            .set("k1", "v1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k1").await.unwrap().as_deref(), Some("v1"));
        cache.invalidate("k1").await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_expiry() {
        let cache = MemoryCache::new(16);
        cache
            .set("short", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_prefix_invalidation() {
        let cache = MemoryCache::new(16);
        cache
            .set("catalog:tools:1", "a", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("catalog:tools:2", "b", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("catalog:prompts:1", "c", Duration::from_secs(60))
            .await
            .unwrap();
        cache.invalidate_prefix("catalog:tools:").await.unwrap();
        assert!(cache.get("catalog:tools:1").await.unwrap().is_none());
        assert!(cache.get("catalog:tools:2").await.unwrap().is_none());
        assert_eq!(
            cache.get("catalog:prompts:1").await.unwrap().as_deref(),
            Some("c")
        );
    }

    #[tokio::test]
    async fn windowed_counter_counts_and_resets() {
        let cache = MemoryCache::new(16);
        let window = Duration::from_millis(50);
        let (c1, _) = cache.incr_within_window("bucket", window).await.unwrap();
        let (c2, _) = cache.incr_within_window("bucket", window).await.unwrap();
        assert_eq!((c1, c2), (1, 2));
        tokio::time::sleep(Duration::from_millis(80)).await;
        let (c3, _) = cache.incr_within_window("bucket", window).await.unwrap();
        assert_eq!(c3, 1);
    }
}
