// ABOUTME: Environment-driven configuration for the gateway process
// ABOUTME: Immutable after startup; carried inside AppState, never global
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Gateway Configuration
//!
//! Twelve-factor configuration loaded once from the environment at startup.
//! Every knob has a safe default so `GatewayConfig::from_env()` succeeds in a
//! bare environment (in-memory SQLite, in-memory cache). Missing auth secrets
//! are an error for HMAC algorithms rather than silently substituted.

use crate::constants::{limits, timeouts};
use crate::errors::{AppError, AppResult};
use std::env;
use std::time::Duration;

/// JWT signing algorithm families the gateway accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    /// HMAC-SHA256
    HS256,
    /// HMAC-SHA384
    HS384,
    /// HMAC-SHA512
    HS512,
    /// RSA-SHA256
    RS256,
    /// RSA-SHA384
    RS384,
    /// RSA-SHA512
    RS512,
    /// ECDSA P-256
    ES256,
    /// ECDSA P-384
    ES384,
}

impl JwtAlgorithm {
    /// Parse the configured algorithm name
    ///
    /// # Errors
    /// Returns `InvalidRequest` for unknown algorithm names.
    pub fn parse(name: &str) -> AppResult<Self> {
        match name.to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            "ES256" => Ok(Self::ES256),
            "ES384" => Ok(Self::ES384),
            other => Err(AppError::invalid_input(format!(
                "Unsupported JWT algorithm: {other}"
            ))),
        }
    }

    /// Whether this algorithm uses a shared secret (HMAC family)
    #[must_use]
    pub const fn is_symmetric(&self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    /// The matching `jsonwebtoken` algorithm
    #[must_use]
    pub const fn as_jwt(&self) -> jsonwebtoken::Algorithm {
        use jsonwebtoken::Algorithm as A;
        match self {
            Self::HS256 => A::HS256,
            Self::HS384 => A::HS384,
            Self::HS512 => A::HS512,
            Self::RS256 => A::RS256,
            Self::RS384 => A::RS384,
            Self::RS512 => A::RS512,
            Self::ES256 => A::ES256,
            Self::ES384 => A::ES384,
        }
    }
}

/// Authentication and token issuance settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Signing algorithm for issued JWTs
    pub algorithm: JwtAlgorithm,
    /// Shared secret (HMAC family)
    pub secret: Option<String>,
    /// PEM-encoded private key (RSA/ECDSA families)
    pub private_key_pem: Option<String>,
    /// PEM-encoded public key (RSA/ECDSA families)
    pub public_key_pem: Option<String>,
    /// Required audience claim
    pub audience: String,
    /// Required issuer claim
    pub issuer: String,
    /// Lifetime of interactive session tokens
    pub token_ttl_secs: u64,
    /// Consecutive failed logins before lockout
    pub max_failed_logins: u32,
    /// Lockout duration in minutes
    pub lockout_minutes: i64,
    /// Email domains whose SSO users become platform admins
    pub sso_admin_domains: Vec<String>,
}

/// Database connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// Acquire timeout
    pub acquire_timeout_secs: u64,
    /// Retry attempts for transient startup failures
    pub connect_retries: u32,
    /// Delay between connect retries
    pub connect_retry_interval_secs: u64,
}

/// Cache backend settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL; `None` selects the in-memory backend
    pub redis_url: Option<String>,
    /// Default TTL for cached entries
    pub default_ttl_secs: u64,
    /// Bound on the in-memory backend
    pub max_entries: usize,
}

/// HTTP server and transport settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address
    pub bind_address: String,
    /// Listen port
    pub port: u16,
    /// Base path for all routes
    pub base_path: String,
    /// Idle session eviction
    pub session_idle_timeout: Duration,
    /// SSE keepalive interval
    pub sse_keepalive: Duration,
}

/// Dispatcher defaults
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Default tool timeout when the tool row has none
    pub default_tool_timeout_ms: u64,
    /// Global retry ceiling
    pub max_retries: u32,
    /// Max in-flight calls per (peer, host) pool
    pub pool_max_in_flight: usize,
    /// Per-tool token bucket rate (requests per minute)
    pub tool_rate_per_minute: u32,
    /// Per-user token bucket rate (requests per minute)
    pub user_rate_per_minute: u32,
}

/// Federation manager settings
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Probe interval for the health loop
    pub health_interval: Duration,
    /// Probe timeout
    pub health_timeout: Duration,
    /// Consecutive failures before a peer is marked unreachable
    pub failure_threshold: u32,
    /// Handshake timeout during registration
    pub handshake_timeout: Duration,
    /// Re-sync interval for catalog reconciliation
    pub sync_interval: Duration,
}

/// Plugin framework settings
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Master enable flag
    pub enabled: bool,
    /// Path to the plugin manifest file
    pub config_path: Option<String>,
    /// Per-hook timeout
    pub plugin_timeout: Duration,
    /// External plugin round-trip timeout
    pub external_timeout: Duration,
    /// When true, any plugin exception is a fatal `PluginError`
    pub fail_on_plugin_error: bool,
    /// Elicitation wait before failing closed
    pub elicitation_timeout: Duration,
}

/// Pagination settings
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Default page size
    pub default_page_size: u64,
    /// Hard cap on requested page sizes
    pub max_page_size: u64,
    /// Row count above which cursor pagination is selected
    pub cursor_threshold: u64,
}

/// Full gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Auth and token settings
    pub auth: AuthConfig,
    /// Database settings
    pub database: DatabaseConfig,
    /// Cache settings
    pub cache: CacheConfig,
    /// HTTP and transport settings
    pub http: HttpConfig,
    /// Dispatcher settings
    pub dispatch: DispatchConfig,
    /// Federation settings
    pub federation: FederationConfig,
    /// Plugin framework settings
    pub plugins: PluginConfig,
    /// Pagination settings
    pub pagination: PaginationConfig,
    /// Base64-encoded 32-byte key for at-rest credential encryption
    pub encryption_key_b64: Option<String>,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().map_or(default, |v| {
        matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

impl GatewayConfig {
    /// Load configuration from the environment
    ///
    /// # Errors
    /// Returns an error if the configured JWT algorithm is unknown, or if an
    /// HMAC algorithm is selected without `MCPGATEWAY_JWT_SECRET`.
    pub fn from_env() -> AppResult<Self> {
        let algorithm = JwtAlgorithm::parse(&env_string("MCPGATEWAY_JWT_ALGORITHM", "HS256"))?;
        let secret = env_opt("MCPGATEWAY_JWT_SECRET");
        if algorithm.is_symmetric() && secret.is_none() {
            return Err(AppError::invalid_input(
                "MCPGATEWAY_JWT_SECRET is required for HMAC JWT algorithms",
            ));
        }

        let auth = AuthConfig {
            algorithm,
            secret,
            private_key_pem: env_opt("MCPGATEWAY_JWT_PRIVATE_KEY"),
            public_key_pem: env_opt("MCPGATEWAY_JWT_PUBLIC_KEY"),
            audience: env_string("MCPGATEWAY_JWT_AUDIENCE", "mcp-gateway"),
            issuer: env_string("MCPGATEWAY_JWT_ISSUER", "mcp-gateway"),
            token_ttl_secs: env_parse("MCPGATEWAY_TOKEN_TTL_SECS", limits::DEFAULT_TOKEN_TTL_SECS),
            max_failed_logins: env_parse(
                "MCPGATEWAY_MAX_FAILED_LOGINS",
                limits::DEFAULT_MAX_FAILED_LOGINS,
            ),
            lockout_minutes: env_parse(
                "MCPGATEWAY_LOCKOUT_MINUTES",
                limits::DEFAULT_LOCKOUT_MINUTES,
            ),
            sso_admin_domains: env_opt("MCPGATEWAY_SSO_ADMIN_DOMAINS")
                .map(|v| v.split(',').map(|s| s.trim().to_owned()).collect())
                .unwrap_or_default(),
        };

        let database = DatabaseConfig {
            url: env_string("DATABASE_URL", "sqlite::memory:"),
            max_connections: env_parse("MCPGATEWAY_DB_POOL_SIZE", 10),
            acquire_timeout_secs: env_parse("MCPGATEWAY_DB_TIMEOUT_SECS", 30),
            connect_retries: env_parse("MCPGATEWAY_DB_RETRIES", 3),
            connect_retry_interval_secs: env_parse("MCPGATEWAY_DB_RETRY_INTERVAL_SECS", 2),
        };

        let cache = CacheConfig {
            redis_url: env_opt("REDIS_URL"),
            default_ttl_secs: env_parse("MCPGATEWAY_CACHE_TTL_SECS", 300),
            max_entries: env_parse("MCPGATEWAY_CACHE_MAX_ENTRIES", 10_000),
        };

        let http = HttpConfig {
            bind_address: env_string("MCPGATEWAY_BIND_ADDRESS", "0.0.0.0"),
            port: env_parse("MCPGATEWAY_HTTP_PORT", 4444),
            base_path: env_string("MCPGATEWAY_BASE_PATH", "/"),
            session_idle_timeout: Duration::from_secs(env_parse(
                "MCPGATEWAY_SESSION_IDLE_SECS",
                timeouts::DEFAULT_SESSION_IDLE_SECS,
            )),
            sse_keepalive: Duration::from_secs(env_parse(
                "MCPGATEWAY_SSE_KEEPALIVE_SECS",
                timeouts::DEFAULT_SSE_KEEPALIVE_SECS,
            )),
        };

        let dispatch = DispatchConfig {
            default_tool_timeout_ms: env_parse(
                "MCPGATEWAY_TOOL_TIMEOUT_MS",
                timeouts::DEFAULT_TOOL_TIMEOUT_MS,
            ),
            max_retries: env_parse("MCPGATEWAY_MAX_RETRIES", limits::DEFAULT_MAX_RETRIES),
            pool_max_in_flight: env_parse(
                "MCPGATEWAY_POOL_MAX_IN_FLIGHT",
                limits::DEFAULT_POOL_MAX_IN_FLIGHT,
            ),
            tool_rate_per_minute: env_parse(
                "MCPGATEWAY_TOOL_RATE_PER_MINUTE",
                limits::DEFAULT_TOOL_RATE_PER_MINUTE,
            ),
            user_rate_per_minute: env_parse(
                "MCPGATEWAY_USER_RATE_PER_MINUTE",
                limits::DEFAULT_USER_RATE_PER_MINUTE,
            ),
        };

        let federation = FederationConfig {
            health_interval: Duration::from_secs(env_parse(
                "MCPGATEWAY_HEALTH_INTERVAL_SECS",
                limits::DEFAULT_HEALTH_INTERVAL_SECS,
            )),
            health_timeout: Duration::from_secs(env_parse(
                "MCPGATEWAY_HEALTH_TIMEOUT_SECS",
                timeouts::DEFAULT_PEER_HEALTH_TIMEOUT_SECS,
            )),
            failure_threshold: env_parse(
                "MCPGATEWAY_HEALTH_FAILURE_THRESHOLD",
                limits::DEFAULT_HEALTH_FAILURE_THRESHOLD,
            ),
            handshake_timeout: Duration::from_secs(env_parse(
                "MCPGATEWAY_HANDSHAKE_TIMEOUT_SECS",
                timeouts::DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            )),
            sync_interval: Duration::from_secs(env_parse("MCPGATEWAY_SYNC_INTERVAL_SECS", 300)),
        };

        let plugins = PluginConfig {
            enabled: env_bool("MCPGATEWAY_PLUGINS_ENABLED", true),
            config_path: env_opt("MCPGATEWAY_PLUGIN_CONFIG"),
            plugin_timeout: Duration::from_secs(env_parse(
                "MCPGATEWAY_PLUGIN_TIMEOUT_SECS",
                timeouts::DEFAULT_PLUGIN_TIMEOUT_SECS,
            )),
            external_timeout: Duration::from_secs(env_parse(
                "MCPGATEWAY_EXTERNAL_PLUGIN_TIMEOUT_SECS",
                timeouts::DEFAULT_EXTERNAL_PLUGIN_TIMEOUT_SECS,
            )),
            fail_on_plugin_error: env_bool("MCPGATEWAY_FAIL_ON_PLUGIN_ERROR", false),
            elicitation_timeout: Duration::from_secs(env_parse(
                "MCPGATEWAY_ELICITATION_TIMEOUT_SECS",
                timeouts::DEFAULT_ELICITATION_TIMEOUT_SECS,
            )),
        };

        let pagination = PaginationConfig {
            default_page_size: env_parse("MCPGATEWAY_PAGE_SIZE", limits::DEFAULT_PAGE_SIZE),
            max_page_size: env_parse("MCPGATEWAY_MAX_PAGE_SIZE", limits::MAX_PAGE_SIZE),
            cursor_threshold: env_parse(
                "MCPGATEWAY_CURSOR_THRESHOLD",
                limits::DEFAULT_CURSOR_THRESHOLD,
            ),
        };

        Ok(Self {
            auth,
            database,
            cache,
            http,
            dispatch,
            federation,
            plugins,
            pagination,
            encryption_key_b64: env_opt("MCPGATEWAY_ENCRYPTION_KEY"),
        })
    }
}

impl Default for GatewayConfig {
    /// Defaults suitable for tests: in-memory SQLite, in-memory cache, HS256
    /// with a fixed development secret.
    fn default() -> Self {
        Self {
            auth: AuthConfig {
                algorithm: JwtAlgorithm::HS256,
                secret: Some("dev-secret-change-me".to_owned()),
                private_key_pem: None,
                public_key_pem: None,
                audience: "mcp-gateway".to_owned(),
                issuer: "mcp-gateway".to_owned(),
                token_ttl_secs: limits::DEFAULT_TOKEN_TTL_SECS,
                max_failed_logins: limits::DEFAULT_MAX_FAILED_LOGINS,
                lockout_minutes: limits::DEFAULT_LOCKOUT_MINUTES,
                sso_admin_domains: Vec::new(),
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_owned(),
                max_connections: 5,
                acquire_timeout_secs: 30,
                connect_retries: 1,
                connect_retry_interval_secs: 1,
            },
            cache: CacheConfig {
                redis_url: None,
                default_ttl_secs: 300,
                max_entries: 1_000,
            },
            http: HttpConfig {
                bind_address: "127.0.0.1".to_owned(),
                port: 4444,
                base_path: "/".to_owned(),
                session_idle_timeout: Duration::from_secs(timeouts::DEFAULT_SESSION_IDLE_SECS),
                sse_keepalive: Duration::from_secs(timeouts::DEFAULT_SSE_KEEPALIVE_SECS),
            },
            dispatch: DispatchConfig {
                default_tool_timeout_ms: timeouts::DEFAULT_TOOL_TIMEOUT_MS,
                max_retries: limits::DEFAULT_MAX_RETRIES,
                pool_max_in_flight: limits::DEFAULT_POOL_MAX_IN_FLIGHT,
                tool_rate_per_minute: limits::DEFAULT_TOOL_RATE_PER_MINUTE,
                user_rate_per_minute: limits::DEFAULT_USER_RATE_PER_MINUTE,
            },
            federation: FederationConfig {
                health_interval: Duration::from_secs(limits::DEFAULT_HEALTH_INTERVAL_SECS),
                health_timeout: Duration::from_secs(timeouts::DEFAULT_PEER_HEALTH_TIMEOUT_SECS),
                failure_threshold: limits::DEFAULT_HEALTH_FAILURE_THRESHOLD,
                handshake_timeout: Duration::from_secs(timeouts::DEFAULT_HANDSHAKE_TIMEOUT_SECS),
                sync_interval: Duration::from_secs(300),
            },
            plugins: PluginConfig {
                enabled: true,
                config_path: None,
                plugin_timeout: Duration::from_secs(timeouts::DEFAULT_PLUGIN_TIMEOUT_SECS),
                external_timeout: Duration::from_secs(
                    timeouts::DEFAULT_EXTERNAL_PLUGIN_TIMEOUT_SECS,
                ),
                fail_on_plugin_error: false,
                elicitation_timeout: Duration::from_secs(
                    timeouts::DEFAULT_ELICITATION_TIMEOUT_SECS,
                ),
            },
            pagination: PaginationConfig {
                default_page_size: limits::DEFAULT_PAGE_SIZE,
                max_page_size: limits::MAX_PAGE_SIZE,
                cursor_threshold: limits::DEFAULT_CURSOR_THRESHOLD,
            },
            encryption_key_b64: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn jwt_algorithm_parsing() {
        assert_eq!(JwtAlgorithm::parse("hs256").unwrap(), JwtAlgorithm::HS256);
        assert_eq!(JwtAlgorithm::parse("ES384").unwrap(), JwtAlgorithm::ES384);
        assert!(JwtAlgorithm::parse("none").is_err());
    }

    #[test]
    fn symmetric_detection() {
        assert!(JwtAlgorithm::HS512.is_symmetric());
        assert!(!JwtAlgorithm::RS256.is_symmetric());
    }

    #[test]
    fn default_config_is_test_ready() {
        let config = GatewayConfig::default();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert!(config.cache.redis_url.is_none());
        assert_eq!(config.dispatch.default_tool_timeout_ms, 20_000);
    }
}
