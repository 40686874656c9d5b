// ABOUTME: Application constants shared across gateway components
// ABOUTME: Protocol identifiers, default timeouts, limits, and violation codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

/// Protocol-level constants
pub mod protocol {
    /// JSON-RPC version string carried on every envelope
    pub const JSONRPC_VERSION: &str = "2.0";
    /// Latest MCP protocol revision this gateway speaks
    pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
    /// Protocol revisions the gateway will negotiate down to
    pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];
    /// Session header for Streamable HTTP transport
    pub const MCP_SESSION_HEADER: &str = "mcp-session-id";
    /// Separator between a gateway name and a federated tool name
    pub const QUALIFIED_NAME_SEPARATOR: &str = "-";
}

/// Identification reported in MCP `serverInfo`
pub mod server_info {
    /// Server name advertised during initialize
    pub const NAME: &str = "mcp-gateway";
    /// Server version advertised during initialize
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Default timeouts (overridable via environment configuration)
pub mod timeouts {
    /// Per-tool invocation timeout
    pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 20_000;
    /// Per-plugin hook timeout
    pub const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 30;
    /// External plugin round-trip timeout
    pub const DEFAULT_EXTERNAL_PLUGIN_TIMEOUT_SECS: u64 = 30;
    /// Elicitation wait before failing closed
    pub const DEFAULT_ELICITATION_TIMEOUT_SECS: u64 = 300;
    /// Peer gateway health probe timeout
    pub const DEFAULT_PEER_HEALTH_TIMEOUT_SECS: u64 = 10;
    /// Federation handshake timeout
    pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
    /// Idle session eviction
    pub const DEFAULT_SESSION_IDLE_SECS: u64 = 3_600;
    /// SSE keepalive cadence
    pub const DEFAULT_SSE_KEEPALIVE_SECS: u64 = 30;
    /// Grace period for cancellation to reach in-flight upstream calls
    pub const CANCELLATION_GRACE_MS: u64 = 1_000;
}

/// Default limits and thresholds
pub mod limits {
    /// Dispatcher retry ceiling
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Federation health-probe interval
    pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;
    /// Consecutive probe failures before a peer is marked unreachable
    pub const DEFAULT_HEALTH_FAILURE_THRESHOLD: u32 = 3;
    /// Failed logins before an account locks
    pub const DEFAULT_MAX_FAILED_LOGINS: u32 = 5;
    /// Minutes an account stays locked
    pub const DEFAULT_LOCKOUT_MINUTES: i64 = 30;
    /// Default page size for list endpoints
    pub const DEFAULT_PAGE_SIZE: u64 = 50;
    /// Upper bound on requested page sizes
    pub const MAX_PAGE_SIZE: u64 = 500;
    /// Row count above which list endpoints switch to cursor pagination
    pub const DEFAULT_CURSOR_THRESHOLD: u64 = 10_000;
    /// JWT lifetime for interactive sessions
    pub const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;
    /// Team invitation lifetime
    pub const INVITATION_TTL_HOURS: i64 = 72;
    /// Max in-flight upstream calls per (peer, host) pool
    pub const DEFAULT_POOL_MAX_IN_FLIGHT: usize = 32;
    /// Default per-tool token bucket: requests per minute
    pub const DEFAULT_TOOL_RATE_PER_MINUTE: u32 = 600;
    /// Default per-user token bucket: requests per minute
    pub const DEFAULT_USER_RATE_PER_MINUTE: u32 = 1_200;
    /// Grace period before disabled federated entities are purged
    pub const FEDERATION_PURGE_GRACE_SECS: u64 = 86_400;
}

/// Stable violation codes carried on `PolicyDenied` errors
pub mod violation_codes {
    /// REST tool resolved to a host outside its allowlist
    pub const TOOL_HOST_NOT_ALLOWED: &str = "TOOL_HOST_NOT_ALLOWED";
    /// A peer registration would create a federation cycle
    pub const FEDERATION_LOOP_DETECTED: &str = "FEDERATION_LOOP_DETECTED";
    /// A passthrough header was requested that the gateway never forwards
    pub const PASSTHROUGH_HEADER_DENIED: &str = "PASSTHROUGH_HEADER_DENIED";
    /// An elicitation timed out and the plugin fails closed
    pub const ELICITATION_TIMEOUT: &str = "ELICITATION_TIMEOUT";
    /// The client declined an elicitation required by policy
    pub const ELICITATION_DECLINED: &str = "ELICITATION_DECLINED";
    /// Deleting an entity that federation peers still depend on
    pub const FEDERATION_DEPENDENTS_EXIST: &str = "FEDERATION_DEPENDENTS_EXIST";
}

/// Prefix used when auto-creating a user's personal team
pub const PERSONAL_TEAM_PREFIX: &str = "personal-";

/// Headers the dispatcher never forwards upstream, regardless of tool config.
/// `authorization` may be forwarded only when explicitly whitelisted.
pub const BLOCKED_PASSTHROUGH_HEADERS: &[&str] = &["cookie", "set-cookie", "host"];

/// Prefix for gateway-internal headers, never forwarded upstream
pub const INTERNAL_HEADER_PREFIX: &str = "mcp-";
