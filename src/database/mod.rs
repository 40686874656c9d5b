// ABOUTME: Relational store: pool management, schema migration, shared helpers
// ABOUTME: SQLite is the reference engine; the schema is plain ANSI SQL
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Database Layer
//!
//! One [`Database`] value owns the connection pool and exposes typed
//! operations grouped by concern:
//!
//! - `users` — accounts, lockout bookkeeping, password/epoch updates
//! - `teams` — teams, membership, invitations
//! - `tokens` — API token catalog, revocations, auth events
//! - `catalog` — the six catalog entity kinds
//! - `audit` — persisted audit trail
//!
//! All queries are runtime-bound (`sqlx::query(...).bind(...)`); rows are
//! mapped through `row_to_*` helpers. Uniqueness violations are pre-checked
//! and also backed by UNIQUE indexes so a race still surfaces as `Conflict`.

mod audit;
mod catalog;
mod teams;
mod tokens;
mod users;

pub use audit::AuditRecord;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, AppResult};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared column block on every catalog table. Written once so the six
/// CREATE TABLE statements cannot drift.
macro_rules! catalog_table {
    ($table:literal, $extra:literal) => {
        concat!(
            "CREATE TABLE IF NOT EXISTS ",
            $table,
            " (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            team_id TEXT NOT NULL,
            owner_email TEXT NOT NULL,
            visibility TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_via TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            reachable INTEGER NOT NULL DEFAULT 1,
            ",
            $extra,
            ")"
        )
    };
}

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        email TEXT PRIMARY KEY,
        full_name TEXT,
        password_hash TEXT NOT NULL,
        is_platform_admin INTEGER NOT NULL DEFAULT 0,
        is_email_verified INTEGER NOT NULL DEFAULT 0,
        failed_logins INTEGER NOT NULL DEFAULT 0,
        locked_until TEXT,
        token_epoch INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        owner_email TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE,
        visibility TEXT NOT NULL,
        is_personal INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS team_members (
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        user_email TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE,
        role TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(team_id, user_email)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS team_invitations (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        invitee_email TEXT NOT NULL,
        token TEXT NOT NULL UNIQUE,
        expires_at TEXT NOT NULL,
        used_at TEXT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS api_tokens (
        id TEXT PRIMARY KEY,
        user_email TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE,
        name TEXT NOT NULL,
        jti TEXT NOT NULL UNIQUE,
        scope TEXT NOT NULL,
        scope_ref TEXT,
        expires_at TEXT,
        revoked_at TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(user_email, name)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS auth_events (
        id TEXT PRIMARY KEY,
        user_email TEXT NOT NULL,
        event TEXT NOT NULL,
        ts TEXT NOT NULL,
        ip TEXT,
        user_agent TEXT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS audit_events (
        id TEXT PRIMARY KEY,
        request_id TEXT NOT NULL,
        user_email TEXT,
        action TEXT NOT NULL,
        resource TEXT,
        result TEXT NOT NULL,
        detail TEXT,
        ts TEXT NOT NULL
    )
    ",
    catalog_table!(
        "gateways",
        r"
        url TEXT NOT NULL,
        transport TEXT NOT NULL,
        auth_type TEXT,
        auth_value TEXT,
        capabilities TEXT NOT NULL DEFAULT '{}',
        peer_gateway_ids TEXT NOT NULL DEFAULT '[]'
        "
    ),
    catalog_table!(
        "tools",
        r"
        gateway_id TEXT REFERENCES gateways(id) ON DELETE CASCADE,
        integration_type TEXT NOT NULL,
        input_schema TEXT NOT NULL DEFAULT '{}',
        output_schema TEXT,
        annotations TEXT,
        request_type TEXT,
        base_url TEXT,
        path_template TEXT,
        query_mapping TEXT,
        header_mapping TEXT,
        timeout_ms INTEGER NOT NULL DEFAULT 20000,
        idempotent INTEGER NOT NULL DEFAULT 0,
        passthrough_headers TEXT NOT NULL DEFAULT '[]',
        allowlist TEXT,
        plugin_chain_pre TEXT NOT NULL DEFAULT '[]',
        plugin_chain_post TEXT NOT NULL DEFAULT '[]'
        "
    ),
    catalog_table!(
        "resources",
        r"
        gateway_id TEXT REFERENCES gateways(id) ON DELETE CASCADE,
        uri TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        text_content TEXT,
        blob_content BLOB
        "
    ),
    catalog_table!(
        "prompts",
        r"
        gateway_id TEXT REFERENCES gateways(id) ON DELETE CASCADE,
        template TEXT NOT NULL,
        arguments_schema TEXT NOT NULL DEFAULT '{}'
        "
    ),
    catalog_table!(
        "servers",
        r"
        icon TEXT,
        associated_tools TEXT NOT NULL DEFAULT '[]',
        associated_resources TEXT NOT NULL DEFAULT '[]',
        associated_prompts TEXT NOT NULL DEFAULT '[]',
        associated_a2a_agents TEXT NOT NULL DEFAULT '[]'
        "
    ),
    catalog_table!(
        "a2a_agents",
        r"
        endpoint TEXT NOT NULL,
        protocol_version TEXT NOT NULL,
        auth_type TEXT,
        auth_value TEXT,
        slug TEXT NOT NULL
        "
    ),
    r"CREATE INDEX IF NOT EXISTS ix_tools_gateway ON tools(gateway_id)",
    // NULL gateway_id rows (local tools) collapse to '' so local names are
    // unique among themselves, matching the (gateway_id, name) key
    r"CREATE UNIQUE INDEX IF NOT EXISTS ux_tools_gateway_name
      ON tools(COALESCE(gateway_id, ''), name)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS ux_gateways_team_url ON gateways(team_id, url)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS ux_resources_scope_uri
      ON resources(team_id, owner_email, uri)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS ux_prompts_scope_name
      ON prompts(team_id, owner_email, name)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS ux_servers_scope_name
      ON servers(team_id, owner_email, name)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS ux_a2a_scope_slug
      ON a2a_agents(team_id, owner_email, slug)",
    r"CREATE INDEX IF NOT EXISTS ix_auth_events_user ON auth_events(user_email, ts)",
    r"CREATE INDEX IF NOT EXISTS ix_audit_events_request ON audit_events(request_id)",
];

/// Handle to the relational store
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Connect and migrate, retrying transient startup failures per config
    ///
    /// # Errors
    /// Returns an error when the database stays unreachable after the
    /// configured retries, or migration fails.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| AppError::database(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database exists per connection; a wider pool would
        // hand out fresh empty databases
        let is_memory = config.url.contains(":memory:");
        let max_connections = if is_memory { 1 } else { config.max_connections };

        let mut attempt = 0;
        let pool = loop {
            attempt += 1;
            let result = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
                .connect_with(options.clone())
                .await;
            match result {
                Ok(pool) => break pool,
                Err(e) if attempt <= config.connect_retries => {
                    warn!(attempt, error = %e, "Database connect failed, retrying");
                    tokio::time::sleep(Duration::from_secs(config.connect_retry_interval_secs))
                        .await;
                }
                Err(e) => {
                    return Err(AppError::database(format!(
                        "Database unreachable after {attempt} attempts: {e}"
                    )))
                }
            }
        };

        let db = Self { pool };
        db.migrate().await?;
        info!("Database connected and migrated");
        Ok(db)
    }

    /// Liveness probe used by the readiness endpoint
    ///
    /// # Errors
    /// Returns an error when the pool cannot execute a trivial query.
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Ping failed: {e}")))?;
        Ok(())
    }

    /// Create the schema. Idempotent; executed at startup.
    ///
    /// # Errors
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Migration failed: {e}")))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared row helpers
// ---------------------------------------------------------------------------

/// Parse a TEXT column holding a UUID
pub(crate) fn parse_uuid(value: &str, column: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| AppError::internal(format!("Corrupt UUID in column {column}: {e}")))
}

/// Decode a JSON TEXT column into a `Value`, treating NULL/empty as Null
pub(crate) fn parse_json(value: Option<String>) -> Value {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .and_then(|v| serde_json::from_str(v).ok())
        .unwrap_or(Value::Null)
}

/// Decode a JSON TEXT column into a string vec
pub(crate) fn parse_string_vec(value: Option<String>) -> Vec<String> {
    value
        .as_deref()
        .and_then(|v| serde_json::from_str(v).ok())
        .unwrap_or_default()
}

/// Decode a JSON TEXT column into a UUID vec, dropping corrupt entries
pub(crate) fn parse_uuid_vec(value: Option<String>) -> Vec<Uuid> {
    parse_string_vec(value)
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}

/// Encode a serializable value as a JSON TEXT column
pub(crate) fn to_json_text<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::internal(format!("JSON encode failed: {e}")))
}

/// Encode a UUID vec as a JSON TEXT column
pub(crate) fn uuids_to_json_text(ids: &[Uuid]) -> AppResult<String> {
    let strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    to_json_text(&strings)
}
