// ABOUTME: API token catalog and auth event database operations
// ABOUTME: Revocation is a jti lookup checked on every authenticated request
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::{parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{ApiToken, AuthEvent, AuthEventKind, TokenScope};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Store a new API token record
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the user already has a token with this name, or
    /// an error if the database operation fails.
    pub async fn create_api_token(&self, token: &ApiToken) -> AppResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO api_tokens (
                id, user_email, name, jti, scope, scope_ref,
                expires_at, revoked_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(token.id.to_string())
        .bind(&token.user_email)
        .bind(&token.name)
        .bind(&token.jti)
        .bind(token.scope.as_str())
        .bind(&token.scope_ref)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(AppError::conflict(
                format!("Token named '{}' already exists", token.name),
            )),
            Err(e) => Err(AppError::database(format!("Failed to create token: {e}"))),
        }
    }

    /// List a user's tokens, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn list_api_tokens(&self, user_email: &str) -> AppResult<Vec<ApiToken>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_email, name, jti, scope, scope_ref,
                   expires_at, revoked_at, created_at
            FROM api_tokens WHERE user_email = $1 ORDER BY created_at DESC
            ",
        )
        .bind(user_email)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list tokens: {e}")))?;

        rows.iter().map(Self::row_to_api_token).collect()
    }

    /// Get one token by id
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn get_api_token(&self, id: Uuid) -> AppResult<Option<ApiToken>> {
        let row = sqlx::query(
            r"
            SELECT id, user_email, name, jti, scope, scope_ref,
                   expires_at, revoked_at, created_at
            FROM api_tokens WHERE id = $1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get token: {e}")))?;

        row.as_ref().map(Self::row_to_api_token).transpose()
    }

    /// Look up a token row by its JWT id claim
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn get_api_token_by_jti(&self, jti: &str) -> AppResult<Option<ApiToken>> {
        let row = sqlx::query(
            r"
            SELECT id, user_email, name, jti, scope, scope_ref,
                   expires_at, revoked_at, created_at
            FROM api_tokens WHERE jti = $1
            ",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get token by jti: {e}")))?;

        row.as_ref().map(Self::row_to_api_token).transpose()
    }

    fn row_to_api_token(row: &SqliteRow) -> AppResult<ApiToken> {
        let id: String = row.get("id");
        let scope: String = row.get("scope");
        Ok(ApiToken {
            id: parse_uuid(&id, "api_tokens.id")?,
            user_email: row.get("user_email"),
            name: row.get("name"),
            jti: row.get("jti"),
            scope: TokenScope::parse(&scope).unwrap_or(TokenScope::All),
            scope_ref: row.get("scope_ref"),
            expires_at: row.get("expires_at"),
            revoked_at: row.get("revoked_at"),
            created_at: row.get("created_at"),
        })
    }

    /// Revoke a token. Idempotent: revoking twice keeps the first timestamp.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the token does not exist, or an error if the
    /// database update fails.
    pub async fn revoke_api_token(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE api_tokens SET revoked_at = COALESCE(revoked_at, $1) WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to revoke token: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Token {id}")));
        }
        Ok(())
    }

    /// Whether a jti in the token catalog has been revoked. Session JWTs are
    /// not in the catalog and return `false` here; their revocation runs
    /// through the user's token epoch instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn is_jti_revoked(&self, jti: &str) -> AppResult<bool> {
        let revoked: Option<bool> = sqlx::query_scalar(
            "SELECT revoked_at IS NOT NULL FROM api_tokens WHERE jti = $1",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to check revocation: {e}")))?;
        Ok(revoked.unwrap_or(false))
    }

    /// Record an authentication event
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn record_auth_event(&self, event: &AuthEvent) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO auth_events (id, user_email, event, ts, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(event.id.to_string())
        .bind(&event.user_email)
        .bind(event.event.as_str())
        .bind(event.ts)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record auth event: {e}")))?;
        Ok(())
    }

    /// Recent authentication events for a user, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn list_auth_events(&self, user_email: &str, limit: i64) -> AppResult<Vec<AuthEvent>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_email, event, ts, ip, user_agent
            FROM auth_events WHERE user_email = $1 ORDER BY ts DESC LIMIT $2
            ",
        )
        .bind(user_email)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list auth events: {e}")))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let kind: String = row.get("event");
            events.push(AuthEvent {
                id: parse_uuid(&id, "auth_events.id")?,
                user_email: row.get("user_email"),
                event: AuthEventKind::parse(&kind).unwrap_or(AuthEventKind::Fail),
                ts: row.get("ts"),
                ip: row.get("ip"),
                user_agent: row.get("user_agent"),
            });
        }
        Ok(events)
    }
}
