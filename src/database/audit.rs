// ABOUTME: Persisted audit trail for security-relevant operations
// ABOUTME: Every row carries the request_id that produced it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::{parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

/// One audit trail row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Primary key
    pub id: Uuid,
    /// Process-unique request id this event belongs to
    pub request_id: String,
    /// Acting account, when authenticated
    pub user_email: Option<String>,
    /// What happened, e.g. `tool.invoke`, `gateway.register`
    pub action: String,
    /// Affected resource, e.g. `tool:search`
    pub resource: Option<String>,
    /// `success` or `failure`
    pub result: String,
    /// Free-form detail (duration, violation code)
    pub detail: Option<String>,
    /// Event timestamp
    pub ts: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a record stamped with the current time
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        action: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: request_id.into(),
            user_email: None,
            action: action.into(),
            resource: None,
            result: result.into(),
            detail: None,
            ts: Utc::now(),
        }
    }

    /// Attach the acting account
    #[must_use]
    pub fn with_user(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    /// Attach the affected resource
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach free-form detail
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl Database {
    /// Persist an audit record
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn store_audit_record(&self, record: &AuditRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO audit_events (id, request_id, user_email, action, resource, result, detail, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(record.id.to_string())
        .bind(&record.request_id)
        .bind(&record.user_email)
        .bind(&record.action)
        .bind(&record.resource)
        .bind(&record.result)
        .bind(&record.detail)
        .bind(record.ts)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to store audit record: {e}")))?;
        Ok(())
    }

    /// Most recent audit records, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn recent_audit_records(&self, limit: i64) -> AppResult<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, request_id, user_email, action, resource, result, detail, ts
            FROM audit_events ORDER BY ts DESC LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list audit records: {e}")))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            records.push(AuditRecord {
                id: parse_uuid(&id, "audit_events.id")?,
                request_id: row.get("request_id"),
                user_email: row.get("user_email"),
                action: row.get("action"),
                resource: row.get("resource"),
                result: row.get("result"),
                detail: row.get("detail"),
                ts: row.get("ts"),
            });
        }
        Ok(records)
    }
}
