// ABOUTME: Unified error handling with the gateway error taxonomy
// ABOUTME: Maps every error kind to a JSON-RPC code and an HTTP status
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Unified Error Handling
//!
//! Every fallible operation in the gateway returns [`AppResult`]. The
//! [`AppError`] kinds mirror the protocol error taxonomy: each kind carries a
//! fixed JSON-RPC error code and HTTP status so that the same failure renders
//! identically on the MCP surface and the admin REST surface.
//!
//! Policy violations additionally carry a stable machine-readable `code`
//! (for example `FEDERATION_LOOP_DETECTED`) that clients may branch on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Result alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// JSON-RPC error codes reserved by the gateway
pub mod rpc_codes {
    /// Malformed JSON-RPC envelope
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method, or tool hidden by virtual-server scoping
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Missing or malformed params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Unexpected internal failure
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Missing or invalid credentials
    pub const AUTH_REQUIRED: i32 = -32001;
    /// Authenticated but not allowed
    pub const FORBIDDEN: i32 = -32002;
    /// Plugin violation, allowlist, or passthrough restriction
    pub const POLICY_DENIED: i32 = -32003;
    /// Entity does not exist or is not visible
    pub const NOT_FOUND: i32 = -32004;
    /// Uniqueness or dependency violation
    pub const CONFLICT: i32 = -32005;
    /// Tool or peer gateway returned an error
    pub const UPSTREAM_ERROR: i32 = -32010;
    /// A bounded wait was exceeded
    pub const TIMEOUT: i32 = -32011;
    /// Client or admin cancelled the request
    pub const CANCELLED: i32 = -32012;
    /// Too many requests
    pub const RATE_LIMITED: i32 = -32013;
    /// Plugin failed while fail_on_plugin_error was set
    pub const PLUGIN_ERROR: i32 = -32020;
}

/// Unified application error
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed JSON-RPC or missing params
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown MCP method, or tool hidden by virtual-server scoping
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// No or invalid credentials
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Plugin violation, allowlist, or passthrough restriction
    #[error("Policy denied [{code}]: {reason}")]
    PolicyDenied {
        /// Stable machine-readable violation code
        code: String,
        /// Human-readable reason
        reason: String,
    },

    /// Entity does not exist or is not visible to the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness or dependency violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Tool or peer gateway returned an error
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// A bounded wait was exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Client or admin cancelled the request
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Too many requests; retry after the given number of seconds
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the bucket refills enough to admit the request
        retry_after_secs: u64,
    },

    /// Unexpected bug; details are logged, not echoed to clients
    #[error("Internal error: {0}")]
    Internal(String),

    /// Plugin failed while fail_on_plugin_error was enabled
    #[error("Plugin error: {0}")]
    PluginError(String),
}

impl AppError {
    /// Invalid request / params
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Unknown method or scoped-out tool
    pub fn method_not_found(msg: impl Into<String>) -> Self {
        Self::MethodNotFound(msg.into())
    }

    /// Missing or invalid credentials
    pub fn auth_required(msg: impl Into<String>) -> Self {
        Self::AuthRequired(msg.into())
    }

    /// Authenticated but not allowed
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Policy violation with a stable code
    pub fn policy_denied(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PolicyDenied {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Entity missing or invisible
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Uniqueness or dependency violation
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Upstream tool or peer failure
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamError(msg.into())
    }

    /// Bounded wait exceeded
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Request cancelled by client or admin
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Too many requests
    #[must_use]
    pub const fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Unexpected internal failure
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Database failure (internal taxonomy kind, distinct message prefix)
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Internal(format!("database: {}", msg.into()))
    }

    /// Plugin failure surfaced because fail_on_plugin_error is set
    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::PluginError(msg.into())
    }

    /// The JSON-RPC error code for this kind
    #[must_use]
    pub const fn rpc_code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => rpc_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => rpc_codes::METHOD_NOT_FOUND,
            Self::AuthRequired(_) => rpc_codes::AUTH_REQUIRED,
            Self::Forbidden(_) => rpc_codes::FORBIDDEN,
            Self::PolicyDenied { .. } => rpc_codes::POLICY_DENIED,
            Self::NotFound(_) => rpc_codes::NOT_FOUND,
            Self::Conflict(_) => rpc_codes::CONFLICT,
            Self::UpstreamError(_) => rpc_codes::UPSTREAM_ERROR,
            Self::Timeout(_) => rpc_codes::TIMEOUT,
            Self::Cancelled(_) => rpc_codes::CANCELLED,
            Self::RateLimited { .. } => rpc_codes::RATE_LIMITED,
            Self::Internal(_) => rpc_codes::INTERNAL_ERROR,
            Self::PluginError(_) => rpc_codes::PLUGIN_ERROR,
        }
    }

    /// The HTTP status for this kind
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::PolicyDenied { .. } => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // 499 (client closed request) is non-standard; StatusCode supports it
            Self::Cancelled(_) => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) | Self::PluginError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to echo to clients. Internal errors are redacted.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_owned(),
            other => other.to_string(),
        }
    }

    /// The stable violation code, when this is a policy denial
    #[must_use]
    pub fn violation_code(&self) -> Option<&str> {
        match self {
            Self::PolicyDenied { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether a dispatcher retry could succeed for this error
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamError(_) | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }
}

/// Wire shape of an error on the admin REST surface
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    violation_code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = ErrorBody {
            error: self.client_message(),
            code: self.rpc_code(),
            violation_code: self.violation_code().map(str::to_owned),
        };

        if let Self::RateLimited { retry_after_secs } = &self {
            let mut response = (
                status,
                Json(json!({
                    "error": body.error,
                    "code": body.code,
                    "retry_after": retry_after_secs,
                })),
            )
                .into_response();
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
            return response;
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found("Row not found"),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::conflict("Uniqueness constraint violated")
            }
            _ => Self::database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_input(format!("JSON error: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("Upstream request timed out: {err}"))
        } else {
            Self::upstream(err.to_string())
        }
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        Self::invalid_input(format!("Invalid UUID: {err}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn rpc_codes_match_taxonomy() {
        assert_eq!(AppError::invalid_input("x").rpc_code(), -32600);
        assert_eq!(AppError::method_not_found("x").rpc_code(), -32601);
        assert_eq!(AppError::auth_required("x").rpc_code(), -32001);
        assert_eq!(AppError::forbidden("x").rpc_code(), -32002);
        assert_eq!(AppError::policy_denied("C", "r").rpc_code(), -32003);
        assert_eq!(AppError::not_found("x").rpc_code(), -32004);
        assert_eq!(AppError::conflict("x").rpc_code(), -32005);
        assert_eq!(AppError::upstream("x").rpc_code(), -32010);
        assert_eq!(AppError::timeout("x").rpc_code(), -32011);
        assert_eq!(AppError::cancelled("x").rpc_code(), -32012);
        assert_eq!(AppError::rate_limited(1).rpc_code(), -32013);
        assert_eq!(AppError::internal("x").rpc_code(), -32603);
        assert_eq!(AppError::plugin("x").rpc_code(), -32020);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            AppError::auth_required("x").http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::policy_denied("C", "r").http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::conflict("x").http_status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::upstream("x").http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(AppError::cancelled("x").http_status().as_u16(), 499);
        assert_eq!(
            AppError::rate_limited(5).http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn internal_errors_are_redacted() {
        let err = AppError::database("secret connection string leaked");
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn violation_code_is_exposed() {
        let err = AppError::policy_denied("FEDERATION_LOOP_DETECTED", "peer loops back");
        assert_eq!(err.violation_code(), Some("FEDERATION_LOOP_DETECTED"));
    }
}
