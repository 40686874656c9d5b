// ABOUTME: JSON-RPC 2.0 envelope types shared by every transport
// ABOUTME: Request, response, notification framing and error conversion
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # JSON-RPC 2.0 Foundation
//!
//! All three client transports (stdio, SSE, Streamable HTTP), the federation
//! client, and the translation bridge share these envelope types. The
//! dispatcher and protocol engine only ever see [`JsonRpcRequest`] values;
//! transports are responsible for framing.

use crate::constants::protocol::JSONRPC_VERSION;
use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request or notification (notification when `id` is absent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request id; absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name, e.g. `tools/call`
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request with the given id
    #[must_use]
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification (no id, no response expected)
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Whether this envelope is a notification
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validate the envelope shape
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the version marker is wrong or the method
    /// is empty.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(AppError::invalid_input(format!(
                "Unsupported jsonrpc version: {}",
                self.jsonrpc
            )));
        }
        if self.method.is_empty() {
            return Err(AppError::invalid_input("Missing method"));
        }
        Ok(())
    }
}

/// A JSON-RPC response carrying either a result or an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Mirrors the request id (null when the request id was unparseable)
    pub id: Value,
    /// Success payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Error response built from an [`AppError`]
    #[must_use]
    pub fn from_app_error(id: Value, err: &AppError) -> Self {
        Self::error(id, JsonRpcError::from_app_error(err))
    }

    /// Whether this response reports success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code (see [`crate::errors::rpc_codes`])
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Build an error object
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Map an [`AppError`] into its wire shape. Internal details are redacted
    /// and policy violations carry their stable code in `data`.
    #[must_use]
    pub fn from_app_error(err: &AppError) -> Self {
        let data = err
            .violation_code()
            .map(|code| serde_json::json!({ "violation_code": code }));
        Self {
            code: err.rpc_code(),
            message: err.client_message(),
            data,
        }
    }
}

/// Either a single message or a batch, as allowed by JSON-RPC 2.0
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcFrame {
    /// A single request/notification
    Single(JsonRpcRequest),
    /// A batch of requests/notifications
    Batch(Vec<JsonRpcRequest>),
}

/// Parse one newline-delimited frame into requests
///
/// # Errors
/// Returns `InvalidRequest` if the line is not valid JSON-RPC.
pub fn parse_frame(line: &str) -> Result<Vec<JsonRpcRequest>, AppError> {
    let frame: JsonRpcFrame = serde_json::from_str(line)
        .map_err(|e| AppError::invalid_input(format!("Malformed JSON-RPC frame: {e}")))?;
    let requests = match frame {
        JsonRpcFrame::Single(req) => vec![req],
        JsonRpcFrame::Batch(reqs) => {
            if reqs.is_empty() {
                return Err(AppError::invalid_input("Empty JSON-RPC batch"));
            }
            reqs
        }
    };
    for req in &requests {
        req.validate()?;
    }
    Ok(requests)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip() {
        let req = JsonRpcRequest::new(json!(1), "tools/list", Some(json!({"cursor": null})));
        let text = serde_json::to_string(&req).unwrap();
        let back: JsonRpcRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back.method, "tools/list");
        assert_eq!(back.id, Some(json!(1)));
    }

    #[test]
    fn notification_has_no_id_field() {
        let note = JsonRpcRequest::notification("notifications/initialized", None);
        let text = serde_json::to_string(&note).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(note.is_notification());
    }

    #[test]
    fn parse_frame_rejects_bad_version() {
        let err = parse_frame(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.rpc_code(), crate::errors::rpc_codes::INVALID_REQUEST);
    }

    #[test]
    fn parse_frame_accepts_batch() {
        let reqs = parse_frame(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"}]"#,
        )
        .unwrap();
        assert_eq!(reqs.len(), 2);
        assert!(reqs[1].is_notification());
    }

    #[test]
    fn app_error_redacted_on_wire() {
        let err = AppError::database("dsn=postgres://secret");
        let wire = JsonRpcError::from_app_error(&err);
        assert_eq!(wire.code, -32603);
        assert_eq!(wire.message, "Internal server error");
    }

    #[test]
    fn violation_code_lands_in_data() {
        let err = AppError::policy_denied("TOOL_HOST_NOT_ALLOWED", "evil.example");
        let wire = JsonRpcError::from_app_error(&err);
        assert_eq!(
            wire.data.unwrap()["violation_code"],
            json!("TOOL_HOST_NOT_ALLOWED")
        );
    }
}
