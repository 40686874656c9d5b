// ABOUTME: REST tool adapter: path templates, query/header mappings, allowlists
// ABOUTME: Passthrough headers are filtered before anything leaves the gateway
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # REST Adapter
//!
//! Translates a `tools/call` into an HTTP request from the tool's REST
//! template. Everything that touches the outbound request is decided here,
//! before the network: path substitution (`{name}` placeholders), query and
//! header mappings, the host allowlist, and the passthrough header filter.

use crate::constants::{violation_codes, BLOCKED_PASSTHROUGH_HEADERS, INTERNAL_HEADER_PREFIX};
use crate::errors::{AppError, AppResult};
use crate::models::{RequestType, Tool};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// A fully prepared outbound REST call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestCallPlan {
    /// HTTP verb
    pub method: RequestType,
    /// Final URL with path substituted and query appended
    pub url: String,
    /// Outbound headers (mapped + passthrough, post-filter)
    pub headers: Vec<(String, String)>,
    /// JSON body for non-GET verbs: arguments not consumed by the path,
    /// query, or header mappings
    pub body: Option<Value>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{name}` placeholders, consuming the used arguments
///
/// # Errors
/// Returns `InvalidRequest` when a placeholder has no matching argument.
fn substitute_path(
    template: &str,
    args: &serde_json::Map<String, Value>,
    consumed: &mut std::collections::HashSet<String>,
) -> AppResult<String> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(end_rel) = rest[start..].find('}') else {
            return Err(AppError::invalid_input(format!(
                "Unbalanced placeholder in path template: {template}"
            )));
        };
        let end = start + end_rel;
        result.push_str(&rest[..start]);
        let name = &rest[start + 1..end];
        let value = args.get(name).ok_or_else(|| {
            AppError::invalid_input(format!("Missing argument for path placeholder {{{name}}}"))
        })?;
        result.push_str(&urlencoding::encode(&value_to_string(value)));
        consumed.insert(name.to_owned());
        rest = &rest[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// Check the final URL against the tool's allowlist
///
/// # Errors
/// Returns `PolicyDenied` with `TOOL_HOST_NOT_ALLOWED` on a violation.
fn check_allowlist(url: &Url, allowlist: Option<&[String]>) -> AppResult<()> {
    let Some(allowlist) = allowlist else {
        return Ok(());
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::policy_denied(
            violation_codes::TOOL_HOST_NOT_ALLOWED,
            format!("Scheme {} is not allowed", url.scheme()),
        ));
    }
    let host = url.host_str().unwrap_or_default();
    if allowlist.iter().any(|entry| entry.eq_ignore_ascii_case(host)) {
        Ok(())
    } else {
        Err(AppError::policy_denied(
            violation_codes::TOOL_HOST_NOT_ALLOWED,
            format!("Host {host} is not in the tool allowlist"),
        ))
    }
}

/// Select which inbound headers may travel upstream. Only headers the tool
/// names pass; cookies and gateway-internal headers never pass;
/// `authorization` passes only when explicitly whitelisted.
#[must_use]
pub fn filter_passthrough_headers(
    inbound: &HashMap<String, String>,
    tool_passthrough: &[String],
) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for wanted in tool_passthrough {
        let wanted_lower = wanted.to_ascii_lowercase();
        if BLOCKED_PASSTHROUGH_HEADERS.contains(&wanted_lower.as_str()) {
            continue;
        }
        if wanted_lower.starts_with(INTERNAL_HEADER_PREFIX) {
            continue;
        }
        if let Some((name, value)) = inbound
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
        {
            out.push((name.to_ascii_lowercase(), value.clone()));
        }
    }
    out
}

/// Build the outbound call from the tool template and the call arguments
///
/// # Errors
/// Returns `InvalidRequest` for template problems, `PolicyDenied` for
/// allowlist violations.
pub fn build_rest_call(
    tool: &Tool,
    arguments: &Value,
    inbound_headers: &HashMap<String, String>,
) -> AppResult<RestCallPlan> {
    let method = tool
        .request_type
        .ok_or_else(|| AppError::invalid_input("REST tool has no request type"))?;
    let base_url = tool
        .base_url
        .as_deref()
        .ok_or_else(|| AppError::invalid_input("REST tool has no base URL"))?;

    let args = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        _ => {
            return Err(AppError::invalid_input(
                "Tool arguments must be a JSON object",
            ))
        }
    };
    let mut consumed = std::collections::HashSet::new();

    // Path: template substitution with {name} placeholders
    let path = match tool.path_template.as_deref() {
        Some(template) => substitute_path(template, &args, &mut consumed)?,
        None => String::new(),
    };

    let mut url = Url::parse(base_url)
        .map_err(|e| AppError::invalid_input(format!("Invalid base URL: {e}")))?;
    if !path.is_empty() {
        let joined = url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::invalid_input(format!("Invalid path template result: {e}")))?;
        url = joined;
    }

    // Query mapping: argument name -> query parameter name
    if let Value::Object(mapping) = &tool.query_mapping {
        let mut pairs = url.query_pairs_mut();
        for (arg_name, param_name) in mapping {
            if let Some(value) = args.get(arg_name) {
                let param = param_name.as_str().unwrap_or(arg_name);
                pairs.append_pair(param, &value_to_string(value));
                consumed.insert(arg_name.clone());
            }
        }
        drop(pairs);
    }

    // The allowlist is checked against the FINAL url, after substitution,
    // so a template cannot smuggle a different host through
    check_allowlist(&url, tool.allowlist.as_deref())?;

    // Header mapping: argument name -> outbound header name
    let mut headers = Vec::new();
    if let Value::Object(mapping) = &tool.header_mapping {
        for (arg_name, header_name) in mapping {
            if let Some(value) = args.get(arg_name) {
                let header = header_name.as_str().unwrap_or(arg_name);
                headers.push((header.to_owned(), value_to_string(value)));
                consumed.insert(arg_name.clone());
            }
        }
    }

    // Passthrough headers from the inbound request
    headers.extend(filter_passthrough_headers(
        inbound_headers,
        &tool.passthrough_headers,
    ));

    // Remaining arguments become the JSON body on verbs that carry one
    let body = if matches!(method, RequestType::Get | RequestType::Delete) {
        None
    } else {
        let remaining: serde_json::Map<String, Value> = args
            .into_iter()
            .filter(|(k, _)| !consumed.contains(k))
            .collect();
        Some(Value::Object(remaining))
    };

    Ok(RestCallPlan {
        method,
        url: url.to_string(),
        headers,
        body,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::models::{CatalogCommon, CreatedVia, IntegrationType, Visibility};
    use serde_json::json;
    use uuid::Uuid;

    fn rest_tool() -> Tool {
        Tool {
            common: CatalogCommon::new(
                "get_item".to_owned(),
                Uuid::new_v4(),
                "a@example.com".to_owned(),
                Visibility::Team,
                CreatedVia::Api,
            ),
            gateway_id: None,
            integration_type: IntegrationType::Rest,
            input_schema: json!({"type": "object"}),
            output_schema: None,
            annotations: Value::Null,
            request_type: Some(RequestType::Get),
            base_url: Some("https://api.example/".to_owned()),
            path_template: Some("/items/{id}".to_owned()),
            query_mapping: Value::Null,
            header_mapping: json!({"trace_id": "X-Trace"}),
            timeout_ms: 20_000,
            idempotent: false,
            passthrough_headers: Vec::new(),
            allowlist: Some(vec!["api.example".to_owned()]),
            plugin_chain_pre: Vec::new(),
            plugin_chain_post: Vec::new(),
        }
    }

    #[test]
    fn path_template_and_header_mapping() {
        let tool = rest_tool();
        let plan = build_rest_call(
            &tool,
            &json!({"id": "42", "trace_id": "abc"}),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(plan.url, "https://api.example/items/42");
        assert_eq!(plan.method, RequestType::Get);
        assert!(plan
            .headers
            .iter()
            .any(|(k, v)| k == "X-Trace" && v == "abc"));
        assert!(plan.body.is_none());
    }

    #[test]
    fn missing_path_argument_is_invalid_params() {
        let tool = rest_tool();
        let err = build_rest_call(&tool, &json!({"trace_id": "abc"}), &HashMap::new()).unwrap_err();
        assert_eq!(err.rpc_code(), crate::errors::rpc_codes::INVALID_REQUEST);
    }

    #[test]
    fn allowlist_rejects_foreign_host() {
        let mut tool = rest_tool();
        tool.base_url = Some("https://evil.example/".to_owned());
        let err = build_rest_call(&tool, &json!({"id": "42"}), &HashMap::new()).unwrap_err();
        assert_eq!(
            err.violation_code(),
            Some(violation_codes::TOOL_HOST_NOT_ALLOWED)
        );
    }

    #[test]
    fn allowlist_rejects_non_http_scheme() {
        let mut tool = rest_tool();
        tool.base_url = Some("ftp://api.example/".to_owned());
        let err = build_rest_call(&tool, &json!({"id": "42"}), &HashMap::new()).unwrap_err();
        assert_eq!(
            err.violation_code(),
            Some(violation_codes::TOOL_HOST_NOT_ALLOWED)
        );
    }

    #[test]
    fn query_mapping_appends_parameters() {
        let mut tool = rest_tool();
        tool.path_template = Some("/search".to_owned());
        tool.query_mapping = json!({"q": "query", "limit": "max"});
        let plan = build_rest_call(&tool, &json!({"q": "rust", "limit": 5}), &HashMap::new())
            .unwrap();
        assert!(plan.url.contains("query=rust"));
        assert!(plan.url.contains("max=5"));
    }

    #[test]
    fn post_body_carries_unconsumed_arguments() {
        let mut tool = rest_tool();
        tool.request_type = Some(RequestType::Post);
        tool.path_template = Some("/items/{id}".to_owned());
        let plan = build_rest_call(
            &tool,
            &json!({"id": "1", "payload": {"k": "v"}}),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(plan.body.unwrap(), json!({"payload": {"k": "v"}}));
    }

    #[test]
    fn passthrough_filter_blocks_sensitive_headers() {
        let mut inbound = HashMap::new();
        inbound.insert("X-Trace".to_owned(), "abc".to_owned());
        inbound.insert("Cookie".to_owned(), "secret".to_owned());
        inbound.insert("Authorization".to_owned(), "Bearer tok".to_owned());
        inbound.insert("Mcp-Session-Id".to_owned(), "sess".to_owned());

        // Cookie and mcp-* never pass, even when listed
        let filtered = filter_passthrough_headers(
            &inbound,
            &[
                "X-Trace".to_owned(),
                "Cookie".to_owned(),
                "Mcp-Session-Id".to_owned(),
            ],
        );
        assert_eq!(filtered, vec![("x-trace".to_owned(), "abc".to_owned())]);

        // Authorization passes only when explicitly whitelisted
        let with_auth =
            filter_passthrough_headers(&inbound, &["Authorization".to_owned()]);
        assert_eq!(
            with_auth,
            vec![("authorization".to_owned(), "Bearer tok".to_owned())]
        );

        // Unlisted headers never pass
        let none = filter_passthrough_headers(&inbound, &[]);
        assert!(none.is_empty());
    }
}
