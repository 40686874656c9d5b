// ABOUTME: Dispatcher integration tests against an in-process stub upstream
// ABOUTME: Round-trips, passthrough headers, retry idempotence, cancellation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{create_test_state, create_test_user, personal_team, rest_tool, spawn_stub_upstream};
use mcp_gateway::cancellation::CancellationToken;
use mcp_gateway::constants::violation_codes;
use mcp_gateway::dispatch::ToolInvocation;
use mcp_gateway::errors::AppError;
use mcp_gateway::models::RequestType;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn invocation(arguments: Value) -> ToolInvocation {
    ToolInvocation {
        arguments,
        inbound_headers: HashMap::new(),
        cancel: CancellationToken::new(),
    }
}

#[tokio::test]
async fn rest_round_trip_with_header_mapping() {
    // GET /items/42 with X-Trace mapped from the trace_id argument
    let stub = spawn_stub_upstream(Router::new().route(
        "/items/:id",
        get(|Path(id): Path<String>, headers: HeaderMap| async move {
            let trace = headers
                .get("x-trace")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            Json(json!({"id": id, "trace": trace}))
        }),
    ))
    .await
    .unwrap();

    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let mut tool = rest_tool("get_item", team, &user.email, &stub.base_url());
    tool.allowlist = Some(vec![stub.host()]);

    let result = state
        .dispatcher
        .dispatch_tool(
            &identity,
            &tool,
            None,
            invocation(json!({"id": "42", "trace_id": "abc"})),
        )
        .await
        .unwrap();

    assert_eq!(result, json!({"id": "42", "trace": "abc"}));
}

#[tokio::test]
async fn allowlist_violation_is_policy_denied() {
    // Pointing the tool at a foreign host must fail closed before any
    // network traffic
    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let mut tool = rest_tool("get_item", team, &user.email, "https://evil.example/");
    tool.allowlist = Some(vec!["api.example".to_owned()]);

    let err = state
        .dispatcher
        .dispatch_tool(&identity, &tool, None, invocation(json!({"id": "42"})))
        .await
        .unwrap_err();
    assert_eq!(
        err.violation_code(),
        Some(violation_codes::TOOL_HOST_NOT_ALLOWED)
    );
}

#[tokio::test]
async fn retriable_failures_then_success() {
    // 429 twice, then 200 {"v":1}; the client sees one
    // logical success and the retry counter reads 2
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_route = attempts.clone();
    let stub = spawn_stub_upstream(Router::new().route(
        "/items/:id",
        get(move |Path(_id): Path<String>| {
            let attempts = attempts_for_route.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    StatusCode::TOO_MANY_REQUESTS.into_response()
                } else {
                    Json(json!({"v": 1})).into_response()
                }
            }
        }),
    ))
    .await
    .unwrap();

    let mut config = mcp_gateway::config::GatewayConfig::default();
    config.dispatch.max_retries = 2;
    let state = common::create_test_state_with(config).await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let tool = rest_tool("flaky", team, &user.email, &stub.base_url());
    let result = state
        .dispatcher
        .dispatch_tool(&identity, &tool, None, invocation(json!({"id": "1"})))
        .await
        .unwrap();

    assert_eq!(result, json!({"v": 1}));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let snapshot = state.metrics.snapshot();
    assert_eq!(snapshot.tools["flaky"].retries, 2);
    assert_eq!(snapshot.tools["flaky"].invocations, 1);
    assert_eq!(snapshot.tools["flaky"].errors, 0);
}

#[tokio::test]
async fn non_idempotent_post_is_never_retried() {
    // A POST without the idempotent flag gets exactly one attempt
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_route = attempts.clone();
    let stub = spawn_stub_upstream(Router::new().route(
        "/items/:id",
        post(move |Path(_id): Path<String>| {
            let attempts = attempts_for_route.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                StatusCode::SERVICE_UNAVAILABLE
            }
        }),
    ))
    .await
    .unwrap();

    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let mut tool = rest_tool("writer", team, &user.email, &stub.base_url());
    tool.request_type = Some(RequestType::Post);
    tool.idempotent = false;

    let err = state
        .dispatcher
        .dispatch_tool(&identity, &tool, None, invocation(json!({"id": "1"})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UpstreamError(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn flagged_idempotent_post_retries() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_route = attempts.clone();
    let stub = spawn_stub_upstream(Router::new().route(
        "/items/:id",
        post(move |Path(_id): Path<String>| {
            let attempts = attempts_for_route.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    StatusCode::SERVICE_UNAVAILABLE.into_response()
                } else {
                    Json(json!({"ok": true})).into_response()
                }
            }
        }),
    ))
    .await
    .unwrap();

    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let mut tool = rest_tool("upserter", team, &user.email, &stub.base_url());
    tool.request_type = Some(RequestType::Post);
    tool.idempotent = true;

    let result = state
        .dispatcher
        .dispatch_tool(&identity, &tool, None, invocation(json!({"id": "1"})))
        .await
        .unwrap();
    assert_eq!(result, json!({"ok": true}));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_4xx_is_not_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_route = attempts.clone();
    let stub = spawn_stub_upstream(Router::new().route(
        "/items/:id",
        get(move |Path(_id): Path<String>| {
            let attempts = attempts_for_route.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        }),
    ))
    .await
    .unwrap();

    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let tool = rest_tool("missing", team, &user.email, &stub.base_url());
    let err = state
        .dispatcher
        .dispatch_tool(&identity, &tool, None, invocation(json!({"id": "1"})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UpstreamError(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_request_abandons_the_upstream_call() {
    // The cancellation token aborts the in-flight call promptly
    let stub = spawn_stub_upstream(Router::new().route(
        "/items/:id",
        get(|Path(_id): Path<String>| async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Json(json!({"too": "late"}))
        }),
    ))
    .await
    .unwrap();

    let state = create_test_state().await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let tool = rest_tool("slow", team, &user.email, &stub.base_url());
    let cancel = CancellationToken::new();
    let invocation = ToolInvocation {
        arguments: json!({"id": "1"}),
        inbound_headers: HashMap::new(),
        cancel: cancel.clone(),
    };

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = state
        .dispatcher
        .dispatch_tool(&identity, &tool, None, invocation)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled(_)), "got {err:?}");
    // Bounded grace: well under the tool timeout
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}

#[tokio::test]
async fn per_user_rate_limit_rejects_excess() {
    let mut config = mcp_gateway::config::GatewayConfig::default();
    config.dispatch.user_rate_per_minute = 2;
    let state = common::create_test_state_with(config).await.unwrap();
    let (user, identity) = create_test_user(&state, "owner@example.com", false)
        .await
        .unwrap();
    let team = personal_team(&state, &user.email).await.unwrap();

    let stub = spawn_stub_upstream(Router::new().route(
        "/items/:id",
        get(|Path(_id): Path<String>| async { Json(json!({"ok": true})) }),
    ))
    .await
    .unwrap();
    let tool = rest_tool("limited", team, &user.email, &stub.base_url());

    for _ in 0..2 {
        state
            .dispatcher
            .dispatch_tool(&identity, &tool, None, invocation(json!({"id": "1"})))
            .await
            .unwrap();
    }
    let err = state
        .dispatcher
        .dispatch_tool(&identity, &tool, None, invocation(json!({"id": "1"})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RateLimited { .. }));
}
