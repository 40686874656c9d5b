// ABOUTME: HTTP surface tests through the assembled router
// ABOUTME: Auth pipeline, catalog CRUD envelope, health and metrics endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::create_test_state;
use http_body_util::BodyExt;
use mcp_gateway::routes::build_router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// Register a user through the public API and return their bearer token
async fn register(app: &axum::Router, email: &str) -> String {
    let response = app
        .clone()
        .oneshot(post_json(
            "/auth/email/register",
            json!({"email": email, "password": "password123"}),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn health_and_ready_are_public() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state);

    let response = app.clone().oneshot(get_request("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get_request("/ready", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state);

    let response = app.clone().oneshot(get_request("/tools", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(get_request("/tools", Some("not-a-real-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state);

    let response = app.oneshot(get_request("/health", None)).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn tool_crud_through_the_api() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state);
    let token = register(&app, "alice@example.com").await;

    // Create
    let response = app
        .clone()
        .oneshot(post_json(
            "/tools",
            json!({
                "name": "lookup",
                "integration_type": "rest",
                "request_type": "GET",
                "base_url": "https://api.example/",
                "path_template": "/items/{id}",
                "allowlist": ["api.example"],
            }),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let tool_id = created["id"].as_str().unwrap().to_owned();
    assert_eq!(created["name"], "lookup");

    // List: the pagination envelope is present
    let response = app
        .clone()
        .oneshot(get_request("/tools?page=1&size=10", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["pagination"]["total_pages"], 1);
    assert!(page["links"]["first"].is_string());
    assert_eq!(page["data"][0]["name"], "lookup");

    // Duplicate names conflict at the API surface too
    let response = app
        .clone()
        .oneshot(post_json(
            "/tools",
            json!({"name": "lookup"}),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Toggle off
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/tools/{tool_id}/toggle"),
            json!({"enabled": false}),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Delete
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/tools/{tool_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get_request(&format!("/tools/{tool_id}"), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn visibility_isolation_between_users_on_the_api() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state);
    let alice = register(&app, "alice@example.com").await;
    let bob = register(&app, "bob@example.com").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/tools",
            json!({"name": "alice-private", "visibility": "private"}),
            Some(&alice),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Bob cannot see Alice's private tool
    let response = app
        .clone()
        .oneshot(get_request("/tools", Some(&bob)))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert_eq!(page["pagination"]["total"], 0);

    // Alice can
    let response = app.oneshot(get_request("/tools", Some(&alice))).await.unwrap();
    let page = body_json(response).await;
    assert_eq!(page["pagination"]["total"], 1);
}

#[tokio::test]
async fn stateless_mcp_post_answers_single_shot() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state);
    let token = register(&app, "alice@example.com").await;

    let response = app
        .oneshot(post_json(
            "/mcp",
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}}),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert!(body["result"]["tools"].is_array());
}

#[tokio::test]
async fn stateful_mcp_initialize_issues_a_session_header() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state);
    let token = register(&app, "alice@example.com").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/mcp",
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2025-06-18", "capabilities": {},
                           "clientInfo": {"name": "t", "version": "0"}},
            }),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_owned();
    assert!(!session_id.is_empty());

    // Follow-up request on the session
    let mut request = post_json(
        "/mcp",
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        Some(&token),
    );
    request
        .headers_mut()
        .insert("mcp-session-id", session_id.parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn metrics_endpoint_reports_request_counters() {
    let state = create_test_state().await.unwrap();
    let app = build_router(state.clone());
    let token = register(&app, "alice@example.com").await;

    let _ = app
        .clone()
        .oneshot(post_json(
            "/mcp",
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}}),
            Some(&token),
        ))
        .await
        .unwrap();

    let response = app.oneshot(get_request("/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["requests"]["tools/list"], 1);
}
