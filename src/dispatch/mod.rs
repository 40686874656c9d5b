// ABOUTME: Dispatcher: resolves catalog tools to concrete upstreams and executes
// ABOUTME: REST templating, retry policy, and the invocation engine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Dispatch
//!
//! Split by concern:
//!
//! - [`rest`] — builds outbound HTTP requests from REST tool templates,
//!   including allowlist and passthrough-header enforcement
//! - [`retry`] — failure classification and exponential backoff with jitter
//! - [`invoker`] — the execution engine tying pools, rate limits, timeouts,
//!   retries, and cancellation together

pub mod invoker;
pub mod rest;
pub mod retry;

pub use invoker::{Dispatcher, LocalToolHandler, PeerInvoker, ToolInvocation};
pub use rest::{build_rest_call, filter_passthrough_headers, RestCallPlan};
pub use retry::{FailureClass, RetryPolicy};
