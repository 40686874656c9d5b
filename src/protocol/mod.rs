// ABOUTME: MCP protocol engine module
// ABOUTME: Session phases live with the session registry; the engine dispatches methods
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Protocol
//!
//! The [`engine::McpEngine`] implements the MCP method families over the
//! session state machine. Session phases and per-session plumbing live in
//! [`crate::transports::session`].

pub mod engine;

pub use engine::McpEngine;
