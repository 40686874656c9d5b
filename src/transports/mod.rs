// ABOUTME: Client-facing transports: stdio, legacy SSE, Streamable HTTP
// ABOUTME: All three frame JSON-RPC and feed the one protocol engine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Transports
//!
//! - [`session`] — the session registry shared by every transport
//! - [`streamable`] — Streamable HTTP, the default transport (`/mcp`)
//! - [`sse`] — legacy SSE (`/sse` + `/messages`)
//! - [`stdio`] — newline-delimited JSON over stdin/stdout

pub mod session;
pub mod sse;
pub mod stdio;
pub mod streamable;

pub use session::{Session, SessionPhase, SessionRegistry};
