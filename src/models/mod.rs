// ABOUTME: Canonical data model for users, teams, and catalog entities
// ABOUTME: Enumerations persist as lowercase strings via as_str/parse pairs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Data Model
//!
//! Persisted record types for the relational store. All identifiers are UUID
//! v4 stored as TEXT; all timestamps are UTC. Enumerations are explicit Rust
//! enums persisted as lowercase strings — no stringly-typed columns escape
//! this module.

mod catalog;
mod users;

pub use catalog::{
    A2aAgent, CatalogCommon, CatalogEntity, CreatedVia, EntityKind, Gateway, IntegrationType,
    Prompt, RequestType, ResourceEntry, Tool, TransportKind, VirtualServer,
};
pub use users::{
    ApiToken, AuthEvent, AuthEventKind, Team, TeamInvitation, TeamMember, TeamRole, TokenScope,
    User,
};

use serde::{Deserialize, Serialize};

/// Access classification carried by teams and every catalog entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to the owner only
    Private,
    /// Visible to members of the owning team
    Team,
    /// Visible to every authenticated user
    Public,
}

impl Visibility {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Team => "team",
            Self::Public => "public",
        }
    }

    /// Parse the persisted form, defaulting unknown values to private
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "public" => Self::Public,
            "team" => Self::Team,
            _ => Self::Private,
        }
    }
}

/// Authentication scheme a gateway or A2A agent uses toward its upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// HTTP basic credentials
    Basic,
    /// Bearer token
    Bearer,
    /// Arbitrary header set
    Headers,
    /// OAuth client credentials
    Oauth,
}

impl AuthScheme {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Bearer => "bearer",
            Self::Headers => "headers",
            Self::Oauth => "oauth",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "basic" => Some(Self::Basic),
            "bearer" => Some(Self::Bearer),
            "headers" => Some(Self::Headers),
            "oauth" => Some(Self::Oauth),
            _ => None,
        }
    }
}
