// ABOUTME: Role-based authorization and the entity visibility predicate
// ABOUTME: platform admin > team owner > team member; private/team/public tags
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Authorization
//!
//! The single visibility predicate used by every catalog read path, and the
//! mutation rule used by every write path. List and get go through the same
//! predicate so the two can never disagree about what a caller may see.

use crate::models::{CatalogCommon, TeamRole, TokenScope, Visibility};
use std::collections::HashMap;
use uuid::Uuid;

/// Resolved caller identity attached to every request.
///
/// Built once per request by the auth middleware from the validated token and
/// the caller's team memberships; read-only afterwards.
#[derive(Debug, Clone)]
pub struct IdentityContext {
    /// Account email (`sub` claim)
    pub email: String,
    /// Platform administrators bypass visibility checks
    pub is_platform_admin: bool,
    /// Team memberships with roles
    pub teams: HashMap<Uuid, TeamRole>,
    /// JWT id of the presented token
    pub jti: String,
    /// Scope restriction when authenticated with a narrowed API token
    pub token_scope: TokenScope,
    /// Team or server id the token is narrowed to
    pub token_scope_ref: Option<String>,
}

impl IdentityContext {
    /// Whether the caller belongs to `team_id` in any role
    #[must_use]
    pub fn is_team_member(&self, team_id: Uuid) -> bool {
        self.teams.contains_key(&team_id)
    }

    /// Whether the caller owns `team_id`
    #[must_use]
    pub fn is_team_owner(&self, team_id: Uuid) -> bool {
        self.teams.get(&team_id) == Some(&TeamRole::Owner)
    }

    /// Whether a team-scoped token restricts the caller away from `team_id`
    #[must_use]
    pub fn token_allows_team(&self, team_id: Uuid) -> bool {
        match self.token_scope {
            TokenScope::Team => self
                .token_scope_ref
                .as_deref()
                .is_some_and(|scoped| scoped == team_id.to_string()),
            _ => true,
        }
    }
}

/// The visibility predicate:
///
/// ```text
/// allowed(U, E) := U.is_platform_admin
///                ∨ E.visibility = public
///                ∨ (E.visibility = team    ∧ member(E.team_id, U))
///                ∨ (E.visibility = private ∧ E.owner_email = U.email)
/// ```
#[must_use]
pub fn allowed(identity: &IdentityContext, entity: &CatalogCommon) -> bool {
    if identity.is_platform_admin {
        return true;
    }
    if !identity.token_allows_team(entity.team_id) {
        return false;
    }
    match entity.visibility {
        Visibility::Public => true,
        Visibility::Team => identity.is_team_member(entity.team_id),
        Visibility::Private => entity.owner_email == identity.email,
    }
}

/// Mutation rule: owner, team owner (for team-scoped entities), or platform
/// admin. Federation-origin entities are read-only to all clients.
#[must_use]
pub fn can_mutate(identity: &IdentityContext, entity: &CatalogCommon) -> bool {
    if !entity.is_client_editable() {
        return false;
    }
    if identity.is_platform_admin {
        return true;
    }
    if !identity.token_allows_team(entity.team_id) {
        return false;
    }
    entity.owner_email == identity.email || identity.is_team_owner(entity.team_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::models::CreatedVia;

    fn identity(email: &str, admin: bool) -> IdentityContext {
        IdentityContext {
            email: email.to_owned(),
            is_platform_admin: admin,
            teams: HashMap::new(),
            jti: "jti".to_owned(),
            token_scope: TokenScope::All,
            token_scope_ref: None,
        }
    }

    fn entity(owner: &str, team_id: Uuid, visibility: Visibility) -> CatalogCommon {
        CatalogCommon::new(
            "e".to_owned(),
            team_id,
            owner.to_owned(),
            visibility,
            CreatedVia::Api,
        )
    }

    #[test]
    fn platform_admin_sees_everything() {
        let admin = identity("admin@example.com", true);
        let e = entity("owner@example.com", Uuid::new_v4(), Visibility::Private);
        assert!(allowed(&admin, &e));
        assert!(can_mutate(&admin, &e));
    }

    #[test]
    fn private_entities_require_ownership() {
        let team = Uuid::new_v4();
        let owner = identity("owner@example.com", false);
        let other = identity("other@example.com", false);
        let e = entity("owner@example.com", team, Visibility::Private);
        assert!(allowed(&owner, &e));
        assert!(!allowed(&other, &e));
    }

    #[test]
    fn team_entities_require_membership() {
        let team = Uuid::new_v4();
        let mut member = identity("member@example.com", false);
        member.teams.insert(team, TeamRole::Member);
        let outsider = identity("outsider@example.com", false);
        let e = entity("owner@example.com", team, Visibility::Team);
        assert!(allowed(&member, &e));
        assert!(!allowed(&outsider, &e));
        // Members read but do not mutate; team owners mutate
        assert!(!can_mutate(&member, &e));
        let mut team_owner = identity("lead@example.com", false);
        team_owner.teams.insert(team, TeamRole::Owner);
        assert!(can_mutate(&team_owner, &e));
    }

    #[test]
    fn public_entities_visible_to_all() {
        let stranger = identity("s@example.com", false);
        let e = entity("owner@example.com", Uuid::new_v4(), Visibility::Public);
        assert!(allowed(&stranger, &e));
        assert!(!can_mutate(&stranger, &e));
    }

    #[test]
    fn team_scoped_token_restricts_other_teams() {
        let team_a = Uuid::new_v4();
        let team_b = Uuid::new_v4();
        let mut caller = identity("a@example.com", false);
        caller.teams.insert(team_a, TeamRole::Owner);
        caller.teams.insert(team_b, TeamRole::Owner);
        caller.token_scope = TokenScope::Team;
        caller.token_scope_ref = Some(team_a.to_string());

        let in_scope = entity("a@example.com", team_a, Visibility::Team);
        let out_of_scope = entity("a@example.com", team_b, Visibility::Team);
        assert!(allowed(&caller, &in_scope));
        assert!(!allowed(&caller, &out_of_scope));
        assert!(!can_mutate(&caller, &out_of_scope));
    }

    #[test]
    fn federation_entities_are_immutable_even_for_owner() {
        let team = Uuid::new_v4();
        let mut e = entity("owner@example.com", team, Visibility::Public);
        e.created_via = CreatedVia::Federation;
        let owner = identity("owner@example.com", false);
        assert!(!can_mutate(&owner, &e));
    }
}
