// ABOUTME: User, team, invitation, API token, and auth event records
// ABOUTME: Accounts are keyed by email; teams carry visibility and ownership
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::Visibility;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A platform account. Email is the primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Primary key
    pub email: String,
    /// Display name
    pub full_name: Option<String>,
    /// Argon2id hash; never serialized outward
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Platform administrators bypass visibility checks
    pub is_platform_admin: bool,
    /// Whether the address has been verified
    pub is_email_verified: bool,
    /// Consecutive failed logins since the last success
    pub failed_logins: i64,
    /// Lockout expiry; `None` when not locked
    pub locked_until: Option<DateTime<Utc>>,
    /// Monotonic counter bumped on password change; embedded in JWTs so a
    /// password change revokes every outstanding session
    pub token_epoch: i64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a new unverified user with a fresh epoch
    #[must_use]
    pub fn new(email: String, password_hash: String, full_name: Option<String>) -> Self {
        Self {
            email,
            full_name,
            password_hash,
            is_platform_admin: false,
            is_email_verified: false,
            failed_logins: 0,
            locked_until: None,
            token_epoch: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether the account is currently locked out
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// The local part of the email, used to name the personal team
    #[must_use]
    pub fn email_local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

/// Role of a member inside a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    /// May manage membership and mutate team-scoped entities
    Owner,
    /// May read team-scoped entities
    Member,
}

impl TeamRole {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }

    /// Parse the persisted form, defaulting unknown values to member
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        if value == "owner" {
            Self::Owner
        } else {
            Self::Member
        }
    }
}

/// A tenancy boundary. Every catalog entity is scoped to exactly one team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    /// Primary key
    pub id: Uuid,
    /// Display name; personal teams are prefixed
    pub name: String,
    /// Owning account
    pub owner_email: String,
    /// Team discoverability
    pub visibility: Visibility,
    /// Auto-created one-per-user team
    pub is_personal: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Membership row; `(team_id, user_email)` unique
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    /// Team
    pub team_id: Uuid,
    /// Member account
    pub user_email: String,
    /// Member role
    pub role: TeamRole,
    /// Join timestamp
    pub created_at: DateTime<Utc>,
}

/// Single-use, TTL-limited invitation to join a team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamInvitation {
    /// Primary key
    pub id: Uuid,
    /// Target team
    pub team_id: Uuid,
    /// Invited address
    pub invitee_email: String,
    /// Opaque single-use token
    pub token: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// Set when the invitation is consumed
    pub used_at: Option<DateTime<Utc>>,
}

impl TeamInvitation {
    /// Whether the invitation can still be redeemed
    #[must_use]
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

/// Scope granted to a long-lived API token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    /// Full account scope
    All,
    /// Restricted to one team (`scope_ref` = team id)
    Team,
    /// Restricted to one virtual server (`scope_ref` = server id)
    Server,
}

impl TokenScope {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Team => "team",
            Self::Server => "server",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "team" => Some(Self::Team),
            "server" => Some(Self::Server),
            _ => None,
        }
    }
}

/// A long-lived token in the per-user token catalog. The JWT itself is shown
/// once at creation; only its `jti` is persisted, so revocation is a lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    /// Primary key
    pub id: Uuid,
    /// Owning account
    pub user_email: String,
    /// Operator-chosen label
    pub name: String,
    /// The JWT id claim of the issued token
    pub jti: String,
    /// Scope kind
    pub scope: TokenScope,
    /// Team or server id when scope is narrowed
    pub scope_ref: Option<String>,
    /// Expiry; `None` means non-expiring
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when revoked
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    /// Whether the token is currently usable
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Kinds of authentication events recorded for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthEventKind {
    /// Successful login
    Login,
    /// Explicit logout
    Logout,
    /// Token refresh
    Refresh,
    /// Failed credential check
    Fail,
    /// Account locked after repeated failures
    Lockout,
}

impl AuthEventKind {
    /// Persisted string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Refresh => "refresh",
            Self::Fail => "fail",
            Self::Lockout => "lockout",
        }
    }

    /// Parse the persisted form
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login" => Some(Self::Login),
            "logout" => Some(Self::Logout),
            "refresh" => Some(Self::Refresh),
            "fail" => Some(Self::Fail),
            "lockout" => Some(Self::Lockout),
            _ => None,
        }
    }
}

/// One authentication event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    /// Primary key
    pub id: Uuid,
    /// Affected account
    pub user_email: String,
    /// Event kind
    pub event: AuthEventKind,
    /// Event timestamp
    pub ts: DateTime<Utc>,
    /// Source address when known
    pub ip: Option<String>,
    /// Client user agent when known
    pub user_agent: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn lockout_window() {
        let mut user = User::new("a@example.com".to_owned(), "hash".to_owned(), None);
        let now = Utc::now();
        assert!(!user.is_locked(now));
        user.locked_until = Some(now + chrono::Duration::minutes(10));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + chrono::Duration::minutes(11)));
    }

    #[test]
    fn invitation_redemption_window() {
        let now = Utc::now();
        let mut invite = TeamInvitation {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            invitee_email: "b@example.com".to_owned(),
            token: "tok".to_owned(),
            expires_at: now + chrono::Duration::hours(1),
            used_at: None,
        };
        assert!(invite.is_redeemable(now));
        invite.used_at = Some(now);
        assert!(!invite.is_redeemable(now));
    }

    #[test]
    fn api_token_activity() {
        let now = Utc::now();
        let mut token = ApiToken {
            id: Uuid::new_v4(),
            user_email: "a@example.com".to_owned(),
            name: "ci".to_owned(),
            jti: "jti-1".to_owned(),
            scope: TokenScope::All,
            scope_ref: None,
            expires_at: None,
            revoked_at: None,
            created_at: now,
        };
        assert!(token.is_active(now));
        token.revoked_at = Some(now);
        assert!(!token.is_active(now));
    }
}
