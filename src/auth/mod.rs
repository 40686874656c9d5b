// ABOUTME: JWT issuance and validation plus per-request identity resolution
// ABOUTME: HMAC/RSA/ECDSA families; epoch and revocation checks on every request
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Authentication
//!
//! [`AuthManager`] issues and validates the gateway's JWTs. Two token shapes
//! share one claims structure:
//!
//! - **Session tokens** — short-lived, issued at login. Carry the user's
//!   `token_epoch`; a password change bumps the epoch and every outstanding
//!   session token dies with it.
//! - **API tokens** — long-lived, catalogued in `api_tokens`. Their `jti` is
//!   checked against the revocation table on every request.
//!
//! Identity resolution joins the validated claims with team memberships into
//! the [`IdentityContext`] every downstream check consumes.

pub mod api_tokens;
pub mod sso;

use crate::config::AuthConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{TokenScope, User};
use crate::permissions::IdentityContext;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by every gateway JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account email
    pub sub: String,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Token id; catalogued for API tokens
    pub jti: String,
    /// Audience
    pub aud: String,
    /// Issuer
    pub iss: String,
    /// Active team context, when the caller pinned one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_ctx: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Platform admin marker
    #[serde(default)]
    pub is_platform_admin: bool,
    /// The user's token epoch at issuance; mismatch means revoked
    #[serde(default)]
    pub epoch: i64,
    /// Scope kind for API tokens (`all` for session tokens)
    #[serde(default = "default_token_scope")]
    pub token_scope: String,
    /// Team or server id the token is narrowed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_scope_ref: Option<String>,
}

fn default_token_scope() -> String {
    "all".to_owned()
}

/// Issues and validates gateway JWTs
pub struct AuthManager {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    /// Build a manager from the auth configuration
    ///
    /// # Errors
    /// Returns an error when the configured key material is missing or does
    /// not match the selected algorithm.
    pub fn new(config: AuthConfig) -> AppResult<Self> {
        let (encoding_key, decoding_key) = if config.algorithm.is_symmetric() {
            let secret = config
                .secret
                .as_deref()
                .ok_or_else(|| AppError::internal("HMAC algorithm selected without a secret"))?;
            (
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            )
        } else {
            let private_pem = config.private_key_pem.as_deref().ok_or_else(|| {
                AppError::internal("Asymmetric JWT algorithm selected without a private key")
            })?;
            let public_pem = config.public_key_pem.as_deref().ok_or_else(|| {
                AppError::internal("Asymmetric JWT algorithm selected without a public key")
            })?;
            let (enc, dec) = match config.algorithm.as_jwt() {
                jsonwebtoken::Algorithm::RS256
                | jsonwebtoken::Algorithm::RS384
                | jsonwebtoken::Algorithm::RS512 => (
                    EncodingKey::from_rsa_pem(private_pem.as_bytes())
                        .map_err(|e| AppError::internal(format!("Invalid RSA private key: {e}")))?,
                    DecodingKey::from_rsa_pem(public_pem.as_bytes())
                        .map_err(|e| AppError::internal(format!("Invalid RSA public key: {e}")))?,
                ),
                _ => (
                    EncodingKey::from_ec_pem(private_pem.as_bytes())
                        .map_err(|e| AppError::internal(format!("Invalid EC private key: {e}")))?,
                    DecodingKey::from_ec_pem(public_pem.as_bytes())
                        .map_err(|e| AppError::internal(format!("Invalid EC public key: {e}")))?,
                ),
            };
            (enc, dec)
        };

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
        })
    }

    /// The auth configuration this manager was built from
    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issue a session token for a logged-in user. Returns `(token, jti)`.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_session_token(
        &self,
        user: &User,
        team_ctx: Option<String>,
    ) -> AppResult<(String, String)> {
        let now = Utc::now().timestamp();
        let jti = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: user.email.clone(),
            exp: now + i64::try_from(self.config.token_ttl_secs).unwrap_or(86_400),
            iat: now,
            jti: jti.clone(),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            team_ctx,
            scopes: vec!["session".to_owned()],
            is_platform_admin: user.is_platform_admin,
            epoch: user.token_epoch,
            token_scope: TokenScope::All.as_str().to_owned(),
            token_scope_ref: None,
        };
        let token = self.sign(&claims)?;
        Ok((token, jti))
    }

    /// Issue a long-lived API token JWT. Returns `(token, jti)`. The caller
    /// persists the jti in the token catalog.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue_api_token(
        &self,
        user: &User,
        scope: TokenScope,
        scope_ref: Option<&str>,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<(String, String)> {
        let now = Utc::now().timestamp();
        let jti = Uuid::new_v4().to_string();
        // Ten years stands in for "non-expiring"; revocation is the real kill switch
        let exp = expires_at.map_or(now + 10 * 365 * 86_400, |dt| dt.timestamp());
        let claims = Claims {
            sub: user.email.clone(),
            exp,
            iat: now,
            jti: jti.clone(),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            team_ctx: None,
            scopes: vec!["api".to_owned()],
            is_platform_admin: user.is_platform_admin,
            epoch: user.token_epoch,
            token_scope: scope.as_str().to_owned(),
            token_scope_ref: scope_ref.map(str::to_owned),
        };
        let token = self.sign(&claims)?;
        Ok((token, jti))
    }

    fn sign(&self, claims: &Claims) -> AppResult<String> {
        encode(
            &Header::new(self.config.algorithm.as_jwt()),
            claims,
            &self.encoding_key,
        )
        .map_err(|e| AppError::internal(format!("JWT signing failed: {e}")))
    }

    /// Validate a presented JWT: signature, expiry, audience, issuer.
    ///
    /// # Errors
    /// Returns `AuthRequired` for any validation failure; the detail is kept
    /// generic to avoid oracle behavior.
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(self.config.algorithm.as_jwt());
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "JWT validation failed");
                AppError::auth_required("Invalid or expired token")
            })
    }

    /// Resolve a validated token into the per-request identity context.
    ///
    /// Performs the database-backed checks that pure JWT validation cannot:
    /// epoch match (session revocation on password change) and API token
    /// revocation, then loads team memberships.
    ///
    /// # Errors
    /// Returns `AuthRequired` when the account vanished or the token was
    /// revoked, `Forbidden` when the account is locked.
    pub async fn resolve_identity(
        &self,
        db: &Database,
        claims: &Claims,
    ) -> AppResult<IdentityContext> {
        let user = db
            .get_user(&claims.sub)
            .await?
            .ok_or_else(|| AppError::auth_required("Unknown account"))?;

        if user.is_locked(Utc::now()) {
            return Err(AppError::forbidden("Account is locked"));
        }

        // Password change bumps the epoch; older tokens die here
        if claims.epoch != user.token_epoch {
            return Err(AppError::auth_required("Token has been revoked"));
        }

        // API tokens are catalogued; a revoked jti is rejected on every request
        if db.is_jti_revoked(&claims.jti).await? {
            return Err(AppError::auth_required("Token has been revoked"));
        }

        let token_scope = TokenScope::parse(&claims.token_scope).unwrap_or(TokenScope::All);
        let teams = db.membership_map(&user.email).await?;

        Ok(IdentityContext {
            email: user.email,
            is_platform_admin: user.is_platform_admin || claims.is_platform_admin,
            teams,
            jti: claims.jti.clone(),
            token_scope,
            token_scope_ref: claims.token_scope_ref.clone(),
        })
    }
}

/// Extract a bearer token from an `Authorization` header value
///
/// # Errors
/// Returns `AuthRequired` when the header is not a bearer credential.
pub fn extract_bearer(header_value: &str) -> AppResult<&str> {
    header_value
        .strip_prefix("Bearer ")
        .or_else(|| header_value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::auth_required("Expected a bearer token"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn manager() -> AuthManager {
        AuthManager::new(GatewayConfig::default().auth).expect("test auth manager")
    }

    fn user() -> User {
        User::new(
            "alice@example.com".to_owned(),
            "$argon2id$stub".to_owned(),
            Some("Alice".to_owned()),
        )
    }

    #[test]
    fn session_token_round_trip() {
        let auth = manager();
        let (token, jti) = auth.issue_session_token(&user(), None).unwrap();
        let claims = auth.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.jti, jti);
        assert_eq!(claims.token_scope, "all");
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let mut config = GatewayConfig::default().auth;
        config.audience = "other-audience".to_owned();
        let issuer = AuthManager::new(config).unwrap();
        let (token, _) = issuer.issue_session_token(&user(), None).unwrap();

        let verifier = manager();
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let auth = manager();
        let (token, _) = auth.issue_session_token(&user(), None).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(auth.validate_token(&tampered).is_err());
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer("Bearer abc").unwrap(), "abc");
        assert!(extract_bearer("Basic abc").is_err());
        assert!(extract_bearer("Bearer ").is_err());
    }
}
