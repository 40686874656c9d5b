// ABOUTME: Per-user API token catalog with revocation and signed export
// ABOUTME: The JWT is shown once at creation; only its jti is persisted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::AuthManager;
use crate::crypto::SigningKeyring;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ApiToken, TokenScope, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Request to mint a new API token
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
    /// Operator-chosen label, unique per user
    pub name: String,
    /// Scope kind; defaults to full account scope
    #[serde(default)]
    pub scope: Option<TokenScope>,
    /// Team or server id when the scope is narrowed
    #[serde(default)]
    pub scope_ref: Option<String>,
    /// Optional expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Creation response; the JWT is only ever returned here
#[derive(Debug, Clone, Serialize)]
pub struct CreatedToken {
    /// Catalog row
    pub token: ApiToken,
    /// The signed JWT; store it now, it is not retrievable later
    pub secret: String,
}

/// Signed export of a user's token catalog. Consumers verify with the
/// published Ed25519 key; a previous key is accepted during rotation windows.
#[derive(Debug, Clone, Serialize)]
pub struct SignedTokenCatalog {
    /// The catalog rows
    pub tokens: Vec<ApiToken>,
    /// Hex Ed25519 signature over the canonical JSON of `tokens`
    pub signature: String,
    /// Hex public key the signature verifies under
    pub public_key: String,
    /// Export timestamp
    pub exported_at: DateTime<Utc>,
}

/// Manages the per-user API token catalog
pub struct ApiTokenService {
    db: Database,
    keyring: Mutex<SigningKeyring>,
}

impl ApiTokenService {
    /// Build the service with a fresh signing keyring
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            keyring: Mutex::new(SigningKeyring::generate()),
        }
    }

    /// Mint a token: sign the JWT, persist the catalog row.
    ///
    /// # Errors
    /// Returns `Conflict` when the user already has a token with this name,
    /// `InvalidRequest` when a narrowed scope is missing its reference.
    pub async fn create(
        &self,
        auth: &AuthManager,
        user: &User,
        request: CreateTokenRequest,
    ) -> AppResult<CreatedToken> {
        if request.name.trim().is_empty() {
            return Err(AppError::invalid_input("Token name must not be empty"));
        }
        let scope = request.scope.unwrap_or(TokenScope::All);
        if scope != TokenScope::All && request.scope_ref.is_none() {
            return Err(AppError::invalid_input(
                "scope_ref is required for team- and server-scoped tokens",
            ));
        }

        let (secret, jti) = auth.issue_api_token(
            user,
            scope,
            request.scope_ref.as_deref(),
            request.expires_at,
        )?;

        let token = ApiToken {
            id: Uuid::new_v4(),
            user_email: user.email.clone(),
            name: request.name,
            jti,
            scope,
            scope_ref: request.scope_ref,
            expires_at: request.expires_at,
            revoked_at: None,
            created_at: Utc::now(),
        };
        self.db.create_api_token(&token).await?;

        tracing::info!(user = %user.email, token = %token.name, "API token created");
        Ok(CreatedToken { token, secret })
    }

    /// List a user's tokens
    ///
    /// # Errors
    /// Returns an error if the database query fails
    pub async fn list(&self, user_email: &str) -> AppResult<Vec<ApiToken>> {
        self.db.list_api_tokens(user_email).await
    }

    /// Revoke one token. Owners revoke their own tokens; platform admins may
    /// revoke anyone's.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids, `Forbidden` when the caller owns
    /// neither the token nor platform administration.
    pub async fn revoke(
        &self,
        caller_email: &str,
        caller_is_admin: bool,
        token_id: Uuid,
    ) -> AppResult<()> {
        let token = self
            .db
            .get_api_token(token_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Token {token_id}")))?;

        if token.user_email != caller_email && !caller_is_admin {
            return Err(AppError::forbidden("Cannot revoke another user's token"));
        }

        self.db.revoke_api_token(token_id).await?;
        tracing::info!(token = %token.name, user = %token.user_email, "API token revoked");
        Ok(())
    }

    /// Export the caller's token catalog signed with the current Ed25519 key
    ///
    /// # Errors
    /// Returns an error if the database query or serialization fails
    pub async fn signed_export(&self, user_email: &str) -> AppResult<SignedTokenCatalog> {
        let tokens = self.db.list_api_tokens(user_email).await?;
        let payload = serde_json::to_vec(&json!({ "tokens": &tokens }))
            .map_err(|e| AppError::internal(format!("Catalog serialization failed: {e}")))?;

        let keyring = self.keyring.lock().await;
        Ok(SignedTokenCatalog {
            signature: keyring.sign(&payload),
            public_key: keyring.public_key_hex(),
            tokens,
            exported_at: Utc::now(),
        })
    }

    /// Rotate the export signing key; the outgoing key remains valid for
    /// verification until the next rotation
    pub async fn rotate_signing_key(&self) {
        self.keyring.lock().await.rotate();
        tracing::info!("Token catalog signing key rotated");
    }
}
