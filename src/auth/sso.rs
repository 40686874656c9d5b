// ABOUTME: Pluggable identity provider seam for SSO integrations
// ABOUTME: Providers implement authorize_url + exchange_code; bodies live outside the core
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # SSO Seam
//!
//! Concrete provider integrations (GitHub, Google, OIDC, Keycloak, Entra)
//! are external collaborators. The core only defines the contract they plug
//! into and the account-provisioning path that consumes a returned profile.

use crate::config::AuthConfig;
use crate::crypto::hash_password;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::User;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Profile returned by a provider after code exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProfile {
    /// Verified email address
    pub email: String,
    /// Display name when the provider supplies one
    pub full_name: Option<String>,
    /// Provider-internal subject id
    pub provider_subject: String,
}

/// The contract every SSO integration implements
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider slug used in `/auth/sso/{provider}/...` paths
    fn name(&self) -> &str;

    /// The URL to redirect the user agent to, carrying `state` for CSRF
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange the callback code for a verified profile
    async fn exchange_code(&self, code: &str) -> AppResult<IdentityProfile>;
}

/// Registry of configured identity providers
#[derive(Default)]
pub struct IdentityProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl IdentityProviderRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its name
    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.name().to_owned(), provider);
    }

    /// Look up a provider by slug
    ///
    /// # Errors
    /// Returns `NotFound` for unknown providers.
    pub fn get(&self, name: &str) -> AppResult<Arc<dyn IdentityProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Identity provider {name}")))
    }
}

/// Find or provision the account for an SSO profile. Accounts created this
/// way get an unusable random password; the provider remains the only login
/// path until the user sets one. A domain allow-list may auto-assign
/// platform administration.
///
/// # Errors
/// Returns an error if account lookup or creation fails.
pub async fn provision_sso_user(
    db: &Database,
    config: &AuthConfig,
    profile: &IdentityProfile,
) -> AppResult<User> {
    if let Some(user) = db.get_user(&profile.email).await? {
        return Ok(user);
    }

    let domain = profile.email.split('@').nth(1).unwrap_or_default();
    let auto_admin = config
        .sso_admin_domains
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(domain));

    // Random unguessable password; SSO users authenticate via their provider
    let placeholder = uuid::Uuid::new_v4().to_string();
    let mut user = User::new(
        profile.email.clone(),
        hash_password(&placeholder)?,
        profile.full_name.clone(),
    );
    user.is_email_verified = true;
    user.is_platform_admin = auto_admin;

    db.create_user(&user).await?;
    tracing::info!(
        email = %user.email,
        auto_admin,
        "Provisioned account from SSO profile"
    );
    Ok(user)
}
