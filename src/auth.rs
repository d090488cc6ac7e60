//! Credentials for the agent-hosting service
//!
//! The hosting service only ever sees an opaque bearer token. Either it is
//! handed to us directly (`FOUNDRY_ACCESS_TOKEN`) or `azure_identity` gets
//! one from the Azure CLI.

use std::sync::Arc;

use async_trait::async_trait;
use azure_core::credentials::TokenCredential as _;
use chrono::{DateTime, Utc};

use crate::config::EnvSource;
use crate::error::{Error, Result};

/// Pre-issued bearer token, bypasses the Azure CLI
pub const ACCESS_TOKEN_VAR: &str = "FOUNDRY_ACCESS_TOKEN";

/// Scope of tokens accepted by the Foundry project endpoint
pub const FOUNDRY_SCOPE: &str = "https://ai.azure.com/.default";

/// Tokens this close to expiry are treated as already expired
const EXPIRY_BUFFER_SECS: i64 = 300;

/// A bearer token and, when known, its expiry
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// Check if the token is expired (with a five minute buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_on {
            Some(expires_on) => {
                expires_on < Utc::now() + chrono::Duration::seconds(EXPIRY_BUFFER_SECS)
            }
            None => false,
        }
    }
}

// Never print the token itself
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens for the hosting service
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Get a display name for this credential (for logging)
    fn name(&self) -> &'static str;

    async fn get_token(&self) -> Result<AccessToken>;
}

/// A fixed token supplied out of band
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token, None),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    fn name(&self) -> &'static str {
        "static token"
    }

    async fn get_token(&self) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Tokens from the signed-in Azure CLI user (`az login`), via `azure_identity`
pub struct AzureCliCredential {
    inner: Arc<azure_identity::AzureCliCredential>,
}

impl AzureCliCredential {
    pub fn new() -> Result<Self> {
        let inner = azure_identity::AzureCliCredential::new(None).map_err(|e| {
            Error::Credential(format!("Failed to set up Azure CLI credential: {}", e))
        })?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "azure cli"
    }

    async fn get_token(&self) -> Result<AccessToken> {
        let token = self
            .inner
            .get_token(&[FOUNDRY_SCOPE], None)
            .await
            .map_err(|e| {
                Error::Credential(format!(
                    "Azure CLI could not issue a token ({}); run 'az login' or set {}",
                    e, ACCESS_TOKEN_VAR
                ))
            })?;

        let expires_on = DateTime::<Utc>::from_timestamp(token.expires_on.unix_timestamp(), 0);
        tracing::info!("Acquired token from Azure CLI (expires {:?})", expires_on);
        Ok(AccessToken::new(token.token.secret(), expires_on))
    }
}

/// Pick the credential for this run: an explicit token if one is configured,
/// the Azure CLI otherwise.
pub fn credential_from_env(env: &EnvSource) -> Result<Arc<dyn TokenCredential>> {
    let credential: Arc<dyn TokenCredential> = match env.get(ACCESS_TOKEN_VAR) {
        Some(token) => Arc::new(StaticTokenCredential::new(token)),
        None => Arc::new(AzureCliCredential::new()?),
    };
    Ok(credential)
}
