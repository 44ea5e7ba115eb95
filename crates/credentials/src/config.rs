//! Consumer credentials configuration
//!
//! A [`CredentialsConfig`] binds credentials to consumer identities. It can be
//! read from JSON or TOML:
//!
//! ```toml
//! [[consumers]]
//! identity = { type = "OCIRegistry", hostname = "ghcr.io" }
//!
//! [[consumers.credentials]]
//! type = "env"
//! properties = { username = "GHCR_USER", password = "GHCR_TOKEN" }
//! ```

use crate::identity::{ConsumerIdentity, ProviderIdentity};
use crate::sources::EnvCredentials;
use crate::{Context, Credentials, CredentialsChain, CredentialsError, CredentialsSource, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Provider identity used by [`CredentialsConfig::apply`].
pub const CONFIG_PROVIDER: &str = "ocx.software/credentials/config";

/// Credential bindings for a set of consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// Consumer bindings, applied in order
    #[serde(default)]
    pub consumers: Vec<ConsumerSpec>,
}

/// Credentials for one consumer identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSpec {
    /// Consumer identity the credentials are bound to; empty for a catch-all
    #[serde(default)]
    pub identity: ConsumerIdentity,
    /// Credential sources, the first one yielding credentials wins
    #[serde(default)]
    pub credentials: Vec<CredentialsSpec>,
}

/// One credentials source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CredentialsSpec {
    /// Literal credential properties
    Credentials {
        /// Property name to value
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
    /// Credential properties read from environment variables
    Env {
        /// Property name to environment variable name
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
}

impl CredentialsSpec {
    /// The credentials source described by this spec.
    #[must_use]
    pub fn source(&self) -> Arc<dyn CredentialsSource> {
        match self {
            Self::Credentials { properties } => Arc::new(Credentials::from_properties(
                properties.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            )),
            Self::Env { properties } => Arc::new(EnvCredentials::new(
                properties.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            )),
        }
    }
}

impl CredentialsConfig {
    /// Parse a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::InvalidConfig`] if the document is malformed.
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| CredentialsError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Parse a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::InvalidConfig`] if the document is malformed.
    pub fn from_toml(data: &str) -> Result<Self> {
        toml::from_str(data).map_err(|e| CredentialsError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Apply the configuration under [`CONFIG_PROVIDER`].
    pub fn apply(&self, ctx: &Context) {
        self.apply_as(ctx, &ProviderIdentity::new(CONFIG_PROVIDER));
    }

    /// Apply the configuration under the given provider identity.
    ///
    /// Entries applied earlier under the same identity are removed first, so
    /// re-applying a changed configuration does not leave stale bindings.
    pub fn apply_as(&self, ctx: &Context, provider: &ProviderIdentity) {
        ctx.unregister_consumer_provider(provider);
        for consumer in &self.consumers {
            if consumer.identity.is_empty() {
                tracing::warn!(
                    provider = %provider,
                    "credentials configured for empty consumer identity, used as catch-all"
                );
            }
            let mut sources: Vec<Arc<dyn CredentialsSource>> =
                consumer.credentials.iter().map(CredentialsSpec::source).collect();
            let source = match sources.len() {
                0 => {
                    tracing::warn!(
                        consumer = %consumer.identity,
                        "no credentials configured, skipped"
                    );
                    continue;
                }
                1 => sources.remove(0),
                _ => Arc::new(CredentialsChain::new(sources)),
            };
            ctx.set_credentials_for_consumer_with_provider(
                provider.clone(),
                consumer.identity.clone(),
                source,
            );
        }
        tracing::debug!(
            provider = %provider,
            consumers = self.consumers.len(),
            "applied credentials configuration"
        );
    }
}
