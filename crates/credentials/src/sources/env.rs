//! Environment variable credentials source

use crate::{Context, Credentials, CredentialsError, CredentialsSource, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Reads credential properties from environment variables.
///
/// Each credential property name maps to the environment variable holding its
/// value. Variables are read when the credentials are materialized, not when the
/// source is created.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    variables: BTreeMap<String, String>,
}

impl EnvCredentials {
    /// Create a source from `(property, variable)` pairs.
    #[must_use]
    pub fn new<K, V>(variables: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            variables: variables
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Map one more property to an environment variable.
    #[must_use]
    pub fn with(mut self, property: impl Into<String>, variable: impl Into<String>) -> Self {
        self.variables.insert(property.into(), variable.into());
        self
    }
}

#[async_trait]
impl CredentialsSource for EnvCredentials {
    async fn credentials(&self, _ctx: &Context) -> Result<Credentials> {
        let mut properties = Vec::with_capacity(self.variables.len());
        for (property, variable) in &self.variables {
            let value =
                std::env::var(variable).map_err(|_| CredentialsError::UnknownCredentials {
                    name: format!("{property} (env:{variable})"),
                })?;
            properties.push((property.clone(), value));
        }
        Ok(Credentials::from_properties(properties))
    }
}
