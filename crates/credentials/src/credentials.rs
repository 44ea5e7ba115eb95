//! Credential property bags with automatic memory zeroing
//!
//! [`Credentials`] holds named credential properties (username, password, token,
//! certificates, ...). Values are stored as `secrecy::SecretString`, so they are
//! zeroed on drop and never appear in `Debug` output.

use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;

/// Property holding a user name.
pub const ATTR_USERNAME: &str = "username";
/// Property holding a password.
pub const ATTR_PASSWORD: &str = "password";
/// Property holding a generic access token.
pub const ATTR_TOKEN: &str = "token";
/// Property holding an identity (refresh) token.
pub const ATTR_IDENTITY_TOKEN: &str = "identityToken";
/// Property holding the server address the credentials are meant for.
pub const ATTR_SERVER_ADDRESS: &str = "serverAddress";
/// Property holding a client certificate.
pub const ATTR_CERTIFICATE: &str = "certificate";
/// Property holding a certificate authority bundle.
pub const ATTR_CERTIFICATE_AUTHORITY: &str = "certificateAuthority";
/// Property holding a private key.
pub const ATTR_PRIVATE_KEY: &str = "privateKey";

/// Read-only set of credential properties.
///
/// # Example
///
/// ```ignore
/// let creds = Credentials::simple("user", "secret");
/// assert_eq!(creds.get_property(ATTR_USERNAME), Some("user"));
/// // Debug output lists property names only
/// println!("{creds:?}");
/// ```
#[derive(Clone, Default)]
pub struct Credentials {
    properties: BTreeMap<String, SecretString>,
}

impl Credentials {
    /// Credentials without any property.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build credentials from plain `(name, value)` pairs.
    ///
    /// The values are moved into secure storage.
    #[must_use]
    pub fn from_properties<K, V>(properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), SecretString::from(v.into())))
                .collect(),
        }
    }

    /// Username/password credentials.
    #[must_use]
    pub fn simple(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::from_properties([
            (ATTR_USERNAME, username.into()),
            (ATTR_PASSWORD, password.into()),
        ])
    }

    /// Expose a property value.
    ///
    /// The caller must not log or persist the returned value.
    #[must_use]
    pub fn get_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|v| v.expose_secret())
    }

    /// Check whether a property is set.
    #[must_use]
    pub fn exists_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Names of all set properties, in name order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Copy of all properties with exposed values.
    ///
    /// # Warning
    ///
    /// The returned map holds plain values. Do not log or persist it.
    #[must_use]
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.expose_secret().to_string()))
            .collect()
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Check whether no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.properties.len() == other.properties.len()
            && self.properties.iter().all(|(k, v)| {
                other
                    .properties
                    .get(k)
                    .is_some_and(|o| o.expose_secret() == v.expose_secret())
            })
    }
}

impl Eq for Credentials {}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}
