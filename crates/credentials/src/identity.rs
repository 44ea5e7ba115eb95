//! Consumer identities
//!
//! A [`ConsumerIdentity`] is an attribute map describing who or what a credential
//! request is about. The reserved attribute [`ID_TYPE`] names the consumer type and
//! thereby the matcher family used to compare identities.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Reserved attribute naming the consumer type.
pub const ID_TYPE: &str = "type";

/// Attribute map describing a credential consumer.
///
/// Used both as a request pattern (a present attribute constrains, an absent one
/// does not) and as a concrete registered identity. Attributes are kept sorted so
/// the [`Display`](fmt::Display) form is a canonical JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerIdentity {
    attributes: BTreeMap<String, String>,
}

impl ConsumerIdentity {
    /// Create an empty identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an identity with the given consumer type.
    #[must_use]
    pub fn of_type(consumer_type: impl Into<String>) -> Self {
        Self::new().with(ID_TYPE, consumer_type)
    }

    /// Simple identity consisting of a single `url` attribute.
    #[must_use]
    pub fn by_url(url: impl Into<String>) -> Self {
        Self::new().with("url", url)
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// The consumer type, if set.
    #[must_use]
    pub fn identity_type(&self) -> Option<&str> {
        self.get(ID_TYPE)
    }

    /// Get an attribute value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Check whether an attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Set an attribute, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute only if the value is not empty.
    pub fn set_non_empty(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.attributes.insert(name.into(), value);
        }
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the identity has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Selector semantics: every attribute of this identity is present with an
    /// equal value in `attributes`.
    #[must_use]
    pub fn matches(&self, attributes: &HashMap<String, String>) -> bool {
        self.attributes
            .iter()
            .all(|(k, v)| attributes.get(k) == Some(v))
    }
}

impl fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.attributes) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.attributes),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for ConsumerIdentity
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for ConsumerIdentity
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Type-specific sub realm of an object requiring credentials, e.g. a
/// repository path prefix below a registry host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageContext(String);

impl UsageContext {
    /// Create a usage context from a string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The usage context as string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UsageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UsageContext {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifies a provider registration for later unregistration.
///
/// If non-empty it should start with a DNS name naming the origin of the
/// provider, followed by a slash and a local identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderIdentity(String);

impl ProviderIdentity {
    /// Create a provider identity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The anonymous provider identity used for directly set credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// The identity as string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
