//! Identity matchers
//!
//! An [`IdentityMatcher`] is a reduction comparator, not a predicate: it answers
//! whether a candidate identity is a strictly better match for a request than the
//! best match found so far. Folding it over a candidate set yields the single best
//! match.

use crate::hostpath::{self, HostPathMatcher};
use crate::identity::ConsumerIdentity;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// Compares a candidate against the current best match for a request.
pub trait IdentityMatcher: Send + Sync {
    /// Returns `true` iff `candidate` is a strictly better match for `request`
    /// than `current`. A missing or empty `current` means "no match yet".
    fn is_better(
        &self,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool;
}

impl<F> IdentityMatcher for F
where
    F: Fn(&ConsumerIdentity, Option<&ConsumerIdentity>, &ConsumerIdentity) -> bool + Send + Sync,
{
    fn is_better(
        &self,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool {
        self(request, current, candidate)
    }
}

/// Shared handle to a matcher.
pub type SharedMatcher = Arc<dyn IdentityMatcher>;

/// Treats an empty current identity like a missing one.
pub(crate) fn effective_current(current: Option<&ConsumerIdentity>) -> Option<&ConsumerIdentity> {
    current.filter(|c| !c.is_empty())
}

/// Exact equality of request and candidate.
pub fn complete_match(
    request: &ConsumerIdentity,
    _current: Option<&ConsumerIdentity>,
    candidate: &ConsumerIdentity,
) -> bool {
    request == candidate
}

/// Never matches.
pub fn no_match(
    _request: &ConsumerIdentity,
    _current: Option<&ConsumerIdentity>,
    _candidate: &ConsumerIdentity,
) -> bool {
    false
}

/// Every request attribute must be present with an equal value in the candidate.
/// Candidates with fewer attributes are more general and therefore better.
pub fn partial_match(
    request: &ConsumerIdentity,
    current: Option<&ConsumerIdentity>,
    candidate: &ConsumerIdentity,
) -> bool {
    if !request
        .iter()
        .all(|(k, v)| candidate.get(k) == Some(v))
    {
        return false;
    }
    effective_current(current).is_none_or(|cur| candidate.len() < cur.len())
}

/// All matchers must report an improvement. An empty list never matches.
#[derive(Clone, Default)]
pub struct AndMatcher {
    matchers: Vec<SharedMatcher>,
}

impl AndMatcher {
    /// Combine matchers with logical AND.
    #[must_use]
    pub fn new(matchers: Vec<SharedMatcher>) -> Self {
        Self { matchers }
    }
}

impl IdentityMatcher for AndMatcher {
    fn is_better(
        &self,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool {
        !self.matchers.is_empty()
            && self
                .matchers
                .iter()
                .all(|m| m.is_better(request, current, candidate))
    }
}

/// Any matcher reporting an improvement suffices.
#[derive(Clone, Default)]
pub struct OrMatcher {
    matchers: Vec<SharedMatcher>,
}

impl OrMatcher {
    /// Combine matchers with logical OR.
    #[must_use]
    pub fn new(matchers: Vec<SharedMatcher>) -> Self {
        Self { matchers }
    }
}

impl IdentityMatcher for OrMatcher {
    fn is_better(
        &self,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool {
        self.matchers
            .iter()
            .any(|m| m.is_better(request, current, candidate))
    }
}

/// A registered matcher with its description.
#[derive(Clone)]
pub struct MatcherInfo {
    /// Consumer type (or matcher name) the matcher is registered for
    pub identity_type: String,
    /// The matcher
    pub matcher: SharedMatcher,
    /// Human readable description
    pub description: String,
}

impl std::fmt::Debug for MatcherInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatcherInfo")
            .field("identity_type", &self.identity_type)
            .field("description", &self.description)
            .finish()
    }
}

/// Standard matchers keyed by consumer type.
///
/// Cloning a registry yields an independent copy, so per-context registrations
/// never leak into the process-wide defaults.
#[derive(Default)]
pub struct IdentityMatcherRegistry {
    types: RwLock<BTreeMap<String, MatcherInfo>>,
}

impl IdentityMatcherRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the process-wide standard matchers.
    #[must_use]
    pub fn standard() -> Self {
        STANDARD_MATCHERS.clone()
    }

    /// Register a matcher for a consumer type, replacing a previous one.
    pub fn register(
        &self,
        identity_type: impl Into<String>,
        matcher: SharedMatcher,
        description: impl Into<String>,
    ) {
        let identity_type = identity_type.into();
        let info = MatcherInfo {
            identity_type: identity_type.clone(),
            matcher,
            description: description.into(),
        };
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity_type, info);
    }

    /// Get the matcher registered for a consumer type.
    #[must_use]
    pub fn get(&self, identity_type: &str) -> Option<SharedMatcher> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity_type)
            .map(|info| Arc::clone(&info.matcher))
    }

    /// Get the description registered for a consumer type.
    #[must_use]
    pub fn description(&self, identity_type: &str) -> Option<String> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity_type)
            .map(|info| info.description.clone())
    }

    /// All registrations, sorted by type.
    #[must_use]
    pub fn list(&self) -> Vec<MatcherInfo> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl Clone for IdentityMatcherRegistry {
    fn clone(&self) -> Self {
        let types = self
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Self {
            types: RwLock::new(types),
        }
    }
}

impl std::fmt::Debug for IdentityMatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<String> = self.list().into_iter().map(|i| i.identity_type).collect();
        f.debug_struct("IdentityMatcherRegistry")
            .field("types", &types)
            .finish()
    }
}

/// Matcher name of [`partial_match`] in the standard registry.
pub const PARTIAL: &str = "partial";
/// Matcher name of [`complete_match`] in the standard registry.
pub const EXACT: &str = "exact";

/// Consumer type of OCI registries.
pub const CONSUMER_TYPE_OCI_REGISTRY: &str = "OCIRegistry";
/// Consumer type of git repositories.
pub const CONSUMER_TYPE_GIT: &str = "Git";
/// Consumer type of helm chart repositories.
pub const CONSUMER_TYPE_HELM_CHART_REPOSITORY: &str = "HelmChartRepository";
/// Consumer type of npm registries.
pub const CONSUMER_TYPE_NPM_REGISTRY: &str = "NpmRegistry";
/// Consumer type of maven repositories.
pub const CONSUMER_TYPE_MAVEN_REPOSITORY: &str = "MavenRepository";
/// Consumer type of HashiCorp Vault servers.
pub const CONSUMER_TYPE_HASHICORP_VAULT: &str = "HashiCorpVault";

/// Vault namespace attribute.
pub const ID_NAMESPACE: &str = "namespace";
/// Vault secret engine mount path attribute.
pub const ID_MOUNT_PATH: &str = "mountPath";

static STANDARD_MATCHERS: LazyLock<IdentityMatcherRegistry> = LazyLock::new(|| {
    let registry = IdentityMatcherRegistry::new();
    registry.register(
        PARTIAL,
        Arc::new(partial_match),
        "complete match of given pattern ignoring additional attributes",
    );
    registry.register(
        EXACT,
        Arc::new(complete_match),
        "exact match of given pattern set",
    );
    for (identity_type, description) in [
        (CONSUMER_TYPE_OCI_REGISTRY, "OCI registry credential matcher"),
        (CONSUMER_TYPE_GIT, "git repository credential matcher"),
        (
            CONSUMER_TYPE_HELM_CHART_REPOSITORY,
            "helm chart repository credential matcher",
        ),
        (CONSUMER_TYPE_NPM_REGISTRY, "npm registry credential matcher"),
        (
            CONSUMER_TYPE_MAVEN_REPOSITORY,
            "maven repository credential matcher",
        ),
    ] {
        registry.register(
            identity_type,
            Arc::new(hostpath::identity_matcher(identity_type)),
            description,
        );
    }
    registry.register(
        CONSUMER_TYPE_HASHICORP_VAULT,
        Arc::new(
            HostPathMatcher::new(CONSUMER_TYPE_HASHICORP_VAULT)
                .with_equal_attributes([ID_NAMESPACE, ID_MOUNT_PATH]),
        ),
        "HashiCorp Vault server credential matcher",
    );
    registry
});
