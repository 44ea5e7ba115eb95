//! Host/path identity matching
//!
//! Generic specificity-ranked matching for identities shaped like
//! `type + hostname + scheme + port + path prefix`. Most consumer types (HTTP
//! registries, git, npm, vault, ...) use it, optionally with type specific
//! equality checks layered on top (see [`HostPathMatcher::with_equal_attributes`]).
//!
//! Matching has two phases:
//!
//! 1. Hard filters. Type, hostname, port and scheme are only compared when both
//!    sides specify them. A request without path prefix only accepts candidates
//!    without one; otherwise the candidate prefix must be a component-wise prefix
//!    of the requested one.
//! 2. Specificity. A candidate beats the current match if it supplies a requested
//!    hostname, port or scheme the current match lacks, drops one the request
//!    does not ask for but the current match carries, or has a longer path
//!    prefix.
//!
//! All comparisons are case sensitive; the only normalization is trimming `/`
//! from both ends of path prefixes.

use crate::identity::{ConsumerIdentity, ID_TYPE};
use crate::matcher::{IdentityMatcher, effective_current};

/// Host name attribute.
pub const ID_HOSTNAME: &str = "hostname";
/// Port attribute.
pub const ID_PORT: &str = "port";
/// Scheme attribute.
pub const ID_SCHEME: &str = "scheme";
/// Path prefix attribute.
pub const ID_PATHPREFIX: &str = "pathprefix";

const HOSTPATH_ATTRIBUTES: [&str; 5] = [ID_TYPE, ID_HOSTNAME, ID_PORT, ID_SCHEME, ID_PATHPREFIX];

fn value<'a>(id: &'a ConsumerIdentity, name: &str) -> Option<&'a str> {
    id.get(name).filter(|v| !v.is_empty())
}

fn path_prefix(id: &ConsumerIdentity) -> &str {
    id.get(ID_PATHPREFIX).unwrap_or_default().trim_matches('/')
}

/// Both sides specify the attribute and the values differ.
fn conflicts(request: &ConsumerIdentity, candidate: &ConsumerIdentity, name: &str) -> bool {
    matches!(
        (value(request, name), value(candidate, name)),
        (Some(r), Some(c)) if r != c
    )
}

fn path_matches(request: &str, candidate: &str) -> bool {
    if request.is_empty() {
        return candidate.is_empty();
    }
    if candidate.is_empty() {
        return true;
    }
    let requested: Vec<&str> = request.split('/').collect();
    let offered: Vec<&str> = candidate.split('/').collect();
    offered.len() <= requested.len() && offered.iter().zip(&requested).all(|(o, r)| o == r)
}

/// The candidate supplies an attribute the request asks for and `current` lacks.
fn supplies_missing(
    request: &ConsumerIdentity,
    current: &ConsumerIdentity,
    candidate: &ConsumerIdentity,
    name: &str,
) -> bool {
    value(request, name).is_some()
        && value(current, name).is_none()
        && value(candidate, name).is_some()
}

/// The candidate lacks an attribute the request does not ask for but `current`
/// carries, so it is the closer match.
fn drops_unrequested(
    request: &ConsumerIdentity,
    current: &ConsumerIdentity,
    candidate: &ConsumerIdentity,
    name: &str,
) -> bool {
    value(request, name).is_none()
        && value(current, name).is_some()
        && value(candidate, name).is_none()
}

/// Matches `candidate` against `request` and compares it with `current`.
///
/// Returns `(matches, better)`: `matches` is `false` if a hard filter rejects the
/// candidate, `better` is `true` only for a match that improves on `current`.
/// A non-empty `identity_type` restricts the matcher to requests of that type.
#[must_use]
pub fn matches(
    identity_type: &str,
    request: &ConsumerIdentity,
    current: Option<&ConsumerIdentity>,
    candidate: &ConsumerIdentity,
) -> (bool, bool) {
    if let Some(requested_type) = value(request, ID_TYPE) {
        if value(candidate, ID_TYPE) != Some(requested_type) {
            return (false, false);
        }
        if !identity_type.is_empty() && requested_type != identity_type {
            return (false, false);
        }
    }
    if [ID_HOSTNAME, ID_PORT, ID_SCHEME]
        .iter()
        .any(|name| conflicts(request, candidate, name))
    {
        return (false, false);
    }
    if !path_matches(path_prefix(request), path_prefix(candidate)) {
        return (false, false);
    }

    let Some(current) = effective_current(current) else {
        return (true, true);
    };
    let better = [ID_HOSTNAME, ID_PORT, ID_SCHEME].iter().any(|name| {
        supplies_missing(request, current, candidate, name)
            || drops_unrequested(request, current, candidate, name)
    }) || path_prefix(candidate).len() > path_prefix(current).len();
    (true, better)
}

/// Hostpath comparator for one consumer type, usable as [`IdentityMatcher`].
#[derive(Debug, Clone, Default)]
pub struct HostPathMatcher {
    identity_type: String,
    equal_attributes: Vec<String>,
    common_attributes: bool,
}

impl HostPathMatcher {
    /// Create a matcher for the given consumer type (empty for any type).
    #[must_use]
    pub fn new(identity_type: impl Into<String>) -> Self {
        Self {
            identity_type: identity_type.into(),
            ..Self::default()
        }
    }

    /// Generic matcher for consumer types without a registered standard matcher.
    ///
    /// Besides the hostpath rules, every other attribute present on both request
    /// and candidate must be equal.
    #[must_use]
    pub fn generic() -> Self {
        Self {
            common_attributes: true,
            ..Self::default()
        }
    }

    /// Require strict equality of the given attributes (absent equals absent).
    #[must_use]
    pub fn with_equal_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.equal_attributes
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// The consumer type this matcher is restricted to.
    #[must_use]
    pub fn identity_type(&self) -> &str {
        &self.identity_type
    }

    /// Full `(matches, better)` result including the layered checks.
    #[must_use]
    pub fn evaluate(
        &self,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> (bool, bool) {
        if self
            .equal_attributes
            .iter()
            .any(|name| request.get(name) != candidate.get(name))
        {
            return (false, false);
        }
        if self.common_attributes
            && request
                .iter()
                .filter(|(name, _)| !HOSTPATH_ATTRIBUTES.contains(name))
                .any(|(name, v)| candidate.get(name).is_some_and(|c| c != v))
        {
            return (false, false);
        }
        matches(&self.identity_type, request, current, candidate)
    }
}

impl IdentityMatcher for HostPathMatcher {
    fn is_better(
        &self,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool {
        self.evaluate(request, current, candidate).1
    }
}

/// Identity matcher for a consumer type, reporting only the `better` result.
#[must_use]
pub fn identity_matcher(identity_type: impl Into<String>) -> HostPathMatcher {
    HostPathMatcher::new(identity_type)
}
