//! Consumer provider contracts
//!
//! Every credential source that can answer "do you have credentials for this
//! consumer?" implements [`ConsumerProvider`]. Providers that need credentials
//! themselves to operate (for example a provider backed by a vault server)
//! additionally expose their own consumer identity through
//! [`ConsumerIdentityProvider`], which the registry uses as recursion guard.

use crate::evaluation::EvaluationContext;
use crate::identity::{ConsumerIdentity, ProviderIdentity, UsageContext};
use crate::matcher::IdentityMatcher;
use crate::{CredentialsSource, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Priority of providers that do not declare one. Lower sorts first.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Result of a best-match lookup.
#[derive(Clone)]
pub enum MatchOutcome {
    /// A strictly better match than the current one was found.
    Found {
        /// Source for the matched credentials
        source: Arc<dyn CredentialsSource>,
        /// Identity of the match, the new current best
        identity: ConsumerIdentity,
    },
    /// Nothing improved on the current match.
    NotFound,
    /// Every provider of the answering registry is already being resolved
    /// further up the call chain. The caller one level up treats this as
    /// "no match" for the provider it asked.
    CycleExhausted,
}

impl MatchOutcome {
    /// Returns `true` for [`MatchOutcome::Found`].
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    /// The matched source and identity, if found.
    #[must_use]
    pub fn into_found(self) -> Option<(Arc<dyn CredentialsSource>, ConsumerIdentity)> {
        match self {
            Self::Found { source, identity } => Some((source, identity)),
            Self::NotFound | Self::CycleExhausted => None,
        }
    }
}

impl std::fmt::Debug for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found { identity, .. } => f
                .debug_struct("Found")
                .field("identity", &identity.to_string())
                .finish_non_exhaustive(),
            Self::NotFound => f.write_str("NotFound"),
            Self::CycleExhausted => f.write_str("CycleExhausted"),
        }
    }
}

/// Capability of every credential source registered in a context.
#[async_trait]
pub trait ConsumerProvider: Send + Sync {
    /// Remove a nested registration by provider identity.
    fn unregister(&self, id: &ProviderIdentity);

    /// Exact (complete match) lookup without recursion bookkeeping.
    async fn get(&self, id: &ConsumerIdentity) -> Result<Option<Arc<dyn CredentialsSource>>>;

    /// Best-match lookup.
    ///
    /// Only candidates that `matcher` reports as strictly better than `current`
    /// may be returned as [`MatchOutcome::Found`].
    async fn match_identity(
        &self,
        ectx: &EvaluationContext,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        matcher: &dyn IdentityMatcher,
    ) -> Result<MatchOutcome>;

    /// Ordering priority inside a registry; lower is consulted first.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Capability query for [`ConsumerIdentityProvider`].
    fn as_identity_provider(&self) -> Option<&dyn ConsumerIdentityProvider> {
        None
    }
}

/// Optional capability of objects that need credentials themselves.
pub trait ConsumerIdentityProvider: Send + Sync {
    /// The consumer identity used to request this object's own credentials,
    /// optionally narrowed to a type specific usage context.
    fn consumer_id(&self, usage: &[UsageContext]) -> ConsumerIdentity;

    /// Name of the identity matcher family for [`consumer_id`](Self::consumer_id).
    fn identity_matcher(&self) -> &str;
}

/// Wraps a provider with an explicit priority.
pub struct WithPriority<P> {
    provider: P,
    priority: i32,
}

impl<P> WithPriority<P> {
    /// Wrap `provider` with `priority`.
    pub fn new(provider: P, priority: i32) -> Self {
        Self { provider, priority }
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P: ConsumerProvider> ConsumerProvider for WithPriority<P> {
    fn unregister(&self, id: &ProviderIdentity) {
        self.provider.unregister(id);
    }

    async fn get(&self, id: &ConsumerIdentity) -> Result<Option<Arc<dyn CredentialsSource>>> {
        self.provider.get(id).await
    }

    async fn match_identity(
        &self,
        ectx: &EvaluationContext,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        matcher: &dyn IdentityMatcher,
    ) -> Result<MatchOutcome> {
        self.provider
            .match_identity(ectx, request, current, matcher)
            .await
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn as_identity_provider(&self) -> Option<&dyn ConsumerIdentityProvider> {
        self.provider.as_identity_provider()
    }
}

impl<P> std::fmt::Debug for WithPriority<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithPriority")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
