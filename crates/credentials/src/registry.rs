//! Consumer provider registry
//!
//! The registry is the resolution core of a [`Context`](crate::Context). It holds
//! an explicit table of credentials bound directly to consumer identities, plus
//! a priority-ordered list of nested [`ConsumerProvider`]s.
//!
//! # Recursion guard
//!
//! Providers implementing [`ConsumerIdentityProvider`] need credentials of their
//! own, which they resolve through the same context while a match is running.
//! Before such a provider is asked, its own consumer identity is appended to the
//! [`CredentialRecursion`] stack of the evaluation context; a provider already on
//! the stack is skipped. If every registered provider of a registry is on the
//! stack and nothing was found, the registry reports
//! [`MatchOutcome::CycleExhausted`], which the registry one level up treats as
//! "no match" for the provider it asked. That caller then falls back to its
//! explicit entries and its other providers.
//!
//! Known limitation: two resolution paths that produce the same recursion stack
//! but run through different provider graphs cannot be told apart. The guard
//! may then pick a branch that looks structurally correct but is the wrong one.
//!
//! # Locking
//!
//! A single read/write lock guards the explicit table and the provider list.
//! It is never held across calls into nested providers: [`match_identity`] and
//! [`get`] work on a snapshot of the provider list, so a provider may call back
//! into the registry it is registered with.
//!
//! [`match_identity`]: ConsumerProvider::match_identity
//! [`get`]: ConsumerProvider::get

use crate::evaluation::{CredentialRecursion, EvaluationContext};
use crate::identity::{ConsumerIdentity, ProviderIdentity};
use crate::matcher::IdentityMatcher;
use crate::provider::{ConsumerIdentityProvider, ConsumerProvider, MatchOutcome};
use crate::{CredentialsSource, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

struct ExplicitEntry {
    provider: ProviderIdentity,
    source: Arc<dyn CredentialsSource>,
}

type Registration = (ProviderIdentity, Arc<dyn ConsumerProvider>);

#[derive(Default)]
struct State {
    explicit: BTreeMap<ConsumerIdentity, ExplicitEntry>,
    providers: Vec<Registration>,
}

impl State {
    /// Drop everything registered under `id`. Returns `false` if `id` names no
    /// provider of this registry.
    fn remove(&mut self, id: &ProviderIdentity) -> bool {
        self.explicit.retain(|_, entry| entry.provider != *id);
        let before = self.providers.len();
        self.providers.retain(|(pid, _)| pid != id);
        self.providers.len() != before
    }
}

/// Priority-ordered registry of consumer providers with an explicit table.
#[derive(Default)]
pub struct ConsumerProviderRegistry {
    state: RwLock<State>,
}

impl ConsumerProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous registration under `id`.
    ///
    /// Providers are kept sorted by ascending priority; providers of equal
    /// priority keep their registration order.
    pub fn register(&self, id: ProviderIdentity, provider: Arc<dyn ConsumerProvider>) {
        let nested = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let nested = Self::remove_locked(&mut state, &id);
            state.providers.push((id.clone(), provider));
            state.providers.sort_by_key(|(_, p)| p.priority());
            nested
        };
        for sub in nested {
            sub.unregister(&id);
        }
        tracing::trace!(provider = %id, "registered consumer provider");
    }

    /// Remove the provider and all explicit entries registered under `id`.
    ///
    /// If `id` names no provider of this registry, the request is passed on to
    /// the nested providers.
    pub fn unregister(&self, id: &ProviderIdentity) {
        let nested = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            Self::remove_locked(&mut state, id)
        };
        for sub in nested {
            sub.unregister(id);
        }
    }

    /// Remove under the write lock; returns the nested providers that still need
    /// to see the request.
    fn remove_locked(state: &mut State, id: &ProviderIdentity) -> Vec<Arc<dyn ConsumerProvider>> {
        if state.remove(id) {
            Vec::new()
        } else {
            state
                .providers
                .iter()
                .map(|(_, p)| Arc::clone(p))
                .collect()
        }
    }

    /// Bind `source` directly to consumer `id`, overwriting a previous binding.
    pub fn set(
        &self,
        id: ConsumerIdentity,
        provider: ProviderIdentity,
        source: Arc<dyn CredentialsSource>,
    ) {
        tracing::trace!(consumer = %id, provider = %provider, "set explicit credentials");
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .explicit
            .insert(id, ExplicitEntry { provider, source });
    }

    /// Identities of the registered providers, in consultation order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<ProviderIdentity> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .providers
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Consumer identities of the explicit table.
    #[must_use]
    pub fn explicit_consumers(&self) -> Vec<ConsumerIdentity> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .explicit
            .keys()
            .cloned()
            .collect()
    }

    fn providers(&self) -> Vec<Registration> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .providers
            .clone()
    }

    fn get_explicit(&self, id: &ConsumerIdentity) -> Option<Arc<dyn CredentialsSource>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .explicit
            .get(id)
            .map(|entry| Arc::clone(&entry.source))
    }

    /// Fold `matcher` over the explicit table.
    fn match_explicit(
        &self,
        request: &ConsumerIdentity,
        current: Option<ConsumerIdentity>,
        matcher: &dyn IdentityMatcher,
    ) -> (Option<Arc<dyn CredentialsSource>>, Option<ConsumerIdentity>) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut current = current;
        let mut found = None;
        for (candidate, entry) in &state.explicit {
            if matcher.is_better(request, current.as_ref(), candidate) {
                current = Some(candidate.clone());
                found = Some(Arc::clone(&entry.source));
            }
        }
        (found, current)
    }

    /// Evaluation context for asking `provider`, or `None` if the provider is
    /// already being resolved further up the call chain.
    fn guard(
        ectx: &EvaluationContext,
        recursion: &CredentialRecursion,
        provider: &dyn ConsumerIdentityProvider,
    ) -> Option<EvaluationContext> {
        let own = provider.consumer_id(&[]);
        if recursion.contains(&own) {
            return None;
        }
        Some(ectx.with(recursion.append(own)))
    }
}

#[async_trait]
impl ConsumerProvider for ConsumerProviderRegistry {
    fn unregister(&self, id: &ProviderIdentity) {
        Self::unregister(self, id);
    }

    async fn get(&self, id: &ConsumerIdentity) -> Result<Option<Arc<dyn CredentialsSource>>> {
        if let Some(source) = self.get_explicit(id) {
            return Ok(Some(source));
        }
        for (_, sub) in self.providers() {
            if let Some(source) = sub.get(id).await? {
                return Ok(Some(source));
            }
        }
        Ok(None)
    }

    async fn match_identity(
        &self,
        ectx: &EvaluationContext,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        matcher: &dyn IdentityMatcher,
    ) -> Result<MatchOutcome> {
        let (mut found, mut current) = self.match_explicit(request, current.cloned(), matcher);
        let providers = self.providers();
        let recursion = CredentialRecursion::of(ectx);

        for (id, sub) in &providers {
            tracing::trace!(
                pattern = %request,
                recursion = %recursion,
                provider = %id,
                "attempt match with provider"
            );
            let child = match sub.as_identity_provider() {
                Some(identity_provider) => {
                    match Self::guard(ectx, &recursion, identity_provider) {
                        Some(child) => child,
                        None => {
                            tracing::trace!(provider = %id, "provider already in flight, skipped");
                            continue;
                        }
                    }
                }
                None => ectx.clone(),
            };
            match sub
                .match_identity(&child, request, current.as_ref(), matcher)
                .await?
            {
                MatchOutcome::Found { source, identity } => {
                    found = Some(source);
                    current = Some(identity);
                }
                MatchOutcome::NotFound => {}
                MatchOutcome::CycleExhausted => {
                    tracing::trace!(provider = %id, "caught unwind, treating provider as no match");
                }
            }
        }

        if found.is_none() && !recursion.is_empty() && recursion.len() == providers.len() {
            tracing::trace!(recursion = %recursion, "impossible credential recursion, unwinding");
            return Ok(MatchOutcome::CycleExhausted);
        }

        Ok(match (found, current) {
            (Some(source), Some(identity)) => MatchOutcome::Found { source, identity },
            _ => MatchOutcome::NotFound,
        })
    }
}

impl std::fmt::Debug for ConsumerProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let providers: Vec<(&str, i32)> = state
            .providers
            .iter()
            .map(|(id, p)| (id.as_str(), p.priority()))
            .collect();
        f.debug_struct("ConsumerProviderRegistry")
            .field("explicit", &state.explicit.len())
            .field("providers", &providers)
            .finish()
    }
}
