//! In-memory consumer provider

use async_trait::async_trait;
use ocx_credentials::{
    ConsumerIdentity, ConsumerProvider, CredentialsSource, DEFAULT_PRIORITY, EvaluationContext,
    IdentityMatcher, MatchOutcome, ProviderIdentity, Result,
};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Map from consumer identity to credentials source.
///
/// Unlike explicit entries of a context, a memory provider can be registered,
/// prioritized and unregistered as a whole.
pub struct MemoryProvider {
    entries: RwLock<BTreeMap<ConsumerIdentity, Arc<dyn CredentialsSource>>>,
    priority: i32,
}

impl MemoryProvider {
    /// Create an empty provider with the default priority.
    #[must_use]
    pub fn new() -> Self {
        Self::with_priority(DEFAULT_PRIORITY)
    }

    /// Create an empty provider with the given priority.
    #[must_use]
    pub fn with_priority(priority: i32) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            priority,
        }
    }

    /// Bind a source to a consumer identity.
    pub fn insert(&self, identity: ConsumerIdentity, source: Arc<dyn CredentialsSource>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, source);
    }

    /// Remove a binding; returns the removed source.
    pub fn remove(&self, identity: &ConsumerIdentity) -> Option<Arc<dyn CredentialsSource>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check whether the provider has no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsumerProvider for MemoryProvider {
    fn unregister(&self, _id: &ProviderIdentity) {}

    async fn get(&self, id: &ConsumerIdentity) -> Result<Option<Arc<dyn CredentialsSource>>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn match_identity(
        &self,
        _ectx: &EvaluationContext,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        matcher: &dyn IdentityMatcher,
    ) -> Result<MatchOutcome> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut current = current;
        let mut found = None;
        for (identity, source) in entries.iter() {
            if matcher.is_better(request, current, identity) {
                current = Some(identity);
                found = Some(MatchOutcome::Found {
                    source: Arc::clone(source),
                    identity: identity.clone(),
                });
            }
        }
        Ok(found.unwrap_or(MatchOutcome::NotFound))
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("entries", &self.len())
            .field("priority", &self.priority)
            .finish()
    }
}
