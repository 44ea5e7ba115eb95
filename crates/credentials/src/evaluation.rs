//! Evaluation context threaded through a resolution call
//!
//! An [`EvaluationContext`] is an immutable map from a payload type to a value of
//! that type. Extending it returns a new context and leaves the original
//! untouched, so sibling calls in a recursive resolution never observe each
//! other's entries.

use crate::identity::ConsumerIdentity;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

trait Payload: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone)]
struct Entry {
    type_name: &'static str,
    value: Arc<dyn Payload>,
}

/// Immutable, type-keyed side channel of a resolution call.
#[derive(Clone, Default)]
pub struct EvaluationContext {
    entries: Arc<HashMap<TypeId, Entry>>,
}

impl EvaluationContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the payload of type `T`, if present.
    #[must_use]
    pub fn get<T: Any + Send + Sync + fmt::Debug>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|e| (*e.value).as_any().downcast_ref::<T>())
    }

    /// Return a new context with `value` set as payload of type `T`.
    #[must_use]
    pub fn with<T: Any + Send + Sync + fmt::Debug>(&self, value: T) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(
            TypeId::of::<T>(),
            Entry {
                type_name: std::any::type_name::<T>(),
                value: Arc::new(value),
            },
        );
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Check whether the context carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.entries.values() {
            map.entry(&entry.type_name, &entry.value);
        }
        map.finish()
    }
}

/// Consumer identities of the providers currently being resolved earlier in the
/// same call chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRecursion {
    stack: Vec<ConsumerIdentity>,
}

impl CredentialRecursion {
    /// The recursion stack carried by `ectx` (empty if none).
    #[must_use]
    pub fn of(ectx: &EvaluationContext) -> Self {
        ectx.get::<Self>().cloned().unwrap_or_default()
    }

    /// Check whether `identity` is on the stack.
    #[must_use]
    pub fn contains(&self, identity: &ConsumerIdentity) -> bool {
        self.stack.contains(identity)
    }

    /// Copy of this stack with `identity` appended (unless already present).
    #[must_use]
    pub fn append(&self, identity: ConsumerIdentity) -> Self {
        let mut stack = self.stack.clone();
        if !stack.contains(&identity) {
            stack.push(identity);
        }
        Self { stack }
    }

    /// Stack depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Check whether no provider is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Identities on the stack, outermost first.
    pub fn iter(&self) -> impl Iterator<Item = &ConsumerIdentity> {
        self.stack.iter()
    }
}

impl fmt::Display for CredentialRecursion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.stack.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", ids.join(", "))
    }
}

impl From<ConsumerIdentity> for CredentialRecursion {
    fn from(identity: ConsumerIdentity) -> Self {
        Self {
            stack: vec![identity],
        }
    }
}
