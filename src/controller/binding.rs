//! # Binding Index
//!
//! In-memory view of the `AzureKeyVaultSecret` resources the watch has seen, keyed the
//! same way as the work queue.
//!
//! Deleted bindings leave a tombstone (destination name and object reference) so the
//! reconciler can clean up the destination after the resource itself is gone.

use crate::crd::{AzureKeyVaultSecret, AzureKeyVaultSecretSpec};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// `namespace/name` of a binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub namespace: String,
    pub name: String,
}

impl BindingKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Work queue key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueKey {
    Binding(BindingKey),
    /// Singleton key for the CA bundle artifact
    CaBundle,
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binding(key) => key.fmt(f),
            Self::CaBundle => f.write_str("ca-bundle"),
        }
    }
}

/// The parts of an `AzureKeyVaultSecret` the reconciler needs
#[derive(Debug, Clone)]
pub struct TrackedBinding {
    pub key: BindingKey,
    pub generation: Option<i64>,
    pub spec: AzureKeyVaultSecretSpec,
    /// Event target
    pub object_ref: ObjectReference,
}

impl TrackedBinding {
    /// `None` for resources without a name or namespace
    #[must_use]
    pub fn from_resource(resource: &AzureKeyVaultSecret) -> Option<Self> {
        let namespace = resource.metadata.namespace.clone()?;
        let name = resource.metadata.name.clone()?;
        Some(Self {
            key: BindingKey { namespace, name },
            generation: resource.metadata.generation,
            spec: resource.spec.clone(),
            object_ref: resource.object_ref(&()),
        })
    }

    /// Name of the destination secret
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.spec.output.secret.name
    }
}

/// What is left of a deleted binding
#[derive(Debug, Clone)]
pub struct Tombstone {
    pub destination: String,
    pub object_ref: ObjectReference,
}

#[derive(Debug, Default)]
struct IndexState {
    live: HashMap<BindingKey, Arc<TrackedBinding>>,
    tombstones: HashMap<BindingKey, Tombstone>,
}

/// Live bindings plus tombstones of deleted ones
#[derive(Debug, Default)]
pub struct BindingIndex {
    state: Mutex<IndexState>,
}

impl BindingIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert or update a binding; clears any tombstone under the same key
    pub fn upsert(&self, binding: TrackedBinding) -> BindingKey {
        let key = binding.key.clone();
        let mut state = self.lock();
        state.tombstones.remove(&key);
        state.live.insert(key.clone(), Arc::new(binding));
        key
    }

    /// Move a binding to the tombstones; returns `false` if it was not tracked
    pub fn remove(&self, key: &BindingKey) -> bool {
        let mut state = self.lock();
        match state.live.remove(key) {
            Some(binding) => {
                state.tombstones.insert(
                    key.clone(),
                    Tombstone {
                        destination: binding.destination().to_string(),
                        object_ref: binding.object_ref.clone(),
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Replace the live set after a full relist
    ///
    /// Returns the keys that disappeared; they are tombstoned and need a reconciliation.
    pub fn replace_all(&self, bindings: Vec<TrackedBinding>) -> Vec<BindingKey> {
        let incoming: HashMap<BindingKey, Arc<TrackedBinding>> = bindings
            .into_iter()
            .map(|b| (b.key.clone(), Arc::new(b)))
            .collect();

        let mut state = self.lock();
        let removed: Vec<BindingKey> = state
            .live
            .keys()
            .filter(|k| !incoming.contains_key(*k))
            .cloned()
            .collect();
        for key in &removed {
            if let Some(binding) = state.live.get(key).cloned() {
                state.tombstones.insert(
                    key.clone(),
                    Tombstone {
                        destination: binding.destination().to_string(),
                        object_ref: binding.object_ref.clone(),
                    },
                );
            }
        }
        for key in incoming.keys() {
            state.tombstones.remove(key);
        }
        state.live = incoming;
        removed
    }

    #[must_use]
    pub fn get(&self, key: &BindingKey) -> Option<Arc<TrackedBinding>> {
        self.lock().live.get(key).cloned()
    }

    #[must_use]
    pub fn tombstone(&self, key: &BindingKey) -> Option<Tombstone> {
        self.lock().tombstones.get(key).cloned()
    }

    pub fn clear_tombstone(&self, key: &BindingKey) {
        self.lock().tombstones.remove(key);
    }

    /// Keys of all live bindings
    #[must_use]
    pub fn keys(&self) -> Vec<BindingKey> {
        self.lock().live.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
