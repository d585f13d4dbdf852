//! Named cluster indexes.
//!
//! Script callers address a loaded [`Supercluster`] by a name they choose at
//! load time. The registry is cheaply cloneable; clones share the same map.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::ClusterError;
use crate::supercluster::Supercluster;
use crate::types::{ClusterOptions, PointFeature};

#[derive(Clone, Default)]
pub struct ClusterRegistry {
    inner: Arc<RwLock<BTreeMap<String, Arc<Supercluster>>>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from `features` and register it under `name`.
    ///
    /// Fails with [`ClusterError::DuplicateName`] if `name` is taken; the
    /// caller must [`destroy`](Self::destroy) it first.
    pub fn load(
        &self,
        name: &str,
        features: Vec<PointFeature>,
        options: ClusterOptions,
    ) -> Result<(), ClusterError> {
        if self.inner.read().contains_key(name) {
            return Err(ClusterError::DuplicateName { name: name.into() });
        }

        let points = features.len();
        let index = Arc::new(Supercluster::new(features, options)?);

        // Re-checked under the write lock: another thread may have won the race.
        let mut inner = self.inner.write();
        if inner.contains_key(name) {
            return Err(ClusterError::DuplicateName { name: name.into() });
        }
        inner.insert(name.to_string(), index);
        drop(inner);

        tracing::info!(name, points, "clusterer loaded");
        Ok(())
    }

    /// Run `f` against the index registered under `name`.
    pub fn with<R>(
        &self,
        name: &str,
        f: impl FnOnce(&Supercluster) -> R,
    ) -> Result<R, ClusterError> {
        let index = self
            .get(name)
            .ok_or_else(|| ClusterError::UnknownInstance { name: name.into() })?;
        Ok(f(&index))
    }

    /// Shared handle to the index under `name`. Queries on it don't hold the
    /// registry lock.
    pub fn get(&self, name: &str) -> Option<Arc<Supercluster>> {
        self.inner.read().get(name).cloned()
    }

    /// Remove `name`. Returns `true` if it was registered.
    pub fn destroy(&self, name: &str) -> bool {
        let removed = self.inner.write().remove(name).is_some();
        if removed {
            tracing::debug!(name, "clusterer destroyed");
        }
        removed
    }

    /// Drop every index.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let count = inner.len();
        inner.clear();
        tracing::debug!(count, "clusterer registry cleared");
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

impl std::fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<PointFeature> {
        vec![
            PointFeature::new(10.0, 20.0),
            PointFeature::new(10.001, 20.001),
        ]
    }

    #[test]
    fn load_query_destroy() {
        let registry = ClusterRegistry::new();
        registry
            .load("shops", points(), ClusterOptions::default())
            .unwrap();
        assert_eq!(registry.len(), 1);

        let count = registry
            .with("shops", |sc| sc.features().len())
            .unwrap();
        assert_eq!(count, 2);

        assert!(registry.destroy("shops"));
        assert!(!registry.destroy("shops"));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = ClusterRegistry::new();
        registry
            .load("a", points(), ClusterOptions::default())
            .unwrap();
        let err = registry
            .load("a", points(), ClusterOptions::default())
            .unwrap_err();
        assert!(matches!(err, ClusterError::DuplicateName { ref name } if name == "a"));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = ClusterRegistry::new();
        let err = registry.with("missing", |_| ()).unwrap_err();
        assert!(matches!(err, ClusterError::UnknownInstance { .. }));
    }

    #[test]
    fn invalid_options_do_not_register() {
        let registry = ClusterRegistry::new();
        let options = ClusterOptions {
            radius: 0,
            ..ClusterOptions::default()
        };
        assert!(registry.load("bad", points(), options).is_err());
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn clones_share_state_and_clear_empties() {
        let registry = ClusterRegistry::new();
        let other = registry.clone();
        registry
            .load("b", points(), ClusterOptions::default())
            .unwrap();
        registry
            .load("a", points(), ClusterOptions::default())
            .unwrap();

        assert_eq!(other.names(), vec!["a".to_string(), "b".to_string()]);
        other.clear();
        assert!(registry.is_empty());
    }
}
