//! Fixed, process-wide set of resources.

use crate::Resource;
use indexmap::IndexMap;
use lockset_types::ResourceId;
use std::sync::Arc;

/// The fixed set of resources a process contends over.
///
/// Built once at startup and never mutated afterwards; iteration follows
/// insertion order. Each resource exists exactly once and is handed out by
/// reference.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: IndexMap<ResourceId, Arc<Resource>>,
}

impl ResourceRegistry {
    /// Build a registry from resource ids.
    ///
    /// A repeated id is ignored; the first occurrence wins.
    pub fn new<I, R>(ids: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourceId>,
    {
        let mut resources = IndexMap::new();
        for id in ids {
            let id = id.into();
            resources
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Resource::new(id)));
        }
        Self { resources }
    }

    /// Look up a resource by id.
    pub fn get(&self, id: &ResourceId) -> Option<&Arc<Resource>> {
        self.resources.get(id)
    }

    /// Iterate resources in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    /// Iterate resource ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Ids of resources that are currently held by anyone.
    pub fn held(&self) -> Vec<ResourceId> {
        self.resources
            .values()
            .filter(|r| !r.is_free())
            .map(|r| r.id().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockset_types::WorkerId;
    use std::time::Duration;

    #[test]
    fn test_registry_basic() {
        let registry = ResourceRegistry::new(["A", "B", "C"]);

        assert_eq!(registry.len(), 3);
        let ids: Vec<_> = registry.ids().map(|id| id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        let b = registry.get(&ResourceId::from("B")).unwrap();
        assert_eq!(b.id(), &ResourceId::from("B"));
        assert!(registry.get(&ResourceId::from("Z")).is_none());
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let registry = ResourceRegistry::new(["A", "B", "A"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookups_share_state() {
        let registry = ResourceRegistry::new(["A"]);
        let id = ResourceId::from("A");

        let first = Arc::clone(registry.get(&id).unwrap());
        assert!(first.try_acquire(WorkerId(1), Duration::ZERO));

        assert_eq!(registry.get(&id).unwrap().holder(), Some(WorkerId(1)));
        assert_eq!(registry.held(), vec![id]);

        first.release(WorkerId(1)).unwrap();
        assert!(registry.held().is_empty());
    }
}
