//! Shared fixtures for lockset tests.

use lockset_core::ResourceRegistry;
use lockset_types::ResourceId;

/// The three-resource registry used by most scenarios: `A`, `B`, `C`.
pub fn registry_abc() -> ResourceRegistry {
    ResourceRegistry::new(["A", "B", "C"])
}

/// Convert static names into resource ids.
pub fn ids(names: &[&'static str]) -> Vec<ResourceId> {
    names.iter().copied().map(ResourceId::from_static).collect()
}

/// Antiparallel orders over a ring of resources: worker `i` wants
/// `[ring[i], ring[i + 1]]`, wrapping around, so every resource is wanted
/// first by one worker and second by another.
pub fn ring_orders(ring: &[ResourceId]) -> Vec<Vec<ResourceId>> {
    (0..ring.len())
        .map(|i| vec![ring[i].clone(), ring[(i + 1) % ring.len()].clone()])
        .collect()
}
