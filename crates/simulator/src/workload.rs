//! Request-order generation for simulator workers.

use crate::config::{OrderMode, SimulatorConfig};
use lockset_types::ResourceId;
use rand::seq::SliceRandom;
use rand::Rng;

/// Trait for producing the resource orders workers request.
pub trait WorkloadGenerator {
    /// The order worker `index` should request next.
    fn next_order(&self, index: usize, rng: &mut impl Rng) -> Vec<ResourceId>;

    /// One order per worker, for runners whose workers repeat a fixed order.
    fn fixed_orders(&self, workers: usize, rng: &mut impl Rng) -> Vec<Vec<ResourceId>> {
        (0..workers).map(|index| self.next_order(index, rng)).collect()
    }
}

/// Overlapping subsets of a shared resource set.
#[derive(Clone, Debug)]
pub struct SubsetWorkload {
    resources: Vec<ResourceId>,
    subset_size: usize,
    ordering: OrderMode,
}

impl SubsetWorkload {
    /// Create a workload drawing `subset_size` resources per request.
    ///
    /// `subset_size` is clamped to the number of resources.
    pub fn new(resources: Vec<ResourceId>, subset_size: usize, ordering: OrderMode) -> Self {
        let subset_size = subset_size.clamp(1, resources.len().max(1));
        Self {
            resources,
            subset_size,
            ordering,
        }
    }

    /// Build the workload described by a simulator configuration.
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::new(config.resource_ids(), config.subset_size, config.ordering)
    }

    /// The shared resources.
    pub fn resources(&self) -> &[ResourceId] {
        &self.resources
    }

    fn window(&self, index: usize) -> Vec<ResourceId> {
        let n = self.resources.len();
        (0..self.subset_size)
            .map(|offset| self.resources[(index + offset) % n].clone())
            .collect()
    }
}

impl WorkloadGenerator for SubsetWorkload {
    fn next_order(&self, index: usize, rng: &mut impl Rng) -> Vec<ResourceId> {
        if self.resources.is_empty() {
            return Vec::new();
        }
        match self.ordering {
            OrderMode::Permuted => {
                let mut order: Vec<ResourceId> = self
                    .resources
                    .choose_multiple(rng, self.subset_size)
                    .cloned()
                    .collect();
                order.shuffle(rng);
                order
            }
            OrderMode::Antiparallel => self.window(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockset_test_helpers::ids;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    #[test]
    fn test_permuted_orders_are_distinct_subsets() {
        let workload = SubsetWorkload::new(ids(&["A", "B", "C"]), 2, OrderMode::Permuted);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let order = workload.next_order(0, &mut rng);
            assert_eq!(order.len(), 2);
            assert_ne!(order[0], order[1]);
            seen.insert(order);
        }
        // Three pairs, two orders each.
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_antiparallel_orders_form_a_ring() {
        let workload = SubsetWorkload::new(ids(&["A", "B", "C"]), 2, OrderMode::Antiparallel);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let orders = workload.fixed_orders(3, &mut rng);
        assert_eq!(
            orders,
            vec![ids(&["A", "B"]), ids(&["B", "C"]), ids(&["C", "A"])]
        );
    }

    #[test]
    fn test_two_workers_two_resources_are_reversed() {
        let workload = SubsetWorkload::new(ids(&["A", "B"]), 2, OrderMode::Antiparallel);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let orders = workload.fixed_orders(2, &mut rng);
        assert_eq!(orders, vec![ids(&["A", "B"]), ids(&["B", "A"])]);
    }

    #[test]
    fn test_subset_size_clamped() {
        let workload = SubsetWorkload::new(ids(&["A", "B"]), 5, OrderMode::Permuted);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(workload.next_order(0, &mut rng).len(), 2);
    }
}
