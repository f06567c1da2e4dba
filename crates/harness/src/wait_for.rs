//! Wait-for graph for circular-wait detection.
//!
//! Each worker holds some resources and waits on at most one more. The graph
//! keeps both directions of the relation so that a cycle can be followed
//! edge by edge:
//!
//! 1. Given a worker, which resource is it waiting for?
//! 2. Given a resource, which worker holds it?
//!
//! Following `worker -> wanted resource -> holder -> wanted resource -> ...`
//! either reaches a worker that is not waiting (no deadlock on that path) or
//! revisits a worker (circular wait).

use lockset_types::{ResourceId, WorkerId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Snapshot of who holds what and who waits for what.
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    /// worker -> resources it holds
    held_by_worker: BTreeMap<WorkerId, BTreeSet<ResourceId>>,
    /// Reverse index: resource -> worker holding it
    holder_of: HashMap<ResourceId, WorkerId>,
    /// worker -> resource it is blocked on
    waiting_on: BTreeMap<WorkerId, ResourceId>,
}

impl WaitForGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `worker` holds `resource`.
    pub fn hold(&mut self, worker: WorkerId, resource: ResourceId) {
        self.holder_of.insert(resource.clone(), worker);
        self.held_by_worker.entry(worker).or_default().insert(resource);
    }

    /// Record that `worker` is blocked on `resource`.
    pub fn wait(&mut self, worker: WorkerId, resource: ResourceId) {
        self.waiting_on.insert(worker, resource);
    }

    /// Forget everything about a worker (finished, or gave up).
    ///
    /// Cleans up both the forward and reverse indexes.
    pub fn remove(&mut self, worker: WorkerId) {
        if let Some(resources) = self.held_by_worker.remove(&worker) {
            for resource in resources {
                if self.holder_of.get(&resource) == Some(&worker) {
                    self.holder_of.remove(&resource);
                }
            }
        }
        self.waiting_on.remove(&worker);
    }

    /// The worker holding `resource`, if any.
    pub fn holder(&self, resource: &ResourceId) -> Option<WorkerId> {
        self.holder_of.get(resource).copied()
    }

    /// The resource `worker` is blocked on, if any.
    pub fn waiting_for(&self, worker: WorkerId) -> Option<&ResourceId> {
        self.waiting_on.get(&worker)
    }

    /// Resources held by `worker`.
    pub fn held(&self, worker: WorkerId) -> Option<&BTreeSet<ResourceId>> {
        self.held_by_worker.get(&worker)
    }

    /// Find a circular wait, if one exists.
    ///
    /// Returns the workers on the cycle, starting from the smallest id, in
    /// wait order (each waits on a resource held by the next).
    pub fn find_cycle(&self) -> Option<Vec<WorkerId>> {
        for &start in self.waiting_on.keys() {
            let mut path: Vec<WorkerId> = Vec::new();
            let mut current = start;

            loop {
                if let Some(pos) = path.iter().position(|&w| w == current) {
                    let mut cycle = path.split_off(pos);
                    let min = cycle
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, w)| **w)
                        .map_or(0, |(i, _)| i);
                    cycle.rotate_left(min);
                    return Some(cycle);
                }
                path.push(current);

                let next = self
                    .waiting_on
                    .get(&current)
                    .and_then(|resource| self.holder_of.get(resource));
                match next {
                    Some(&holder) => current = holder,
                    None => break,
                }
            }
        }
        None
    }

    /// Number of workers that are blocked.
    pub fn waiting_len(&self) -> usize {
        self.waiting_on.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.held_by_worker.is_empty() && self.waiting_on.is_empty()
    }
}
