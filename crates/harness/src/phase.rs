//! Per-worker state of the blocking harness.

use crate::WaitForGraph;
use lockset_types::{ResourceId, WorkerId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

/// Where a harness worker is in its acquisition cycle.
///
/// `Idle -> WaitingFor -> Holding -> WaitingFor -> ... -> HoldingAll -> Idle`.
/// `WaitingFor` has no timeout: a worker leaves it only when the lock frees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessPhase {
    /// Between iterations, holding nothing.
    Idle,
    /// Holding a prefix of its order, about to ask for the next resource.
    Holding { held: Vec<ResourceId> },
    /// Blocked on `wanted` while holding `held`.
    WaitingFor {
        held: Vec<ResourceId>,
        wanted: ResourceId,
    },
    /// Holding every resource in its order; in the critical section.
    HoldingAll { held: Vec<ResourceId> },
    /// All iterations done.
    Finished,
}

impl HarnessPhase {
    fn held(&self) -> &[ResourceId] {
        match self {
            HarnessPhase::Holding { held }
            | HarnessPhase::WaitingFor { held, .. }
            | HarnessPhase::HoldingAll { held } => held,
            HarnessPhase::Idle | HarnessPhase::Finished => &[],
        }
    }
}

impl fmt::Display for HarnessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessPhase::Idle => write!(f, "idle"),
            HarnessPhase::Holding { held } => write!(f, "holding {}", held.len()),
            HarnessPhase::WaitingFor { held, wanted } => {
                write!(f, "holding {} waiting for {}", held.len(), wanted)
            }
            HarnessPhase::HoldingAll { .. } => write!(f, "holding all"),
            HarnessPhase::Finished => write!(f, "finished"),
        }
    }
}

/// Shared board where harness workers publish their phase.
///
/// The watchdog reads it to produce a "thread dump" and a wait-for graph.
#[derive(Debug, Default)]
pub struct PhaseBoard {
    phases: Mutex<BTreeMap<WorkerId, (HarnessPhase, u64)>>,
}

impl PhaseBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a worker's phase.
    pub fn set(&self, worker: WorkerId, phase: HarnessPhase) {
        self.phases
            .lock()
            .entry(worker)
            .and_modify(|(p, _)| *p = phase.clone())
            .or_insert((phase, 0));
    }

    /// Count one finished iteration for a worker.
    pub fn complete_iteration(&self, worker: WorkerId) {
        if let Some((_, done)) = self.phases.lock().get_mut(&worker) {
            *done += 1;
        }
    }

    /// Copy of every worker's phase.
    pub fn snapshot(&self) -> BTreeMap<WorkerId, HarnessPhase> {
        self.phases
            .lock()
            .iter()
            .map(|(w, (p, _))| (*w, p.clone()))
            .collect()
    }

    /// Iterations completed per worker.
    pub fn iterations(&self) -> BTreeMap<WorkerId, u64> {
        self.phases
            .lock()
            .iter()
            .map(|(w, (_, done))| (*w, *done))
            .collect()
    }

    /// Whether every registered worker has finished.
    pub fn all_finished(&self) -> bool {
        self.phases
            .lock()
            .values()
            .all(|(p, _)| *p == HarnessPhase::Finished)
    }

    /// Build the wait-for graph implied by a snapshot.
    pub fn wait_for_graph(snapshot: &BTreeMap<WorkerId, HarnessPhase>) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for (&worker, phase) in snapshot {
            for resource in phase.held() {
                graph.hold(worker, resource.clone());
            }
            if let HarnessPhase::WaitingFor { wanted, .. } = phase {
                graph.wait(worker, wanted.clone());
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_tracks_phases_and_iterations() {
        let board = PhaseBoard::new();
        let w = WorkerId(1);

        board.set(w, HarnessPhase::Idle);
        board.complete_iteration(w);
        board.set(
            w,
            HarnessPhase::Holding {
                held: vec![ResourceId::from("A")],
            },
        );

        assert_eq!(board.iterations()[&w], 1);
        assert!(!board.all_finished());

        board.set(w, HarnessPhase::Finished);
        assert!(board.all_finished());
    }

    #[test]
    fn test_snapshot_to_graph() {
        let a = ResourceId::from("A");
        let b = ResourceId::from("B");
        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            WorkerId(1),
            HarnessPhase::WaitingFor {
                held: vec![a.clone()],
                wanted: b.clone(),
            },
        );
        snapshot.insert(
            WorkerId(2),
            HarnessPhase::WaitingFor {
                held: vec![b],
                wanted: a,
            },
        );

        let graph = PhaseBoard::wait_for_graph(&snapshot);
        assert_eq!(graph.find_cycle(), Some(vec![WorkerId(1), WorkerId(2)]));
    }
}
