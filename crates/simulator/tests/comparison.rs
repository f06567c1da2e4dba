//! Coordinator against blocking harness on the same workloads.

use lockset_harness::HarnessOutcome;
use lockset_simulation::Strategy;
use lockset_simulator::{Comparison, OrderMode, SimulatorConfig};
use std::time::Duration;
use tracing_test::traced_test;

const HARNESS_RUNS: usize = 5;

#[traced_test]
#[test]
fn test_coordinator_never_double_holds_permuted_pairs() {
    let config = SimulatorConfig::default()
        .with_workers(3)
        .with_iterations(10_000)
        .with_ordering(OrderMode::Permuted);
    assert_eq!(config.resources, vec!["A", "B", "C"]);
    assert_eq!(config.subset_size, 2);

    let report = Comparison::new(config)
        .unwrap()
        .run_coordinated()
        .unwrap();

    assert_eq!(report.double_holds, 0);
    assert_eq!(report.requested, 30_000);
    assert_eq!(report.completed, 30_000);
    assert_eq!(report.timed_out, 0);
    assert_eq!(report.attempts.len(), 30_000);
}

#[traced_test]
#[test]
fn test_coordinator_completes_antiparallel_ring() {
    let config = SimulatorConfig::default()
        .with_iterations(2_000)
        .with_ordering(OrderMode::Antiparallel);

    let report = Comparison::new(config)
        .unwrap()
        .run_coordinated()
        .unwrap();

    assert_eq!(report.double_holds, 0);
    assert_eq!(report.completion_rate(), 1.0);
}

#[traced_test]
#[test]
fn test_harness_deadlocks_on_antiparallel_orders() {
    let config = SimulatorConfig::default()
        .with_workers(3)
        .with_ordering(OrderMode::Antiparallel)
        .with_hang_bound(Duration::from_secs(2));
    let comparison = Comparison::new(config).unwrap();

    let mut cycle = None;
    for _ in 0..HARNESS_RUNS {
        if let HarnessOutcome::Deadlocked { cycle: found, .. } = comparison.run_harness().unwrap()
        {
            cycle = Some(found);
            break;
        }
    }

    let cycle = cycle.expect("harness never deadlocked");
    assert_eq!(cycle.len(), 3);
}

#[test]
fn test_simulated_strategies_diverge() {
    let config = SimulatorConfig::default()
        .with_iterations(1_000)
        .with_ordering(OrderMode::Antiparallel);
    let comparison = Comparison::new(config).unwrap();

    let blocking = comparison.simulate(Strategy::Blocking).unwrap();
    assert!(blocking.is_deadlocked());
    assert_eq!(blocking, comparison.simulate(Strategy::Blocking).unwrap());

    let coordinated = comparison.simulate(Strategy::Coordinated).unwrap();
    assert!(coordinated.is_completed());
    assert!(coordinated.workers.iter().all(|w| w.completed == 1_000));
}
