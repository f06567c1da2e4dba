//! Real-thread comparison of the coordinator and the blocking harness.

use crate::config::SimulatorConfig;
use crate::workload::{SubsetWorkload, WorkloadGenerator};
use crate::SimulatorError;
use hdrhistogram::Histogram;
use lockset_coordinator::{AcquisitionResult, Coordinator, ResourceRegistry};
use lockset_harness::{DeadlockHarness, HarnessOutcome};
use lockset_simulation::{SimulationReport, SimulationRunner, Strategy};
use lockset_types::{ResourceId, WorkerId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Concurrent holder counts per resource.
///
/// Every granted set is entered before the critical section and exited
/// after; any count above one is a double hold.
#[derive(Debug)]
pub struct OccupancyTracker {
    holders: HashMap<ResourceId, AtomicUsize>,
    violations: AtomicU64,
}

impl OccupancyTracker {
    /// Track the given resources, all initially free.
    pub fn new(resources: &[ResourceId]) -> Self {
        Self {
            holders: resources
                .iter()
                .map(|id| (id.clone(), AtomicUsize::new(0)))
                .collect(),
            violations: AtomicU64::new(0),
        }
    }

    /// Record that the caller now holds `ids`. Returns false if any of them
    /// already had a holder.
    pub fn enter<'a>(&self, ids: impl IntoIterator<Item = &'a ResourceId>) -> bool {
        let mut exclusive = true;
        for id in ids {
            if let Some(count) = self.holders.get(id) {
                if count.fetch_add(1, Ordering::SeqCst) != 0 {
                    exclusive = false;
                }
            }
        }
        if !exclusive {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        exclusive
    }

    /// Record that the caller no longer holds `ids`.
    pub fn exit<'a>(&self, ids: impl IntoIterator<Item = &'a ResourceId>) {
        for id in ids {
            if let Some(count) = self.holders.get(id) {
                count.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Number of grants that overlapped another holder.
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }
}

/// Results of the coordinator run.
#[derive(Debug, Clone)]
pub struct CoordinatedReport {
    pub workers: usize,
    pub requested: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub aborted: u64,
    pub double_holds: u64,
    /// Attempts needed per granted request.
    pub attempts: Histogram<u64>,
    pub elapsed: Duration,
}

impl CoordinatedReport {
    /// Fraction of requests that were granted.
    pub fn completion_rate(&self) -> f64 {
        if self.requested == 0 {
            return 1.0;
        }
        self.completed as f64 / self.requested as f64
    }

    /// Print a human-readable summary.
    pub fn print(&self) {
        println!("Coordinator ({} workers, {:?})", self.workers, self.elapsed);
        println!(
            "  granted:      {}/{} ({:.2}%)",
            self.completed,
            self.requested,
            self.completion_rate() * 100.0
        );
        println!("  timed out:    {}", self.timed_out);
        println!("  aborted:      {}", self.aborted);
        println!("  double holds: {}", self.double_holds);
        println!(
            "  attempts:     mean {:.2}  p50 {}  p99 {}  max {}",
            self.attempts.mean(),
            self.attempts.value_at_quantile(0.5),
            self.attempts.value_at_quantile(0.99),
            self.attempts.max()
        );
    }
}

/// Coordinator and harness results for one workload.
#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub coordinated: CoordinatedReport,
    pub harness: HarnessOutcome,
}

impl ComparisonReport {
    /// Print both halves.
    pub fn print(&self) {
        self.coordinated.print();
        match &self.harness {
            HarnessOutcome::Completed { elapsed, .. } => {
                println!("Harness completed in {:?}", elapsed);
            }
            HarnessOutcome::Deadlocked { cycle, phases, .. } => {
                let cycle: Vec<String> = cycle.iter().map(ToString::to_string).collect();
                println!("Harness deadlocked: {}", cycle.join(" -> "));
                for (worker, phase) in phases {
                    println!("  {}: {}", worker, phase);
                }
            }
            HarnessOutcome::Stalled { phases, .. } => {
                println!("Harness stalled without a visible cycle");
                for (worker, phase) in phases {
                    println!("  {}: {}", worker, phase);
                }
            }
        }
    }
}

struct WorkerTally {
    completed: u64,
    timed_out: u64,
    aborted: u64,
    double_holds: u64,
    attempts: Histogram<u64>,
}

fn new_histogram() -> Result<Histogram<u64>, SimulatorError> {
    Histogram::new(3).map_err(|e| SimulatorError::Histogram(e.to_string()))
}

/// Drives one configuration through each strategy.
#[derive(Debug, Clone)]
pub struct Comparison {
    config: SimulatorConfig,
    workload: SubsetWorkload,
}

impl Comparison {
    /// Validate `config` and prepare its workload.
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.validate()?;
        let workload = SubsetWorkload::from_config(&config);
        Ok(Self { config, workload })
    }

    /// The configuration being run.
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Per-worker orders for strategies that repeat a fixed order.
    pub fn fixed_orders(&self) -> Vec<Vec<ResourceId>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.workload.fixed_orders(self.config.workers, &mut rng)
    }

    /// Run the workload through the coordinator on real threads.
    pub fn run_coordinated(&self) -> Result<CoordinatedReport, SimulatorError> {
        let resources = self.workload.resources().to_vec();
        let registry = Arc::new(ResourceRegistry::new(resources.iter().cloned()));
        let coordinator = Arc::new(Coordinator::new(
            registry,
            self.config.coordinator_config(),
        ));
        let tracker = Arc::new(OccupancyTracker::new(&resources));
        let started = Instant::now();

        let mut threads = Vec::with_capacity(self.config.workers);
        for index in 0..self.config.workers {
            let worker = WorkerId(index as u64);
            let coordinator = Arc::clone(&coordinator);
            let tracker = Arc::clone(&tracker);
            let workload = self.workload.clone();
            let iterations = self.config.iterations;
            let critical = Duration::from_micros(self.config.critical_section_us);
            let seed = self.config.seed;

            let handle = thread::Builder::new()
                .name(format!("coordinated-{}", index))
                .spawn(move || {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    rng.set_stream(worker.get());
                    run_worker(
                        worker,
                        index,
                        iterations,
                        critical,
                        &coordinator,
                        &tracker,
                        &workload,
                        &mut rng,
                    )
                })?;
            threads.push((worker, handle));
        }

        let mut report = CoordinatedReport {
            workers: self.config.workers,
            requested: self.config.iterations * self.config.workers as u64,
            completed: 0,
            timed_out: 0,
            aborted: 0,
            double_holds: 0,
            attempts: new_histogram()?,
            elapsed: Duration::ZERO,
        };
        for (worker, handle) in threads {
            let tally = handle
                .join()
                .map_err(|_| SimulatorError::WorkerPanicked(worker))??;
            report.completed += tally.completed;
            report.timed_out += tally.timed_out;
            report.aborted += tally.aborted;
            report.double_holds += tally.double_holds;
            report
                .attempts
                .add(&tally.attempts)
                .map_err(|e| SimulatorError::Histogram(e.to_string()))?;
        }
        report.elapsed = started.elapsed();

        if tracker.violations() != report.double_holds {
            error!(
                tracked = tracker.violations(),
                tallied = report.double_holds,
                "Double-hold counts disagree"
            );
        }
        info!(
            completed = report.completed,
            requested = report.requested,
            double_holds = report.double_holds,
            elapsed = ?report.elapsed,
            "Coordinated run finished"
        );
        Ok(report)
    }

    /// Run the blocking harness over the fixed orders, bounded by the
    /// configured hang bound.
    pub fn run_harness(&self) -> Result<HarnessOutcome, SimulatorError> {
        let mut harness = DeadlockHarness::new(
            self.config.harness_config(),
            self.workload.resources().iter().cloned(),
        );
        for (index, order) in self.fixed_orders().into_iter().enumerate() {
            harness.add_worker(WorkerId(index as u64), order)?;
        }
        let outcome = harness.run()?;
        info!(
            deadlocked = outcome.is_deadlocked(),
            completed = outcome.is_completed(),
            "Harness run finished"
        );
        Ok(outcome)
    }

    /// Run both real-thread strategies.
    pub fn run(&self) -> Result<ComparisonReport, SimulatorError> {
        Ok(ComparisonReport {
            coordinated: self.run_coordinated()?,
            harness: self.run_harness()?,
        })
    }

    /// Replay the fixed orders in virtual time under `strategy`.
    pub fn simulate(&self, strategy: Strategy) -> Result<SimulationReport, SimulatorError> {
        let config = self.config.simulation_config(strategy, self.fixed_orders());
        Ok(SimulationRunner::new(config)?.run())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    worker: WorkerId,
    index: usize,
    iterations: u64,
    critical: Duration,
    coordinator: &Coordinator,
    tracker: &OccupancyTracker,
    workload: &SubsetWorkload,
    rng: &mut ChaCha8Rng,
) -> Result<WorkerTally, SimulatorError> {
    let mut tally = WorkerTally {
        completed: 0,
        timed_out: 0,
        aborted: 0,
        double_holds: 0,
        attempts: new_histogram()?,
    };

    for _ in 0..iterations {
        let order = workload.next_order(index, rng);
        let request = coordinator.request(worker, &order)?;

        match coordinator.acquire(request) {
            AcquisitionResult::Granted(mut handle) => {
                if !tracker.enter(handle.resource_ids()) {
                    tally.double_holds += 1;
                    error!(worker = %worker, "Resource held by two workers at once");
                }
                if critical.is_zero() {
                    thread::yield_now();
                } else {
                    thread::sleep(critical);
                }
                tracker.exit(handle.resource_ids());
                tally
                    .attempts
                    .record(u64::from(handle.attempts()))
                    .map_err(|e| SimulatorError::Histogram(e.to_string()))?;
                handle.release();
                tally.completed += 1;
            }
            AcquisitionResult::TimedOut { attempts } => {
                debug!(worker = %worker, attempts, "Request timed out");
                tally.timed_out += 1;
            }
            AcquisitionResult::Aborted { attempts } => {
                debug!(worker = %worker, attempts, "Request aborted");
                tally.aborted += 1;
            }
        }
    }
    Ok(tally)
}
