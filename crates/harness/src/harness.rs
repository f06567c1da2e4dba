//! Blocking fixed-order acquisition: the strategy that deadlocks.
//!
//! Every worker locks its resources one after another with unconditional
//! blocking locks, in its own order, never backing off. When two workers'
//! orders conflict (A then B versus B then A) and both take their first lock
//! before either takes its second, both wait forever.
//!
//! Worker threads that deadlock cannot be reclaimed. [`HarnessRun::wait`]
//! gives up after a wall-clock bound and reports what it saw; the stuck
//! threads stay parked until the process exits.

use crate::{HarnessPhase, PhaseBoard};
use indexmap::IndexMap;
use lockset_types::{ResourceId, WorkerId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// How often the waiting thread polls for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Errors while setting up or starting the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A worker's order names an unregistered resource.
    #[error("{0} is not registered with the harness")]
    UnknownResource(ResourceId),

    /// A worker's order names the same resource twice.
    #[error("{0} appears more than once in a worker's order")]
    DuplicateResource(ResourceId),

    /// Two workers share an id.
    #[error("{0} is already registered")]
    DuplicateWorker(WorkerId),

    /// A worker was given an empty order.
    #[error("{0} has an empty lock order")]
    EmptyOrder(WorkerId),

    /// A worker thread could not be spawned.
    #[error("Failed to spawn harness worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Configuration for a harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Lock cycles each worker performs.
    pub iterations: u64,

    /// Pause after taking each lock before asking for the next one.
    ///
    /// Widens the window in which conflicting orders interleave.
    pub hold_between: Duration,

    /// Time spent holding every lock.
    pub critical_section: Duration,

    /// Wall-clock time after which a run that has not finished counts as hung.
    pub hang_bound: Duration,

    /// How often the watchdog logs a phase dump while waiting.
    pub watchdog_interval: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            hold_between: Duration::from_millis(100),
            critical_section: Duration::ZERO,
            hang_bound: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(1),
        }
    }
}

impl HarnessConfig {
    /// Set the iterations per worker.
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the pause between successive locks.
    pub fn with_hold_between(mut self, hold: Duration) -> Self {
        self.hold_between = hold;
        self
    }

    /// Set the critical-section length.
    pub fn with_critical_section(mut self, critical: Duration) -> Self {
        self.critical_section = critical;
        self
    }

    /// Set the hang bound.
    pub fn with_hang_bound(mut self, bound: Duration) -> Self {
        self.hang_bound = bound;
        self
    }
}

/// What a harness run ended as.
#[derive(Debug, Clone)]
pub enum HarnessOutcome {
    /// Every worker finished all iterations.
    Completed {
        elapsed: Duration,
        iterations: BTreeMap<WorkerId, u64>,
    },

    /// The run hung and the phase snapshot contains a circular wait.
    Deadlocked {
        cycle: Vec<WorkerId>,
        phases: BTreeMap<WorkerId, HarnessPhase>,
        iterations: BTreeMap<WorkerId, u64>,
    },

    /// The run did not finish within the bound but no cycle was visible.
    Stalled {
        phases: BTreeMap<WorkerId, HarnessPhase>,
        iterations: BTreeMap<WorkerId, u64>,
    },
}

impl HarnessOutcome {
    /// Whether a circular wait was observed.
    pub fn is_deadlocked(&self) -> bool {
        matches!(self, HarnessOutcome::Deadlocked { .. })
    }

    /// Whether every worker finished.
    pub fn is_completed(&self) -> bool {
        matches!(self, HarnessOutcome::Completed { .. })
    }
}

/// A set of blocking locks and the workers that take them in fixed orders.
#[derive(Debug)]
pub struct DeadlockHarness {
    config: HarnessConfig,
    locks: IndexMap<ResourceId, Arc<Mutex<()>>>,
    workers: Vec<(WorkerId, Vec<ResourceId>)>,
}

impl DeadlockHarness {
    /// Create a harness over the given resources with no workers yet.
    pub fn new<I, R>(config: HarnessConfig, resources: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourceId>,
    {
        let locks = resources
            .into_iter()
            .map(|id| (id.into(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            config,
            locks,
            workers: Vec::new(),
        }
    }

    /// Register a worker that locks `order` front to back.
    pub fn add_worker(
        &mut self,
        worker: WorkerId,
        order: Vec<ResourceId>,
    ) -> Result<(), HarnessError> {
        if self.workers.iter().any(|(w, _)| *w == worker) {
            return Err(HarnessError::DuplicateWorker(worker));
        }
        if order.is_empty() {
            return Err(HarnessError::EmptyOrder(worker));
        }
        let mut seen = HashSet::new();
        for id in &order {
            if !self.locks.contains_key(id) {
                return Err(HarnessError::UnknownResource(id.clone()));
            }
            if !seen.insert(id) {
                return Err(HarnessError::DuplicateResource(id.clone()));
            }
        }
        self.workers.push((worker, order));
        Ok(())
    }

    /// The harness configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Start every worker on its own thread.
    pub fn spawn(&self) -> Result<HarnessRun, HarnessError> {
        let board = Arc::new(PhaseBoard::new());
        for (worker, _) in &self.workers {
            board.set(*worker, HarnessPhase::Idle);
        }

        let mut threads = Vec::with_capacity(self.workers.len());
        for (worker, order) in &self.workers {
            let locks: Vec<(ResourceId, Arc<Mutex<()>>)> = order
                .iter()
                .filter_map(|id| self.locks.get(id).map(|l| (id.clone(), Arc::clone(l))))
                .collect();
            let board = Arc::clone(&board);
            let config = self.config.clone();
            let worker = *worker;

            let handle = thread::Builder::new()
                .name(format!("harness-{}", worker.get()))
                .spawn(move || run_worker(worker, &locks, &board, &config))?;
            threads.push(handle);
        }

        info!(workers = threads.len(), "Harness started");
        Ok(HarnessRun {
            board,
            threads,
            started: Instant::now(),
            watchdog_interval: self.config.watchdog_interval,
        })
    }

    /// Start the workers and wait up to the configured hang bound.
    pub fn run(&self) -> Result<HarnessOutcome, HarnessError> {
        Ok(self.spawn()?.wait(self.config.hang_bound))
    }
}

fn run_worker(
    worker: WorkerId,
    locks: &[(ResourceId, Arc<Mutex<()>>)],
    board: &PhaseBoard,
    config: &HarnessConfig,
) {
    for _ in 0..config.iterations {
        let mut held: Vec<ResourceId> = Vec::with_capacity(locks.len());
        let mut guards = Vec::with_capacity(locks.len());

        for (index, (id, lock)) in locks.iter().enumerate() {
            if index > 0 && !config.hold_between.is_zero() {
                thread::sleep(config.hold_between);
            }
            board.set(
                worker,
                HarnessPhase::WaitingFor {
                    held: held.clone(),
                    wanted: id.clone(),
                },
            );
            trace!(worker = %worker, resource = %id, "Blocking on lock");

            // No timeout: this is the step that can wait forever.
            guards.push(lock.lock());

            held.push(id.clone());
            board.set(worker, HarnessPhase::Holding { held: held.clone() });
        }

        board.set(worker, HarnessPhase::HoldingAll { held });
        if !config.critical_section.is_zero() {
            thread::sleep(config.critical_section);
        }

        while let Some(guard) = guards.pop() {
            drop(guard);
        }
        board.complete_iteration(worker);
        board.set(worker, HarnessPhase::Idle);
    }
    board.set(worker, HarnessPhase::Finished);
    debug!(worker = %worker, "Harness worker finished");
}

/// A started harness.
pub struct HarnessRun {
    board: Arc<PhaseBoard>,
    threads: Vec<JoinHandle<()>>,
    started: Instant,
    watchdog_interval: Duration,
}

impl HarnessRun {
    /// Live view of the workers' phases.
    pub fn board(&self) -> &PhaseBoard {
        &self.board
    }

    /// Wait until every worker finishes or `bound` elapses.
    ///
    /// On timeout the worker threads are detached, not joined.
    pub fn wait(self, bound: Duration) -> HarnessOutcome {
        let mut last_dump = Instant::now();

        loop {
            if self.board.all_finished() {
                for handle in self.threads {
                    if handle.join().is_err() {
                        warn!("Harness worker panicked");
                    }
                }
                let elapsed = self.started.elapsed();
                info!(?elapsed, "Harness completed");
                return HarnessOutcome::Completed {
                    elapsed,
                    iterations: self.board.iterations(),
                };
            }

            let elapsed = self.started.elapsed();
            if elapsed >= bound {
                return self.hung(elapsed);
            }

            if last_dump.elapsed() >= self.watchdog_interval {
                for (worker, phase) in self.board.snapshot() {
                    debug!(worker = %worker, phase = %phase, "Harness phase dump");
                }
                last_dump = Instant::now();
            }

            thread::sleep(POLL_INTERVAL.min(bound - elapsed));
        }
    }

    fn hung(self, elapsed: Duration) -> HarnessOutcome {
        let phases = self.board.snapshot();
        let iterations = self.board.iterations();

        for (worker, phase) in &phases {
            warn!(worker = %worker, phase = %phase, "Harness worker did not finish");
        }

        match PhaseBoard::wait_for_graph(&phases).find_cycle() {
            Some(cycle) => {
                info!(?elapsed, ?cycle, "Harness deadlocked");
                HarnessOutcome::Deadlocked {
                    cycle,
                    phases,
                    iterations,
                }
            }
            None => {
                warn!(?elapsed, "Harness hung without a visible cycle");
                HarnessOutcome::Stalled { phases, iterations }
            }
        }
    }
}
