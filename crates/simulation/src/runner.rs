//! Deterministic simulation runner.

use crate::{EventKey, SimulationConfig, SimulationError, Strategy};
use lockset_coordinator::Jitter;
use lockset_harness::WaitForGraph;
use lockset_types::{ResourceId, WorkerId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Stream reserved for the hand-off rng; worker jitter uses streams `0..n`.
const HANDOFF_STREAM: u64 = u64::MAX;

/// Scheduled work for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    /// Start a new request.
    Begin { worker: usize },
    /// Pause after an acquisition is over; ask for the next resource.
    Continue { worker: usize },
    /// A released resource was handed to this waiting worker.
    Granted { worker: usize, token: u64 },
    /// The bounded wait ran out.
    WaitExpired { worker: usize, token: u64 },
    /// Backoff finished; start the next attempt.
    BackoffDone { worker: usize },
    /// Critical section finished; release everything.
    CriticalDone { worker: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Waiting,
    Pausing,
    BackingOff,
    Critical,
    Finished,
}

#[derive(Debug, Default)]
struct SimResource {
    holder: Option<usize>,
    waiters: Vec<usize>,
}

struct SimWorker {
    /// Indexes into the resource table, in request order.
    order: Vec<usize>,
    /// Prefix of `order` currently held.
    held: Vec<usize>,
    phase: Phase,
    /// Bumped whenever a pending `Granted`/`WaitExpired` must be ignored.
    token: u64,
    /// Attempt number within the current request.
    attempt: u32,
    jitter: Jitter,
    stats: WorkerStats,
}

impl SimWorker {
    fn next_resource(&self) -> Option<usize> {
        self.order.get(self.held.len()).copied()
    }
}

/// Per-worker counters collected during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker: WorkerId,
    /// Requests that reached their critical section.
    pub completed: u64,
    /// Requests abandoned because the retry bound ran out.
    pub timed_out: u64,
    /// Attempts across all requests.
    pub attempts: u64,
    /// Most attempts any single granted request needed.
    pub max_attempts: u32,
    /// Resources released by rollback (not by completion).
    pub rollbacks: u64,
}

/// How a simulation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationOutcome {
    /// Every worker finished all its requests.
    Completed { at: Duration },

    /// No event was left but workers were still blocked in a circular wait.
    Deadlocked { at: Duration, cycle: Vec<WorkerId> },

    /// No event was left and no cycle was found.
    Stalled { at: Duration },

    /// The simulated time limit was reached first.
    TimeLimit { at: Duration },
}

/// Results of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub strategy: Strategy,
    pub seed: u64,
    pub outcome: SimulationOutcome,
    pub workers: Vec<WorkerStats>,
    pub events_processed: u64,
}

impl SimulationReport {
    /// Whether every worker finished.
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, SimulationOutcome::Completed { .. })
    }

    /// Whether a circular wait stopped the run.
    pub fn is_deadlocked(&self) -> bool {
        matches!(self.outcome, SimulationOutcome::Deadlocked { .. })
    }

    /// Most attempts any granted request needed across all workers.
    pub fn max_attempts(&self) -> u32 {
        self.workers.iter().map(|w| w.max_attempts).max().unwrap_or(0)
    }
}

/// Runs one configuration to completion in virtual time.
pub struct SimulationRunner {
    config: SimulationConfig,
    now: Duration,
    sequence: u64,
    queue: BTreeMap<EventKey, Event>,
    resource_ids: Vec<ResourceId>,
    resources: Vec<SimResource>,
    workers: Vec<SimWorker>,
    /// Picks which waiter gets a released resource.
    handoff: ChaCha8Rng,
    events_processed: u64,
}

impl SimulationRunner {
    /// Prepare a run; every worker begins at time zero.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let mut index: HashMap<ResourceId, usize> = HashMap::new();
        let mut resource_ids = Vec::new();
        let workers: Vec<SimWorker> = config
            .orders
            .iter()
            .enumerate()
            .map(|(i, order)| {
                let order = order
                    .iter()
                    .map(|id| {
                        *index.entry(id.clone()).or_insert_with(|| {
                            resource_ids.push(id.clone());
                            resource_ids.len() - 1
                        })
                    })
                    .collect();
                let id = WorkerId(i as u64);
                SimWorker {
                    order,
                    held: Vec::new(),
                    phase: Phase::Idle,
                    token: 0,
                    attempt: 0,
                    jitter: Jitter::seeded(config.seed, id),
                    stats: WorkerStats {
                        worker: id,
                        completed: 0,
                        timed_out: 0,
                        attempts: 0,
                        max_attempts: 0,
                        rollbacks: 0,
                    },
                }
            })
            .collect();

        let mut handoff = ChaCha8Rng::seed_from_u64(config.seed);
        handoff.set_stream(HANDOFF_STREAM);

        let mut runner = Self {
            resources: resource_ids.iter().map(|_| SimResource::default()).collect(),
            resource_ids,
            workers,
            config,
            now: Duration::ZERO,
            sequence: 0,
            queue: BTreeMap::new(),
            handoff,
            events_processed: 0,
        };
        for worker in 0..runner.workers.len() {
            runner.schedule(Duration::ZERO, Event::Begin { worker });
        }
        Ok(runner)
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Process events until every worker finishes, the run gets stuck, or the
    /// time limit passes.
    pub fn run(mut self) -> SimulationReport {
        info!(
            strategy = ?self.config.strategy,
            workers = self.workers.len(),
            seed = self.config.seed,
            "Starting simulation"
        );

        let outcome = loop {
            if self.all_finished() {
                break SimulationOutcome::Completed { at: self.now };
            }
            let Some((key, event)) = self.queue.pop_first() else {
                break self.stuck();
            };
            if key.time > self.config.time_limit {
                break SimulationOutcome::TimeLimit { at: self.now };
            }
            self.now = key.time;
            self.events_processed += 1;
            self.handle(event);
        };

        info!(?outcome, events = self.events_processed, "Simulation finished");
        SimulationReport {
            strategy: self.config.strategy,
            seed: self.config.seed,
            outcome,
            workers: self.workers.into_iter().map(|w| w.stats).collect(),
            events_processed: self.events_processed,
        }
    }

    fn schedule(&mut self, delay: Duration, event: Event) {
        let key = EventKey::new(self.now.saturating_add(delay), self.sequence);
        self.sequence += 1;
        self.queue.insert(key, event);
    }

    fn all_finished(&self) -> bool {
        self.workers.iter().all(|w| w.phase == Phase::Finished)
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Begin { worker } => {
                self.workers[worker].attempt = 0;
                self.start_attempt(worker);
            }
            Event::Continue { worker } => {
                if self.workers[worker].phase == Phase::Pausing {
                    self.request_next(worker);
                }
            }
            Event::Granted { worker, token } => {
                let w = &self.workers[worker];
                if w.token == token && w.phase == Phase::Waiting {
                    if let Some(resource) = w.next_resource() {
                        self.on_acquired(worker, resource);
                    }
                }
            }
            Event::WaitExpired { worker, token } => {
                let w = &self.workers[worker];
                if w.token == token && w.phase == Phase::Waiting {
                    self.on_wait_expired(worker);
                }
            }
            Event::BackoffDone { worker } => self.start_attempt(worker),
            Event::CriticalDone { worker } => self.on_critical_done(worker),
        }
    }

    fn start_attempt(&mut self, worker: usize) {
        let w = &mut self.workers[worker];
        w.attempt += 1;
        w.stats.attempts += 1;
        trace!(worker, attempt = w.attempt, now = ?self.now, "Attempt");
        self.request_next(worker);
    }

    fn request_next(&mut self, worker: usize) {
        let Some(resource) = self.workers[worker].next_resource() else {
            return;
        };

        if self.resources[resource].holder.is_none() {
            self.resources[resource].holder = Some(worker);
            self.on_acquired(worker, resource);
            return;
        }

        self.resources[resource].waiters.push(worker);
        let w = &mut self.workers[worker];
        w.phase = Phase::Waiting;
        w.token += 1;
        let token = w.token;
        if self.config.strategy == Strategy::Coordinated {
            self.schedule(
                self.config.attempt_timeout,
                Event::WaitExpired { worker, token },
            );
        }
    }

    fn on_acquired(&mut self, worker: usize, resource: usize) {
        debug_assert_eq!(self.resources[resource].holder, Some(worker));

        let w = &mut self.workers[worker];
        w.held.push(resource);

        if w.held.len() == w.order.len() {
            w.phase = Phase::Critical;
            self.schedule(
                self.config.critical_section,
                Event::CriticalDone { worker },
            );
        } else if !self.config.step_delay.is_zero() {
            w.phase = Phase::Pausing;
            self.schedule(self.config.step_delay, Event::Continue { worker });
        } else {
            self.request_next(worker);
        }
    }

    fn on_wait_expired(&mut self, worker: usize) {
        if let Some(resource) = self.workers[worker].next_resource() {
            self.resources[resource].waiters.retain(|&w| w != worker);
        }

        let rolled_back = self.release_all(worker);
        let w = &mut self.workers[worker];
        w.stats.rollbacks += rolled_back;
        let attempt = w.attempt;

        if self.config.max_retries.is_some_and(|max| attempt > max) {
            w.stats.timed_out += 1;
            debug!(worker, attempt, "Request timed out");
            self.finish_request(worker);
            return;
        }

        let delay = w.jitter.next_delay(&self.config.backoff, attempt);
        w.phase = Phase::BackingOff;
        trace!(worker, attempt, ?delay, rolled_back, "Backing off");
        self.schedule(delay, Event::BackoffDone { worker });
    }

    fn on_critical_done(&mut self, worker: usize) {
        self.release_all(worker);
        let w = &mut self.workers[worker];
        w.stats.completed += 1;
        w.stats.max_attempts = w.stats.max_attempts.max(w.attempt);
        self.finish_request(worker);
    }

    fn finish_request(&mut self, worker: usize) {
        let w = &mut self.workers[worker];
        if w.stats.completed + w.stats.timed_out >= self.config.iterations {
            w.phase = Phase::Finished;
            debug!(worker, now = ?self.now, "Worker finished");
        } else {
            w.phase = Phase::Idle;
            self.schedule(Duration::ZERO, Event::Begin { worker });
        }
    }

    /// Release everything `worker` holds, newest first. Returns the count.
    fn release_all(&mut self, worker: usize) -> u64 {
        let mut released = 0;
        while let Some(resource) = self.workers[worker].held.pop() {
            self.release(resource);
            released += 1;
        }
        released
    }

    /// Free a resource and hand it to a randomly chosen waiter.
    fn release(&mut self, resource: usize) {
        let slot = &mut self.resources[resource];
        slot.holder = None;
        if slot.waiters.is_empty() {
            return;
        }

        let pick = self.handoff.gen_range(0..slot.waiters.len());
        let next = slot.waiters.swap_remove(pick);
        slot.holder = Some(next);

        let w = &mut self.workers[next];
        w.token += 1;
        let token = w.token;
        self.schedule(Duration::ZERO, Event::Granted { worker: next, token });
    }

    /// The queue drained with unfinished workers; find out why.
    fn stuck(&self) -> SimulationOutcome {
        let mut graph = WaitForGraph::new();
        for (i, w) in self.workers.iter().enumerate() {
            let id = WorkerId(i as u64);
            for &resource in &w.held {
                graph.hold(id, self.resource_ids[resource].clone());
            }
            if w.phase == Phase::Waiting {
                if let Some(resource) = w.next_resource() {
                    graph.wait(id, self.resource_ids[resource].clone());
                }
            }
        }

        match graph.find_cycle() {
            Some(cycle) => {
                info!(?cycle, at = ?self.now, "Simulation deadlocked");
                SimulationOutcome::Deadlocked { at: self.now, cycle }
            }
            None => SimulationOutcome::Stalled { at: self.now },
        }
    }
}
