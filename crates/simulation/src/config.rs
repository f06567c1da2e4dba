//! Configuration for a simulation run.

use lockset_coordinator::{BackoffPolicy, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BACKOFF_MAX};
use lockset_types::ResourceId;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Which acquisition protocol the simulated workers follow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Timeout-bounded try-acquire, full rollback, randomized backoff.
    #[default]
    Coordinated,

    /// Unconditional blocking acquire in each worker's own order.
    Blocking,
}

/// Errors in a simulation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// No workers were configured.
    #[error("Simulation has no workers")]
    NoWorkers,

    /// Workers were asked to run zero requests.
    #[error("Simulation needs at least one iteration")]
    NoIterations,

    /// A worker's order is empty.
    #[error("Worker {0} has an empty order")]
    EmptyOrder(usize),

    /// A worker's order names the same resource twice.
    #[error("Worker {worker} names {resource} twice")]
    DuplicateResource { worker: usize, resource: ResourceId },
}

/// Configuration for a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Protocol to simulate.
    pub strategy: Strategy,

    /// Resource order for each worker; worker `i` gets `WorkerId(i)`.
    pub orders: Vec<Vec<ResourceId>>,

    /// Requests each worker completes.
    pub iterations: u64,

    /// Per-resource wait bound (coordinated strategy only).
    pub attempt_timeout: Duration,

    /// Backoff between failed attempts (coordinated strategy only).
    pub backoff: BackoffPolicy,

    /// Retry bound per request; an exhausted request is counted and skipped.
    pub max_retries: Option<u32>,

    /// Pause after each acquisition before asking for the next resource.
    pub step_delay: Duration,

    /// Time spent holding the full set.
    pub critical_section: Duration,

    /// Simulated time after which the run is cut off.
    pub time_limit: Duration,

    /// Random seed for deterministic simulation.
    pub seed: u64,
}

impl SimulationConfig {
    /// Create a configuration for the given worker orders.
    pub fn new(strategy: Strategy, orders: Vec<Vec<ResourceId>>) -> Self {
        Self {
            strategy,
            orders,
            iterations: 1,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: BackoffPolicy::Uniform {
                max: DEFAULT_BACKOFF_MAX,
            },
            max_retries: None,
            step_delay: Duration::from_millis(100),
            critical_section: Duration::from_millis(200),
            time_limit: Duration::from_secs(3600),
            seed: 12345,
        }
    }

    /// Set the iterations per worker.
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the per-resource wait bound.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the pause between successive acquisitions.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Set the critical-section length.
    pub fn with_critical_section(mut self, critical: Duration) -> Self {
        self.critical_section = critical;
        self
    }

    /// Set the simulated time limit.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check the worker orders.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.orders.is_empty() {
            return Err(SimulationError::NoWorkers);
        }
        if self.iterations == 0 {
            return Err(SimulationError::NoIterations);
        }
        for (worker, order) in self.orders.iter().enumerate() {
            if order.is_empty() {
                return Err(SimulationError::EmptyOrder(worker));
            }
            let mut seen = HashSet::new();
            for resource in order {
                if !seen.insert(resource) {
                    return Err(SimulationError::DuplicateResource {
                        worker,
                        resource: resource.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
