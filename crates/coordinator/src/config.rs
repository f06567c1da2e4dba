//! Configuration for the acquisition coordinator.

use crate::BackoffPolicy;
use std::time::Duration;

/// Default wait for each individual try-acquire.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default upper bound of the uniform backoff window.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(100);

/// Configuration for acquisition retries and backoff.
///
/// Every request inherits these values unless it overrides them.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// How long a single try-acquire may wait for one resource.
    pub attempt_timeout: Duration,

    /// How long to back off between failed attempts.
    pub backoff: BackoffPolicy,

    /// Retries allowed after the first attempt; `None` retries forever.
    ///
    /// `Some(0)` means a single attempt.
    pub max_retries: Option<u32>,

    /// Overall wall-clock budget for one request; `None` is unbounded.
    pub deadline: Option<Duration>,

    /// Seed for the per-worker jitter streams.
    ///
    /// When unset every worker's stream is seeded from OS entropy.
    pub seed: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: BackoffPolicy::Uniform {
                max: DEFAULT_BACKOFF_MAX,
            },
            max_retries: None,
            deadline: None,
            seed: None,
        }
    }
}

impl CoordinatorConfig {
    /// Set the per-resource try-acquire timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bound the number of retries after the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Bound the total time spent on one request.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Make jitter deterministic.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
