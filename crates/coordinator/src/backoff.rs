//! Randomized backoff between failed attempts.
//!
//! Each worker draws its delays from its own [`Jitter`] stream so that two
//! workers that collided once are unlikely to collide again in lockstep.

use lockset_types::WorkerId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// How the backoff window evolves across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Uniform delay in `0..=max`, independent of the attempt number.
    Uniform {
        /// Upper bound of the window.
        max: Duration,
    },

    /// Full-jitter exponential backoff.
    ///
    /// After attempt `n` the delay is uniform in `0..=min(cap, base * 2^(n-1))`.
    Exponential {
        /// Window after the first failed attempt.
        base: Duration,
        /// Largest window ever used.
        cap: Duration,
    },
}

impl BackoffPolicy {
    /// Upper bound of the delay after the given (1-based) failed attempt.
    pub fn window(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Uniform { max } => max,
            BackoffPolicy::Exponential { base, cap } => {
                let doublings = attempt.saturating_sub(1);
                let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(cap).min(cap)
            }
        }
    }
}

/// A per-worker source of backoff delays.
#[derive(Debug, Clone)]
pub struct Jitter {
    rng: ChaCha8Rng,
}

impl Jitter {
    /// Deterministic stream for `worker` derived from a shared seed.
    ///
    /// Workers sharing a seed still get independent streams.
    pub fn seeded(seed: u64, worker: WorkerId) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(worker.get());
        Self { rng }
    }

    /// Stream seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Draw the delay to sleep after the given failed attempt.
    pub fn next_delay(&mut self, policy: &BackoffPolicy, attempt: u32) -> Duration {
        let window = policy.window(attempt);
        if window.is_zero() {
            return Duration::ZERO;
        }
        let max_nanos = u64::try_from(window.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(self.rng.gen_range(0..=max_nanos))
    }
}
