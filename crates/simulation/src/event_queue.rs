//! Ordering key for the simulation event queue.

use std::time::Duration;

/// Position of an event in the queue.
///
/// Events fire in time order; events scheduled for the same instant fire in
/// the order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    /// Simulated time the event fires at.
    pub time: Duration,
    /// Insertion sequence, unique per run.
    pub sequence: u64,
}

impl EventKey {
    /// Create a key.
    pub fn new(time: Duration, sequence: u64) -> Self {
        Self { time, sequence }
    }
}
