//! Observability sink for the acquisition retry loop.

use lockset_types::{ResourceId, WorkerId};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Receives every step of the retry loop.
///
/// All methods default to doing nothing, so a sink only implements what it
/// cares about. Calls happen on the requesting worker's thread.
pub trait AcquisitionEvents: Send + Sync {
    /// An attempt (1-based) is starting.
    fn attempt_started(&self, _worker: WorkerId, _attempt: u32) {}

    /// A resource was acquired during an attempt.
    fn acquired(&self, _worker: WorkerId, _resource: &ResourceId, _attempt: u32) {}

    /// A resource acquired earlier in a failed attempt was given back.
    fn rolled_back(&self, _worker: WorkerId, _resource: &ResourceId, _attempt: u32) {}

    /// An attempt failed on `contended` after holding `held` resources.
    fn attempt_failed(
        &self,
        _worker: WorkerId,
        _attempt: u32,
        _contended: &ResourceId,
        _held: usize,
    ) {
    }

    /// The worker is about to sleep before its next attempt.
    fn backing_off(&self, _worker: WorkerId, _attempt: u32, _delay: Duration) {}

    /// Every resource was acquired.
    fn granted(&self, _worker: WorkerId, _attempts: u32) {}

    /// The retry or time budget ran out.
    fn timed_out(&self, _worker: WorkerId, _attempts: u32) {}

    /// The request was cancelled.
    fn aborted(&self, _worker: WorkerId, _attempts: u32) {}
}

/// Sink that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl AcquisitionEvents for TracingEvents {
    fn attempt_started(&self, worker: WorkerId, attempt: u32) {
        trace!(worker = %worker, attempt, "Acquisition attempt");
    }

    fn acquired(&self, worker: WorkerId, resource: &ResourceId, attempt: u32) {
        trace!(worker = %worker, resource = %resource, attempt, "Acquired resource");
    }

    fn rolled_back(&self, worker: WorkerId, resource: &ResourceId, attempt: u32) {
        trace!(worker = %worker, resource = %resource, attempt, "Rolled back resource");
    }

    fn attempt_failed(&self, worker: WorkerId, attempt: u32, contended: &ResourceId, held: usize) {
        debug!(
            worker = %worker,
            attempt,
            contended = %contended,
            held,
            "Attempt failed, rolled back"
        );
    }

    fn backing_off(&self, worker: WorkerId, attempt: u32, delay: Duration) {
        debug!(worker = %worker, attempt, ?delay, "Backing off");
    }

    fn granted(&self, worker: WorkerId, attempts: u32) {
        if attempts > 1 {
            debug!(worker = %worker, attempts, "Granted after retries");
        } else {
            trace!(worker = %worker, "Granted on first attempt");
        }
    }

    fn timed_out(&self, worker: WorkerId, attempts: u32) {
        warn!(worker = %worker, attempts, "Acquisition budget exhausted");
    }

    fn aborted(&self, worker: WorkerId, attempts: u32) {
        warn!(worker = %worker, attempts, "Acquisition aborted");
    }
}
