//! The acquisition coordinator: all-or-nothing acquisition of resource sets.

use crate::{
    AcquisitionEvents, AcquisitionRequest, CoordinatorConfig, Handle, Jitter, RequestError,
    TracingEvents,
};
use lockset_core::{AbortSignal, Resource, ResourceRegistry};
use lockset_types::{ResourceId, WorkerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::error;

/// Terminal outcome of [`Coordinator::acquire`].
///
/// The caller holds every requested resource if and only if the result is
/// `Granted`; the other variants guarantee nothing from the request is held.
#[derive(Debug)]
#[must_use = "dropping a Granted result releases its resources immediately"]
pub enum AcquisitionResult {
    /// All resources acquired; the handle releases them.
    Granted(Handle),

    /// The retry or time budget ran out.
    TimedOut {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The request was cancelled through its abort signal.
    Aborted {
        /// Attempts made before cancellation was observed.
        attempts: u32,
    },
}

impl AcquisitionResult {
    /// Whether the request was granted.
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquisitionResult::Granted(_))
    }

    /// The handle, if granted.
    pub fn into_handle(self) -> Option<Handle> {
        match self {
            AcquisitionResult::Granted(handle) => Some(handle),
            _ => None,
        }
    }

    /// Convert into a `Result` for `?`-style propagation.
    pub fn into_result(self) -> Result<Handle, AcquireError> {
        match self {
            AcquisitionResult::Granted(handle) => Ok(handle),
            AcquisitionResult::TimedOut { attempts } => Err(AcquireError::TimedOut { attempts }),
            AcquisitionResult::Aborted { attempts } => Err(AcquireError::Aborted { attempts }),
        }
    }
}

/// Terminal acquisition failures.
///
/// Both leave the caller holding nothing from the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The retry or time budget ran out.
    #[error("Acquisition timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },

    /// The request was cancelled.
    #[error("Acquisition aborted after {attempts} attempts")]
    Aborted { attempts: u32 },
}

/// Outcome of a single pass over the request.
enum Attempt {
    /// Every resource is held; ownership moves into the returned vector.
    Complete(Vec<Arc<Resource>>),
    /// A try-acquire timed out; everything taken this pass was rolled back.
    Contended,
    /// Cancellation was observed mid-pass; everything was rolled back.
    Aborted,
}

/// Resources taken during the current attempt.
///
/// Whatever is still recorded here when the state goes away is released in
/// reverse order, so an attempt can never leak a partial hold.
struct AttemptState<'a> {
    requester: WorkerId,
    attempt: u32,
    held: Vec<Arc<Resource>>,
    events: &'a dyn AcquisitionEvents,
}

impl<'a> AttemptState<'a> {
    fn new(requester: WorkerId, attempt: u32, events: &'a dyn AcquisitionEvents) -> Self {
        Self {
            requester,
            attempt,
            held: Vec::new(),
            events,
        }
    }

    /// Record an acquired resource. It is tracked before the sink sees it.
    fn push(&mut self, resource: Arc<Resource>) {
        self.held.push(resource);
        if let Some(resource) = self.held.last() {
            self.events.acquired(self.requester, resource.id(), self.attempt);
        }
    }

    /// Release everything held, newest first. Returns how many were released.
    fn rollback(&mut self) -> usize {
        let count = self.held.len();
        while let Some(resource) = self.held.pop() {
            if let Err(e) = resource.release(self.requester) {
                // Resources in `held` were acquired by this attempt and are
                // not reachable from anywhere else.
                panic!("Rollback released a resource it did not hold: {e}");
            }
            self.events.rolled_back(self.requester, resource.id(), self.attempt);
        }
        count
    }

    /// Hand the held set over to a handle; nothing is rolled back afterwards.
    fn commit(mut self) -> Vec<Arc<Resource>> {
        std::mem::take(&mut self.held)
    }
}

impl Drop for AttemptState<'_> {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        if !std::thread::panicking() {
            self.rollback();
            return;
        }
        // Unwinding: release without calling back into the sink.
        while let Some(resource) = self.held.pop() {
            if let Err(e) = resource.release(self.requester) {
                error!(error = %e, "Rollback during unwind found a foreign holder");
            }
        }
    }
}

/// Per-request limits resolved from the request and the config.
struct Budget {
    attempt_timeout: Duration,
    max_retries: Option<u32>,
    deadline: Option<Instant>,
}

impl Budget {
    /// Whether another attempt is allowed after `attempts` have failed.
    fn exhausted(&self, attempts: u32) -> bool {
        let out_of_retries = self.max_retries.is_some_and(|max| attempts > max);
        let out_of_time = self.deadline.is_some_and(|d| Instant::now() >= d);
        out_of_retries || out_of_time
    }

    /// Wait allowed for the next try-acquire.
    fn next_wait(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .attempt_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.attempt_timeout,
        }
    }

    /// Clamp a backoff delay so it never sleeps past the deadline.
    fn clamp_delay(&self, delay: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
            None => delay,
        }
    }
}

/// Acquires resource sets all-or-nothing without risking circular wait.
///
/// Each pass tries the requested resources in the caller's order using
/// timeout-bounded try-acquires only. If any one times out, everything taken
/// in that pass is released before the worker sleeps for a randomized
/// backoff, so no worker ever waits while holding a strict subset of its set.
///
/// Worker ids are expected to be long-lived: the coordinator keeps one jitter
/// stream per worker it has seen. Callers that mint ids per unit of work should
/// call [`Coordinator::retire_worker`] once an id is no longer used.
pub struct Coordinator {
    registry: Arc<ResourceRegistry>,
    config: CoordinatorConfig,
    events: Arc<dyn AcquisitionEvents>,
    /// Jitter streams keyed by worker, kept across requests.
    jitter: Mutex<HashMap<WorkerId, Jitter>>,
}

impl Coordinator {
    /// Create a coordinator over `registry` that logs through `tracing`.
    pub fn new(registry: Arc<ResourceRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            registry,
            config,
            events: Arc::new(TracingEvents),
            jitter: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the event sink.
    pub fn with_events(mut self, events: Arc<dyn AcquisitionEvents>) -> Self {
        self.events = events;
        self
    }

    /// The registry requests are resolved against.
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// The coordinator's configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Drop the jitter stream kept for `worker`.
    ///
    /// Returns whether one existed. A later request from the same id starts a
    /// fresh stream.
    pub fn retire_worker(&self, worker: WorkerId) -> bool {
        self.jitter.lock().remove(&worker).is_some()
    }

    /// Number of workers with a kept jitter stream.
    pub fn tracked_workers(&self) -> usize {
        self.jitter.lock().len()
    }

    /// Build a request for `requester` from registered resource ids.
    pub fn request(
        &self,
        requester: WorkerId,
        ids: &[ResourceId],
    ) -> Result<AcquisitionRequest, RequestError> {
        AcquisitionRequest::from_registry(&self.registry, requester, ids)
    }

    /// Acquire every resource in `request`, retrying until a terminal outcome.
    ///
    /// Blocks the calling thread. Without a retry bound, deadline or abort
    /// signal this only returns once the set is granted.
    pub fn acquire(&self, request: AcquisitionRequest) -> AcquisitionResult {
        let budget = Budget {
            attempt_timeout: request
                .attempt_timeout
                .unwrap_or(self.config.attempt_timeout),
            max_retries: request.max_retries.or(self.config.max_retries),
            // A deadline too far out to represent is no deadline.
            deadline: request
                .deadline
                .or(self.config.deadline)
                .and_then(|d| Instant::now().checked_add(d)),
        };

        let mut jitter = self.take_jitter(request.requester);
        let result = self.run(&request, &budget, &mut jitter);
        self.jitter.lock().insert(request.requester, jitter);
        result
    }

    fn run(
        &self,
        request: &AcquisitionRequest,
        budget: &Budget,
        jitter: &mut Jitter,
    ) -> AcquisitionResult {
        let requester = request.requester;
        let abort = request.abort.as_ref();
        let mut attempts = 0u32;

        loop {
            if abort.is_some_and(AbortSignal::is_aborted) {
                self.events.aborted(requester, attempts);
                return AcquisitionResult::Aborted { attempts };
            }

            attempts = attempts.saturating_add(1);
            self.events.attempt_started(requester, attempts);

            match self.attempt(request, attempts, budget) {
                Attempt::Complete(held) => {
                    self.events.granted(requester, attempts);
                    return AcquisitionResult::Granted(Handle::new(requester, held, attempts));
                }
                Attempt::Aborted => {
                    self.events.aborted(requester, attempts);
                    return AcquisitionResult::Aborted { attempts };
                }
                Attempt::Contended => {}
            }

            if budget.exhausted(attempts) {
                self.events.timed_out(requester, attempts);
                return AcquisitionResult::TimedOut { attempts };
            }

            let delay = budget.clamp_delay(jitter.next_delay(&self.config.backoff, attempts));
            self.events.backing_off(requester, attempts, delay);
            let interrupted = match abort {
                Some(signal) => signal.sleep(delay),
                None => {
                    std::thread::sleep(delay);
                    false
                }
            };
            if interrupted {
                self.events.aborted(requester, attempts);
                return AcquisitionResult::Aborted { attempts };
            }
        }
    }

    /// One pass over the request in caller order.
    fn attempt(&self, request: &AcquisitionRequest, attempt: u32, budget: &Budget) -> Attempt {
        let requester = request.requester;
        let mut state = AttemptState::new(requester, attempt, self.events.as_ref());

        for (index, resource) in request.resources.iter().enumerate() {
            if index > 0 && request.abort.as_ref().is_some_and(AbortSignal::is_aborted) {
                state.rollback();
                return Attempt::Aborted;
            }

            if !resource.try_acquire(requester, budget.next_wait()) {
                let held = state.rollback();
                self.events.attempt_failed(requester, attempt, resource.id(), held);
                return Attempt::Contended;
            }
            state.push(Arc::clone(resource));
        }

        Attempt::Complete(state.commit())
    }

    fn take_jitter(&self, worker: WorkerId) -> Jitter {
        self.jitter
            .lock()
            .remove(&worker)
            .unwrap_or_else(|| match self.config.seed {
                Some(seed) => Jitter::seeded(seed, worker),
                None => Jitter::from_entropy(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackoffPolicy;
    use lockset_test_helpers::{ids, registry_abc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use tracing_test::traced_test;

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_attempt_timeout(Duration::from_millis(5))
            .with_backoff(BackoffPolicy::Uniform {
                max: Duration::from_millis(2),
            })
            .with_seed(12345)
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(Arc::new(registry_abc()), fast_config())
    }

    /// Records per-attempt acquire and rollback counts.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<(u32, &'static str)>>,
        granted: AtomicU32,
    }

    impl AcquisitionEvents for Recorder {
        fn acquired(&self, _worker: WorkerId, _resource: &ResourceId, attempt: u32) {
            self.log.lock().push((attempt, "acquired"));
        }

        fn rolled_back(&self, _worker: WorkerId, _resource: &ResourceId, attempt: u32) {
            self.log.lock().push((attempt, "rolled_back"));
        }

        fn granted(&self, _worker: WorkerId, _attempts: u32) {
            self.granted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn hold(coordinator: &Coordinator, id: &'static str, worker: WorkerId) -> Arc<Resource> {
        let resource = Arc::clone(coordinator.registry().get(&ResourceId::from(id)).unwrap());
        assert!(resource.try_acquire(worker, Duration::ZERO));
        resource
    }

    #[traced_test]
    #[test]
    fn test_uncontended_grant_and_release() {
        let coordinator = coordinator();
        let request = coordinator.request(WorkerId(1), &ids(&["A", "B"])).unwrap();

        let mut handle = coordinator.acquire(request).into_handle().unwrap();
        assert_eq!(handle.attempts(), 1);
        assert_eq!(handle.requester(), WorkerId(1));
        assert_eq!(
            coordinator.registry().held(),
            vec![ResourceId::from("A"), ResourceId::from("B")]
        );

        handle.release();
        assert!(handle.is_released());
        assert!(coordinator.registry().held().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_drop_releases() {
        let coordinator = coordinator();
        {
            let request = coordinator.request(WorkerId(1), &ids(&["C"])).unwrap();
            let result = coordinator.acquire(request);
            assert!(result.is_granted());
            assert_eq!(coordinator.registry().held(), vec![ResourceId::from("C")]);
        }
        assert!(coordinator.registry().held().is_empty());
    }

    #[test]
    fn test_double_release_is_noop() {
        let coordinator = coordinator();
        let request = coordinator.request(WorkerId(1), &ids(&["A"])).unwrap();
        let mut handle = coordinator.acquire(request).into_handle().unwrap();

        handle.release();
        // Another worker takes A in between
        let a = hold(&coordinator, "A", WorkerId(2));
        handle.release();
        drop(handle);

        assert_eq!(a.holder(), Some(WorkerId(2)));
    }

    #[test]
    #[should_panic(expected = "Handle bookkeeping violated")]
    fn test_release_behind_handle_back_panics() {
        let coordinator = coordinator();
        let request = coordinator.request(WorkerId(1), &ids(&["A"])).unwrap();
        let mut handle = coordinator.acquire(request).into_handle().unwrap();

        let a = coordinator.registry().get(&ResourceId::from("A")).unwrap();
        a.release(WorkerId(1)).unwrap();
        handle.release();
    }

    #[traced_test]
    #[test]
    fn test_zero_retries_times_out_within_one_window() {
        let coordinator = coordinator();
        let _b = hold(&coordinator, "B", WorkerId(9));

        let request = coordinator
            .request(WorkerId(1), &ids(&["A", "B"]))
            .unwrap()
            .with_attempt_timeout(Duration::from_millis(50))
            .with_max_retries(0);

        let started = Instant::now();
        let result = coordinator.acquire(request);
        let elapsed = started.elapsed();

        assert!(matches!(result, AcquisitionResult::TimedOut { attempts: 1 }));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000));

        // A was acquired then rolled back
        assert_eq!(coordinator.registry().held(), vec![ResourceId::from("B")]);
    }

    #[test]
    fn test_max_retries_counts_attempts() {
        let coordinator = coordinator();
        let _a = hold(&coordinator, "A", WorkerId(9));

        let request = coordinator
            .request(WorkerId(1), &ids(&["A"]))
            .unwrap()
            .with_attempt_timeout(Duration::from_millis(1))
            .with_max_retries(3);

        let err = coordinator.acquire(request).into_result().unwrap_err();
        assert_eq!(err, AcquireError::TimedOut { attempts: 4 });
    }

    #[test]
    fn test_deadline_bounds_total_time() {
        let coordinator = coordinator();
        let _c = hold(&coordinator, "C", WorkerId(9));

        let request = coordinator
            .request(WorkerId(1), &ids(&["A", "C"]))
            .unwrap()
            .with_attempt_timeout(Duration::from_millis(20))
            .with_deadline(Duration::from_millis(100));

        let started = Instant::now();
        let result = coordinator.acquire(request);
        assert!(matches!(result, AcquisitionResult::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(coordinator.registry().held(), vec![ResourceId::from("C")]);
    }

    #[test]
    fn test_rollback_matches_acquisitions_per_attempt() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = coordinator().with_events(recorder.clone());
        let _c = hold(&coordinator, "C", WorkerId(9));

        let request = coordinator
            .request(WorkerId(1), &ids(&["A", "B", "C"]))
            .unwrap()
            .with_attempt_timeout(Duration::from_millis(1))
            .with_max_retries(4);

        let result = coordinator.acquire(request);
        assert!(matches!(result, AcquisitionResult::TimedOut { attempts: 5 }));

        let log = recorder.log.lock();
        for attempt in 1..=5 {
            let acquired = log
                .iter()
                .filter(|(a, kind)| *a == attempt && *kind == "acquired")
                .count();
            let rolled_back = log
                .iter()
                .filter(|(a, kind)| *a == attempt && *kind == "rolled_back")
                .count();
            assert_eq!(acquired, 2, "attempt {attempt} should take A and B");
            assert_eq!(rolled_back, acquired, "attempt {attempt} leaked");
        }
        assert_eq!(recorder.granted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pre_aborted_request_touches_nothing() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = coordinator().with_events(recorder.clone());
        let signal = AbortSignal::new();
        signal.abort();

        let request = coordinator
            .request(WorkerId(1), &ids(&["A"]))
            .unwrap()
            .with_abort(signal);

        let result = coordinator.acquire(request);
        assert!(matches!(result, AcquisitionResult::Aborted { attempts: 0 }));
        assert!(recorder.log.lock().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_abort_during_retries_leaves_nothing_held() {
        let config = fast_config().with_backoff(BackoffPolicy::Uniform {
            max: Duration::from_millis(50),
        });
        let coordinator = Arc::new(Coordinator::new(Arc::new(registry_abc()), config));
        let _b = hold(&coordinator, "B", WorkerId(9));
        let signal = AbortSignal::new();

        let worker = {
            let coordinator = Arc::clone(&coordinator);
            let signal = signal.clone();
            thread::spawn(move || {
                let request = coordinator
                    .request(WorkerId(1), &ids(&["A", "B"]))
                    .unwrap()
                    .with_abort(signal);
                coordinator.acquire(request).into_result()
            })
        };

        thread::sleep(Duration::from_millis(60));
        signal.abort();

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(AcquireError::Aborted { attempts }) if attempts >= 1));
        assert_eq!(coordinator.registry().held(), vec![ResourceId::from("B")]);
    }

    #[traced_test]
    #[test]
    fn test_reversed_orders_both_granted() {
        let coordinator = Arc::new(coordinator());

        let workers: Vec<_> = [(WorkerId(1), ["A", "B"]), (WorkerId(2), ["B", "A"])]
            .into_iter()
            .map(|(worker, order)| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    let mut max_attempts = 0;
                    for _ in 0..50 {
                        let request = coordinator.request(worker, &ids(&order)).unwrap();
                        let handle = coordinator.acquire(request).into_handle().unwrap();
                        max_attempts = max_attempts.max(handle.attempts());
                        // Hold long enough for the other side to collide
                        thread::sleep(Duration::from_micros(200));
                    }
                    max_attempts
                })
            })
            .collect();

        for worker in workers {
            let max_attempts = worker.join().unwrap();
            assert!(max_attempts < 1_000);
        }
        assert!(coordinator.registry().held().is_empty());
    }

    /// Panics when told the given resource was acquired.
    struct PanicOn(&'static str);

    impl AcquisitionEvents for PanicOn {
        fn acquired(&self, _worker: WorkerId, resource: &ResourceId, _attempt: u32) {
            if resource.as_str() == self.0 {
                panic!("sink failure on {resource}");
            }
        }
    }

    #[test]
    fn test_panicking_sink_leaves_nothing_held() {
        let coordinator = coordinator().with_events(Arc::new(PanicOn("B")));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let request = coordinator.request(WorkerId(1), &ids(&["A", "B"])).unwrap();
            drop(coordinator.acquire(request));
        }));

        assert!(outcome.is_err());
        assert!(coordinator.registry().held().is_empty());
    }

    /// Aborts its signal as soon as the first resource of an attempt is taken.
    struct AbortAfterFirst {
        signal: AbortSignal,
        rolled_back: AtomicU32,
    }

    impl AcquisitionEvents for AbortAfterFirst {
        fn acquired(&self, _worker: WorkerId, resource: &ResourceId, _attempt: u32) {
            if resource.as_str() == "A" {
                self.signal.abort();
            }
        }

        fn rolled_back(&self, _worker: WorkerId, _resource: &ResourceId, _attempt: u32) {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[traced_test]
    #[test]
    fn test_abort_mid_attempt_rolls_back_partial_hold() {
        let signal = AbortSignal::new();
        let sink = Arc::new(AbortAfterFirst {
            signal: signal.clone(),
            rolled_back: AtomicU32::new(0),
        });
        let coordinator = coordinator().with_events(sink.clone());

        let request = coordinator
            .request(WorkerId(1), &ids(&["A", "B", "C"]))
            .unwrap()
            .with_abort(signal);

        let result = coordinator.acquire(request);
        assert!(matches!(result, AcquisitionResult::Aborted { attempts: 1 }));
        assert_eq!(sink.rolled_back.load(Ordering::SeqCst), 1);
        assert!(coordinator.registry().held().is_empty());
    }

    #[test]
    fn test_unrepresentable_timeouts_do_not_overflow() {
        let config = fast_config()
            .with_attempt_timeout(Duration::MAX)
            .with_deadline(Duration::MAX);
        let coordinator = Coordinator::new(Arc::new(registry_abc()), config);

        // Uncontended: the huge wait is never used
        let request = coordinator.request(WorkerId(1), &ids(&["A"])).unwrap();
        assert!(coordinator.acquire(request).is_granted());

        // Contended: a huge per-request timeout still returns once B frees
        let b = hold(&coordinator, "B", WorkerId(9));
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            b.release(WorkerId(9)).unwrap();
        });
        let request = coordinator
            .request(WorkerId(1), &ids(&["B"]))
            .unwrap()
            .with_max_retries(0);
        let handle = coordinator.acquire(request).into_handle().unwrap();
        assert_eq!(handle.attempts(), 1);
        releaser.join().unwrap();
    }

    #[test]
    fn test_retire_worker_drops_jitter_stream() {
        let coordinator = coordinator();
        for worker in 0..3 {
            let request = coordinator.request(WorkerId(worker), &ids(&["A"])).unwrap();
            drop(coordinator.acquire(request));
        }
        assert_eq!(coordinator.tracked_workers(), 3);

        assert!(coordinator.retire_worker(WorkerId(1)));
        assert!(!coordinator.retire_worker(WorkerId(1)));
        assert_eq!(coordinator.tracked_workers(), 2);
    }

    #[test]
    fn test_jitter_stream_survives_across_requests() {
        let coordinator = coordinator();
        let request = coordinator.request(WorkerId(3), &ids(&["A"])).unwrap();
        drop(coordinator.acquire(request));

        assert!(coordinator.jitter.lock().contains_key(&WorkerId(3)));
    }
}
