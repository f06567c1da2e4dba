//! Deadlock-free acquisition of resource sets.
//!
//! This crate provides the [`Coordinator`], which gives a worker exclusive
//! access to several shared resources at once without any global lock-order
//! convention: callers may list the same resources in conflicting orders.
//!
//! # Protocol
//!
//! ```text
//!   AcquisitionRequest [r1, r2, ..., rn]  (caller order)
//!        │
//!        ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ attempt k                                                    │
//! │   try_acquire(r1, timeout) ── fail ────────────────┐         │
//! │   try_acquire(r2, timeout) ── fail ─┐              │         │
//! │   ...                               ▼              │         │
//! │                        release r_{i-1} .. r1       │         │
//! │                                     │              │         │
//! │   all held ──► Granted(Handle)      ▼              ▼         │
//! │                               budget left? ── no ──► TimedOut│
//! │                                     │ yes                    │
//! │                          sleep(jitter) ── abort ──► Aborted  │
//! └─────────────────────────────────────┬────────────────────────┘
//!                                       └──► attempt k+1
//! ```
//!
//! The only waits are a timeout-bounded try-acquire and a backoff sleep taken
//! while holding nothing, so a worker never blocks indefinitely on one
//! resource while holding another. Circular wait cannot persist; progress is
//! probabilistic and relies on independent per-worker jitter.
//!
//! # Components
//!
//! - [`Coordinator`] - runs the retry loop
//! - [`AcquisitionRequest`] - ordered resource set plus per-request limits
//! - [`Handle`] - scoped ownership of a granted set
//! - [`CoordinatorConfig`] / [`BackoffPolicy`] - timeouts, retry bounds, jitter
//! - [`AcquisitionEvents`] - observability sink, [`TracingEvents`] by default

mod backoff;
mod config;
mod coordinator;
mod events;
mod handle;
mod request;

pub use backoff::{BackoffPolicy, Jitter};
pub use config::{CoordinatorConfig, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BACKOFF_MAX};
pub use coordinator::{AcquireError, AcquisitionResult, Coordinator};
pub use events::{AcquisitionEvents, TracingEvents};
pub use handle::Handle;
pub use request::{AcquisitionRequest, RequestError};

pub use lockset_core::{AbortSignal, Resource, ResourceRegistry};
pub use lockset_types::{ResourceId, WorkerId};
