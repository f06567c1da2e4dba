//! Negative control for the acquisition coordinator.
//!
//! [`DeadlockHarness`] runs workers that take blocking locks in fixed,
//! possibly conflicting orders with no timeout, which is exactly the shape
//! that produces circular wait. A watchdog publishes each worker's
//! [`HarnessPhase`] on a [`PhaseBoard`]; when a run hangs, the board is
//! turned into a [`WaitForGraph`] and the cycle is reported.

mod harness;
mod phase;
mod wait_for;

pub use harness::{DeadlockHarness, HarnessConfig, HarnessError, HarnessOutcome, HarnessRun};
pub use phase::{HarnessPhase, PhaseBoard};
pub use wait_for::WaitForGraph;
