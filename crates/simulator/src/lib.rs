//! Lockset Simulator
//!
//! Workload runs that put the acquisition coordinator and the blocking
//! deadlock harness side by side.
//!
//! # Architecture
//!
//! The simulator builds on the other lockset crates to provide:
//!
//! - **Workload Generation**: overlapping resource subsets per worker, either
//!   freshly permuted per request or in fixed antiparallel orders
//! - **Real-thread runs**: the coordinator with a double-holding detector and
//!   an attempts-per-grant histogram; the harness with a hang bound
//! - **Deterministic runs**: either strategy replayed in virtual time through
//!   `lockset-simulation`
//! - **Configuration**: TOML files with command-line overrides
//!
//! # Example
//!
//! ```ignore
//! use lockset_simulator::{Comparison, OrderMode, SimulatorConfig};
//!
//! let config = SimulatorConfig::default()
//!     .with_workers(3)
//!     .with_iterations(10_000)
//!     .with_ordering(OrderMode::Antiparallel);
//!
//! let report = Comparison::new(config)?.run()?;
//! assert_eq!(report.coordinated.double_holds, 0);
//! assert!(report.harness.is_deadlocked());
//! ```

pub mod config;
pub mod runner;
pub mod workload;

pub use config::{OrderMode, SimulatorConfig};
pub use runner::{Comparison, ComparisonReport, CoordinatedReport, OccupancyTracker};
pub use workload::{SubsetWorkload, WorkloadGenerator};

use lockset_coordinator::RequestError;
use lockset_harness::HarnessError;
use lockset_simulation::SimulationError;
use lockset_types::WorkerId;
use thiserror::Error;

/// Errors from configuring or running the simulator.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request rejected: {0}")]
    Request(#[from] RequestError),

    #[error("Harness error: {0}")]
    Harness(#[from] HarnessError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    #[error("Histogram error: {0}")]
    Histogram(String),

    #[error("{0} panicked")]
    WorkerPanicked(WorkerId),
}
