//! Deterministic simulation of resource-set acquisition.
//!
//! This crate replays the coordinator's protocol and the blocking harness's
//! protocol in virtual time. Given the same seed, it produces identical
//! results every run, which makes "both workers eventually succeed" and
//! "these workers deadlock" checkable without wall-clock races.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Event Queue (BTreeMap<EventKey, Event>)        │ │
//! │  │     Ordered by: time, sequence                     │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     workers: Vec<SimWorker>                        │ │
//! │  │     acquire / wait / back off / release            │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     resources: holder + waiters, seeded hand-off   │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! An empty queue with unfinished workers means every remaining worker is
//! blocked with no timeout pending: a deadlock, whose cycle is read off the
//! wait-for graph.

mod config;
mod event_queue;
mod runner;

pub use config::{SimulationConfig, SimulationError, Strategy};
pub use event_queue::EventKey;
pub use runner::{SimulationOutcome, SimulationReport, SimulationRunner, WorkerStats};
