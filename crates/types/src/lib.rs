//! Identifier types shared by the lockset crates.
//!
//! Resources and workers are named by small newtypes so that logs,
//! wait-for graphs and handles can refer to them without borrowing the
//! underlying lock state.

mod identifiers;

pub use identifiers::{ResourceId, WorkerId};
