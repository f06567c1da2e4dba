//! Error types for resource state transitions.

use lockset_types::{ResourceId, WorkerId};
use thiserror::Error;

/// Errors returned by [`Resource::release`](crate::Resource::release).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseError {
    /// Release was attempted by a worker that does not hold the resource.
    ///
    /// This is a bookkeeping bug in the caller, never a transient condition.
    #[error("{caller} released {resource} but the holder is {holder:?}")]
    NotHolder {
        resource: ResourceId,
        caller: WorkerId,
        holder: Option<WorkerId>,
    },
}
