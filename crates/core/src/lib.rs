//! Exclusively-lockable resources.
//!
//! A [`Resource`] owns its own mutual-exclusion state: the lock and the record
//! of who holds it are the same object, and the only transitions are a
//! timeout-bounded [`Resource::try_acquire`] and a holder-checked
//! [`Resource::release`]. There is deliberately no unconditional blocking
//! acquire.
//!
//! Resources are created once, up front, in a [`ResourceRegistry`] and shared
//! by reference (`Arc<Resource>`) for the lifetime of the process.
//!
//! [`AbortSignal`] is the cancellation primitive used by callers that need to
//! stop a retry loop from another thread.

mod abort;
mod error;
mod registry;
mod resource;

pub use abort::AbortSignal;
pub use error::ReleaseError;
pub use registry::ResourceRegistry;
pub use resource::Resource;

pub use lockset_types::{ResourceId, WorkerId};
