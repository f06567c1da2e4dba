//! Scoped ownership of a granted resource set.

use lockset_core::{ReleaseError, Resource};
use lockset_types::{ResourceId, WorkerId};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Proof that a worker exclusively holds every resource of one request.
///
/// Resources are released in reverse acquisition order, either explicitly
/// through [`Handle::release`] or when the handle is dropped. Release happens
/// at most once; later calls are no-ops.
pub struct Handle {
    requester: WorkerId,
    /// Held resources in acquisition order.
    resources: Vec<Arc<Resource>>,
    attempts: u32,
    released: bool,
}

impl Handle {
    pub(crate) fn new(requester: WorkerId, resources: Vec<Arc<Resource>>, attempts: u32) -> Self {
        Self {
            requester,
            resources,
            attempts,
            released: false,
        }
    }

    /// The worker that owns this handle.
    pub fn requester(&self) -> WorkerId {
        self.requester
    }

    /// Held resource ids in acquisition order.
    pub fn resource_ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.iter().map(|r| r.id())
    }

    /// Attempts it took to obtain this handle (1 = first try).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the resources have already been given back.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Give back every resource.
    ///
    /// # Panics
    ///
    /// Panics if any resource is no longer held by this handle's worker, which
    /// means some other code released it behind the handle's back. Every
    /// resource is still released before the panic.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut violation: Option<ReleaseError> = None;
        for resource in self.resources.iter().rev() {
            if let Err(e) = resource.release(self.requester) {
                violation.get_or_insert(e);
            }
        }
        debug!(worker = %self.requester, count = self.resources.len(), "Handle released");

        if let Some(e) = violation {
            if std::thread::panicking() {
                error!(error = %e, "Handle bookkeeping violated during unwind");
            } else {
                panic!("Handle bookkeeping violated: {e}");
            }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("requester", &self.requester)
            .field("resources", &self.resource_ids().collect::<Vec<_>>())
            .field("attempts", &self.attempts)
            .field("released", &self.released)
            .finish()
    }
}
