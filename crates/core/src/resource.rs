//! A single exclusively-lockable resource.

use crate::ReleaseError;
use lockset_types::{ResourceId, WorkerId};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// An exclusively-lockable unit of contention.
///
/// The state is either free or held by exactly one [`WorkerId`]. Waiting is
/// always bounded by the caller-supplied timeout; no order is promised among
/// concurrent waiters.
pub struct Resource {
    id: ResourceId,
    /// Current holder, `None` when free.
    holder: Mutex<Option<WorkerId>>,
    /// Signalled whenever the resource becomes free.
    freed: Condvar,
}

impl Resource {
    /// Create a free resource.
    pub fn new(id: impl Into<ResourceId>) -> Self {
        Self {
            id: id.into(),
            holder: Mutex::new(None),
            freed: Condvar::new(),
        }
    }

    /// The resource's stable identifier.
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Try to become the exclusive holder within `timeout`.
    ///
    /// Returns `true` if `holder` now owns the resource. Returns `false` if the
    /// resource stayed held by someone else for the whole window, or if
    /// `holder` already owns it (acquisition is not reentrant). A zero timeout
    /// performs a single non-blocking check. A timeout too large to turn into
    /// a deadline waits until the resource frees.
    pub fn try_acquire(&self, holder: WorkerId, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut current = self.holder.lock();

        loop {
            match *current {
                None => {
                    *current = Some(holder);
                    trace!(resource = %self.id, worker = %holder, "Acquired");
                    return true;
                }
                Some(owner) if owner == holder => {
                    trace!(resource = %self.id, worker = %holder, "Already held by caller");
                    return false;
                }
                Some(_) => {
                    let Some(deadline) = deadline else {
                        self.freed.wait(&mut current);
                        continue;
                    };
                    if self.freed.wait_until(&mut current, deadline).timed_out() {
                        // A release may have landed exactly at the deadline.
                        if current.is_none() {
                            *current = Some(holder);
                            trace!(resource = %self.id, worker = %holder, "Acquired at deadline");
                            return true;
                        }
                        trace!(resource = %self.id, worker = %holder, ?timeout, "Timed out");
                        return false;
                    }
                }
            }
        }
    }

    /// Release the resource held by `holder`.
    ///
    /// Fails with [`ReleaseError::NotHolder`] and leaves the state untouched if
    /// `holder` is not the current holder (including when the resource is free).
    pub fn release(&self, holder: WorkerId) -> Result<(), ReleaseError> {
        let mut current = self.holder.lock();
        if *current != Some(holder) {
            return Err(ReleaseError::NotHolder {
                resource: self.id.clone(),
                caller: holder,
                holder: *current,
            });
        }
        *current = None;
        drop(current);

        // Waiters re-check under the lock; whichever wins is the next holder.
        self.freed.notify_all();
        trace!(resource = %self.id, worker = %holder, "Released");
        Ok(())
    }

    /// Snapshot of the current holder.
    pub fn holder(&self) -> Option<WorkerId> {
        *self.holder.lock()
    }

    /// Whether the resource is free at this instant.
    pub fn is_free(&self) -> bool {
        self.holder().is_none()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("holder", &self.holder())
            .finish()
    }
}
