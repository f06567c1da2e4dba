//! Declarative description of the resource set a unit of work needs.

use lockset_core::{AbortSignal, Resource, ResourceRegistry};
use lockset_types::{ResourceId, WorkerId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reasons a request cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request names no resources.
    #[error("Acquisition request names no resources")]
    Empty,

    /// The same resource appears more than once.
    #[error("{0} appears more than once in the request")]
    DuplicateResource(ResourceId),

    /// The resource is not in the registry.
    #[error("{0} is not registered")]
    UnknownResource(ResourceId),
}

/// An ordered set of resources one worker needs simultaneously.
///
/// Order is the caller's: the coordinator tries resources in exactly this
/// sequence and does not sort them. Built only from a [`ResourceRegistry`],
/// so every resource in a request is a registered one.
///
/// Timeout, retry and deadline values left unset fall back to the
/// coordinator's configuration.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub(crate) requester: WorkerId,
    pub(crate) resources: Vec<Arc<Resource>>,
    pub(crate) attempt_timeout: Option<Duration>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) deadline: Option<Duration>,
    pub(crate) abort: Option<AbortSignal>,
}

impl AcquisitionRequest {
    /// Resolve `ids` against `registry` into a request for `requester`.
    pub fn from_registry(
        registry: &ResourceRegistry,
        requester: WorkerId,
        ids: &[ResourceId],
    ) -> Result<Self, RequestError> {
        if ids.is_empty() {
            return Err(RequestError::Empty);
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let mut resources = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id) {
                return Err(RequestError::DuplicateResource(id.clone()));
            }
            let resource = registry
                .get(id)
                .ok_or_else(|| RequestError::UnknownResource(id.clone()))?;
            resources.push(Arc::clone(resource));
        }

        Ok(Self {
            requester,
            resources,
            attempt_timeout: None,
            max_retries: None,
            deadline: None,
            abort: None,
        })
    }

    /// Override the per-resource try-acquire timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Override the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Override the overall time budget.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Allow the request to be cancelled through `signal`.
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    /// The requesting worker.
    pub fn requester(&self) -> WorkerId {
        self.requester
    }

    /// Requested resource ids in acquisition order.
    pub fn resource_ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.iter().map(|r| r.id())
    }

    /// Number of resources requested.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Always false: empty requests are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockset_test_helpers::{ids, registry_abc};

    #[test]
    fn test_request_preserves_caller_order() {
        let registry = registry_abc();
        let request =
            AcquisitionRequest::from_registry(&registry, WorkerId(1), &ids(&["C", "A"])).unwrap();

        let order: Vec<_> = request.resource_ids().map(|id| id.as_str()).collect();
        assert_eq!(order, vec!["C", "A"]);
        assert_eq!(request.requester(), WorkerId(1));
        assert_eq!(request.len(), 2);
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let registry = registry_abc();

        assert_eq!(
            AcquisitionRequest::from_registry(&registry, WorkerId(1), &[]).unwrap_err(),
            RequestError::Empty
        );
        assert_eq!(
            AcquisitionRequest::from_registry(&registry, WorkerId(1), &ids(&["A", "B", "A"]))
                .unwrap_err(),
            RequestError::DuplicateResource(ResourceId::from("A"))
        );
        assert_eq!(
            AcquisitionRequest::from_registry(&registry, WorkerId(1), &ids(&["A", "Z"]))
                .unwrap_err(),
            RequestError::UnknownResource(ResourceId::from("Z"))
        );
    }

    #[test]
    fn test_overrides() {
        let registry = registry_abc();
        let request = AcquisitionRequest::from_registry(&registry, WorkerId(1), &ids(&["A"]))
            .unwrap()
            .with_attempt_timeout(Duration::from_millis(3))
            .with_max_retries(0)
            .with_deadline(Duration::from_secs(1));

        assert_eq!(request.attempt_timeout, Some(Duration::from_millis(3)));
        assert_eq!(request.max_retries, Some(0));
        assert_eq!(request.deadline, Some(Duration::from_secs(1)));
        assert!(request.abort.is_none());
    }
}
