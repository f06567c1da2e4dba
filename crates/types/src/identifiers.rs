//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Stable identifier of an exclusively-lockable resource.
///
/// Identifiers are names rather than indexes: the same id always refers to the
/// same resource for the lifetime of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Cow<'static, str>);

impl ResourceId {
    /// Create an id from a static name without allocating.
    pub const fn from_static(name: &'static str) -> Self {
        ResourceId(Cow::Borrowed(name))
    }

    /// Create an id from any owned or borrowed name.
    pub fn new(name: impl Into<String>) -> Self {
        ResourceId(Cow::Owned(name.into()))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ResourceId {
    fn from(name: &'static str) -> Self {
        ResourceId::from_static(name)
    }
}

impl From<String> for ResourceId {
    fn from(name: String) -> Self {
        ResourceId(Cow::Owned(name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({})", self.0)
    }
}

/// Identity of a worker requesting resources.
///
/// A resource records the worker that holds it; release by any other worker
/// is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl WorkerId {
    /// Get the raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_equality_ignores_ownership() {
        let borrowed = ResourceId::from_static("A");
        let owned = ResourceId::new(String::from("A"));
        assert_eq!(borrowed, owned);
        assert_eq!(borrowed.as_str(), "A");
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceId::from("ledger").to_string(), "Resource(ledger)");
        assert_eq!(WorkerId(3).to_string(), "Worker(3)");
    }

    #[test]
    fn test_ordering() {
        assert!(ResourceId::from("A") < ResourceId::from("B"));
        assert!(WorkerId(1) < WorkerId(2));
    }
}
