//! Endpoint identifiers and their allocation.

use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a connected endpoint.
///
/// Valid only for the lifetime of the connection it was allocated for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create an endpoint ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EndpointId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> Self {
        id.0
    }
}

/// Source of fresh endpoint identifiers.
///
/// The relay asks the allocator for one identifier per accepted connection.
pub trait IdAllocator: Send + Sync {
    /// Allocate an identifier that is not held by any live connection.
    fn allocate(&self) -> EndpointId;
}

/// Allocates random UUIDv4 identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidAllocator;

impl IdAllocator for UuidAllocator {
    fn allocate(&self) -> EndpointId {
        EndpointId(Uuid::new_v4().to_string())
    }
}

/// Allocates `prefix-1`, `prefix-2`, ... in order.
///
/// Deterministic, so tests can predict every identifier.
#[derive(Debug)]
pub struct SequentialAllocator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialAllocator {
    /// Create an allocator producing `prefix-N`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialAllocator {
    fn default() -> Self {
        Self::new("peer")
    }
}

impl IdAllocator for SequentialAllocator {
    fn allocate(&self) -> EndpointId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        EndpointId(format!("{}-{}", self.prefix, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_allocator_unique() {
        let allocator = UuidAllocator;
        let id1 = allocator.allocate();
        let id2 = allocator.allocate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn test_sequential_allocator() {
        let allocator = SequentialAllocator::new("x");
        assert_eq!(allocator.allocate().as_str(), "x-1");
        assert_eq!(allocator.allocate().as_str(), "x-2");
        assert_eq!(SequentialAllocator::default().allocate().as_str(), "peer-1");
    }

    #[test]
    fn test_endpoint_id_conversions() {
        let id: EndpointId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
        assert_eq!(String::from(id), "test-id");
    }
}
