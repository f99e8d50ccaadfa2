//! Sidecar identifier cache contract
//!
//! The proxy keeps a cache of per-keyspace sidecar database identifiers.
//! The watcher's only obligation toward it: when a keyspace is deleted,
//! evict its entry.

/// Eviction interface of the sidecar identifier cache
pub trait IdentifierCache: Send + Sync + 'static {
    /// Drop the entry for a deleted keyspace; absent entries are fine
    fn delete(&self, keyspace: &str);
}
