// Protocol-typed relationships between entities

use super::locks::{KeyLocks, DEFAULT_STRIPES};
use super::{Entity, GraphStore};
use crate::error::Result;
use std::sync::Arc;

/// Creates at most one edge per (source, destination, protocol) triple
pub struct RelationshipMerger {
    store: Arc<dyn GraphStore>,
    locks: KeyLocks,
}

impl RelationshipMerger {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(DEFAULT_STRIPES),
        }
    }

    /// Merge a `protocol` edge from `source` to `destination`.
    ///
    /// Returns true when the edge did not exist before.
    pub fn merge_edge(&self, source: &Entity, destination: &Entity, protocol: &str) -> Result<bool> {
        let _guard = self.locks.lock(&(source.id, destination.id, protocol));

        let created = self.store.merge_edge(source.id, destination.id, protocol)?;
        if created {
            tracing::debug!(
                "New relationship: {} -[{}]-> {}",
                source.key(),
                protocol,
                destination.key()
            );
        }
        Ok(created)
    }
}
