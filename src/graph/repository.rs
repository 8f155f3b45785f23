// Entity repository: find-or-create-or-increment, serialized per key

use super::locks::{KeyLocks, DEFAULT_STRIPES};
use super::{Entity, EntityKind, GraphStore, NewNode, PacketWrite};
use crate::classifier::Address;
use crate::enrichment::Enrichment;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Core interface to the graph store for entities
pub struct EntityRepository {
    store: Arc<dyn GraphStore>,
    locks: KeyLocks,
}

impl EntityRepository {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(DEFAULT_STRIPES),
        }
    }

    /// Look up the entity stored for an address, without modifying it
    pub fn find(&self, address: &Address) -> Result<Option<Entity>> {
        let category = address.category;
        self.store
            .find_node(category.label(), category.key_property(), &address.key)?
            .map(Entity::try_from)
            .transpose()
    }

    /// Record one observation of `address`.
    ///
    /// Existing entity: `count + 1` and `last_update = now`. Otherwise a new
    /// entity with `count = 1`, using `enrichment` for machine attributes.
    /// Concurrent calls for the same address are serialized, so no increment
    /// is lost and no duplicate is created. Enrichment must be resolved before
    /// calling; nothing blocking runs under the key lock.
    pub fn upsert(&self, address: &Address, enrichment: Option<&Enrichment>) -> Result<Entity> {
        let category = address.category;
        let _guard = self.locks.lock(&(category, address.key.as_str()));

        let now = Utc::now();
        let node = match self.store.find_node(
            category.label(),
            category.key_property(),
            &address.key,
        )? {
            Some(existing) => {
                tracing::trace!("Existing node: {} (count {})", address, existing.count);
                self.store.touch_node(existing.id, now)?
            }
            None => {
                tracing::debug!("New node: {}", address);
                self.store.create_node(new_node(address, enrichment, now))?
            }
        };

        Entity::try_from(node)
    }

    /// Record one packet: both endpoints are counted and the `protocol` edge
    /// between them merged, all in one store transaction. On error none of
    /// the three writes is kept.
    ///
    /// The keys of both endpoints are locked for the duration, in a fixed
    /// order. Returns the stored source, the stored destination and whether
    /// the edge is new.
    pub fn record_packet(
        &self,
        source: (&Address, Option<&Enrichment>),
        destination: (&Address, Option<&Enrichment>),
        protocol: &str,
    ) -> Result<(Entity, Entity, bool)> {
        let ((src, src_enrichment), (dst, dst_enrichment)) = (source, destination);
        let _guards = self.locks.lock_all(&[
            (src.category, src.key.as_str()),
            (dst.category, dst.key.as_str()),
        ]);

        let now = Utc::now();
        let PacketWrite {
            source,
            destination,
            edge_created,
        } = self.store.apply_packet(
            &new_node(src, src_enrichment, now),
            &new_node(dst, dst_enrichment, now),
            protocol,
        )?;

        if source.count == 1 {
            tracing::debug!("New node: {}", src);
        }
        if destination.count == 1 {
            tracing::debug!("New node: {}", dst);
        }
        if edge_created {
            tracing::debug!("New relationship: {} -[{}]-> {}", src, protocol, dst);
        }

        Ok((
            Entity::try_from(source)?,
            Entity::try_from(destination)?,
            edge_created,
        ))
    }
}

fn new_node(address: &Address, enrichment: Option<&Enrichment>, now: DateTime<Utc>) -> NewNode {
    let category = address.category;
    NewNode {
        label: category.label().to_string(),
        key_property: category.key_property().to_string(),
        key: address.key.clone(),
        properties: EntityKind::from_address(address, enrichment).properties(),
        created_at: now,
    }
}
