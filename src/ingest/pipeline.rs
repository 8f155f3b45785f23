// Resolution pipeline: one packet in, two entities and an edge out

use crate::capture::Packet;
use crate::classifier::{Address, AddressClassifier, Category};
use crate::enrichment::{Enrichment, EnrichmentResolver};
use crate::error::Result;
use crate::graph::{Entity, EntityRepository, GraphStore};
use std::sync::Arc;

/// What processing one packet did to the graph
#[derive(Debug, Clone)]
pub struct PacketOutcome {
    pub source: Entity,
    pub destination: Entity,
    pub edge_created: bool,
}

/// Classifier, resolver and repository wired together
pub struct Pipeline {
    classifier: AddressClassifier,
    resolver: Arc<EnrichmentResolver>,
    repository: EntityRepository,
}

impl Pipeline {
    pub fn new(store: Arc<dyn GraphStore>, resolver: Arc<EnrichmentResolver>) -> Result<Self> {
        Ok(Self {
            classifier: AddressClassifier::new()?,
            resolver,
            repository: EntityRepository::new(store),
        })
    }

    pub fn resolver(&self) -> &EnrichmentResolver {
        &self.resolver
    }

    /// Upsert both endpoints of `packet` and merge the protocol edge between
    /// them. The three writes succeed or fail together.
    pub async fn process(&self, packet: &Packet) -> Result<PacketOutcome> {
        let source = self.classifier.classify(&packet.source);
        let destination = self.classifier.classify(&packet.destination);

        // Lookups run before any key is locked
        let source_enrichment = self.enrich(&source).await?;
        let destination_enrichment = if destination == source {
            source_enrichment.clone()
        } else {
            self.enrich(&destination).await?
        };

        let (source, destination, edge_created) = self.repository.record_packet(
            (&source, source_enrichment.as_ref()),
            (&destination, destination_enrichment.as_ref()),
            &packet.protocol,
        )?;

        Ok(PacketOutcome {
            source,
            destination,
            edge_created,
        })
    }

    async fn enrich(&self, address: &Address) -> Result<Option<Enrichment>> {
        if self.needs_enrichment(address)? {
            Ok(Some(self.resolver.enrich(&address.key).await))
        } else {
            Ok(None)
        }
    }

    /// Only machines not yet in the graph are enriched; existing ones keep
    /// the attributes they were created with
    fn needs_enrichment(&self, address: &Address) -> Result<bool> {
        if address.category != Category::Machine {
            return Ok(false);
        }
        Ok(self.repository.find(address)?.is_none())
    }
}
