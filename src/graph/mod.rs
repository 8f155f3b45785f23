//! Communication graph: entities, relationships and the store they live in
//!
//! This module provides:
//! - The [`Entity`] model, one variant per address category
//! - The [`GraphStore`] collaborator trait implemented by the storage layer
//! - [`EntityRepository`], the find-or-create-or-increment primitive
//! - [`RelationshipMerger`], protocol-typed edges with merge semantics

mod locks;
mod merger;
mod repository;
mod store;

pub use merger::RelationshipMerger;
pub use repository::EntityRepository;
pub use store::{
    Edge, GraphStats, GraphStore, NewNode, Node, PacketWrite, RunRecord, RunStatus,
};

use crate::classifier::{Address, Category};
use crate::enrichment::Enrichment;
use crate::error::{PciError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category-specific part of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum EntityKind {
    LocalMachine { ipv4: String },
    Machine { ipv4: String, enrichment: Enrichment },
    Network { mac_address: String },
    MachineIpv6 { ipv6: String },
}

impl EntityKind {
    /// Build the variant for a classified address.
    ///
    /// Enrichment is only meaningful for `Machine`; missing enrichment there
    /// falls back to all-"Unknown" attributes.
    pub fn from_address(address: &Address, enrichment: Option<&Enrichment>) -> Self {
        let key = address.key.clone();
        match address.category {
            Category::LocalMachine => EntityKind::LocalMachine { ipv4: key },
            Category::Machine => EntityKind::Machine {
                ipv4: key,
                enrichment: enrichment.cloned().unwrap_or_default(),
            },
            Category::Network => EntityKind::Network { mac_address: key },
            Category::MachineIpv6 => EntityKind::MachineIpv6 { ipv6: key },
        }
    }

    pub fn category(&self) -> Category {
        match self {
            EntityKind::LocalMachine { .. } => Category::LocalMachine,
            EntityKind::Machine { .. } => Category::Machine,
            EntityKind::Network { .. } => Category::Network,
            EntityKind::MachineIpv6 { .. } => Category::MachineIpv6,
        }
    }

    /// Natural key of the entity
    pub fn key(&self) -> &str {
        match self {
            EntityKind::LocalMachine { ipv4 } | EntityKind::Machine { ipv4, .. } => ipv4,
            EntityKind::Network { mac_address } => mac_address,
            EntityKind::MachineIpv6 { ipv6 } => ipv6,
        }
    }

    /// Non-key node properties written when the entity is created
    pub fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        match self {
            EntityKind::LocalMachine { .. } => {
                props.insert("local".to_string(), Value::Bool(true));
            }
            EntityKind::Machine { enrichment, .. } => {
                props.insert("domain".to_string(), Value::from(enrichment.domain.clone()));
                props.insert("country".to_string(), Value::from(enrichment.country.clone()));
                props.insert("sub".to_string(), Value::from(enrichment.subdivision.clone()));
                props.insert("city".to_string(), Value::from(enrichment.city.clone()));
            }
            EntityKind::Network { .. } | EntityKind::MachineIpv6 { .. } => {}
        }
        props
    }

    fn from_node(category: Category, key: String, props: &Map<String, Value>) -> Self {
        match category {
            Category::LocalMachine => EntityKind::LocalMachine { ipv4: key },
            Category::Machine => {
                let field = |name: &str| {
                    props
                        .get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| crate::enrichment::UNKNOWN.to_string())
                };
                EntityKind::Machine {
                    ipv4: key,
                    enrichment: Enrichment {
                        domain: field("domain"),
                        country: field("country"),
                        subdivision: field("sub"),
                        city: field("city"),
                    },
                }
            }
            Category::Network => EntityKind::Network { mac_address: key },
            Category::MachineIpv6 => EntityKind::MachineIpv6 { ipv6: key },
        }
    }
}

/// An observed network address stored in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Store-assigned node id
    pub id: i64,
    pub kind: EntityKind,
    /// Number of packets this address appeared in
    pub count: u64,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Entity {
    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn key(&self) -> &str {
        self.kind.key()
    }
}

impl TryFrom<Node> for Entity {
    type Error = PciError;

    fn try_from(node: Node) -> Result<Self> {
        let category = Category::from_label(&node.label).ok_or_else(|| {
            PciError::Config(format!("Unknown node label in graph store: {}", node.label))
        })?;

        Ok(Self {
            id: node.id,
            kind: EntityKind::from_node(category, node.key, &node.properties),
            count: node.count,
            created_at: node.created_at,
            last_update: node.last_update,
        })
    }
}
