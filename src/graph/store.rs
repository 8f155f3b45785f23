// Graph store collaborator interface

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A labelled node as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: i64,
    pub label: String,
    pub key_property: String,
    pub key: String,
    pub properties: Map<String, Value>,
    pub count: u64,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Node to be created with `count = 1`
#[derive(Debug, Clone)]
pub struct NewNode {
    pub label: String,
    pub key_property: String,
    pub key: String,
    pub properties: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Directed, typed relationship between two nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub rel_type: String,
    pub created_at: DateTime<Utc>,
}

/// Both endpoints and the edge written for one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketWrite {
    pub source: Node,
    pub destination: Node,
    pub edge_created: bool,
}

/// Lifecycle of a capture run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
        }
    }
}

/// Ledger entry describing one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: uuid::Uuid,
    /// Capture mode, e.g. "file", "live", "ring"
    pub mode: String,
    /// File path or interface name
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub packets_seen: u64,
    pub packets_dropped: u64,
    pub stop_reason: Option<String>,
}

impl RunRecord {
    pub fn start(mode: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            mode: mode.into(),
            source: source.into(),
            started_at: Utc::now(),
            stopped_at: None,
            status: RunStatus::Running,
            packets_seen: 0,
            packets_dropped: 0,
            stop_reason: None,
        }
    }
}

/// Graph size summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub local_machines: usize,
    pub machines: usize,
    pub networks: usize,
    pub ipv6_machines: usize,
    pub relationships: usize,
    pub runs: usize,
}

impl GraphStats {
    pub fn node_count(&self) -> usize {
        self.local_machines + self.machines + self.networks + self.ipv6_machines
    }
}

/// Backing graph store.
///
/// Every method is a short, bounded operation. Implementations report an
/// unreachable backend as `PciError::StoreUnavailable`.
pub trait GraphStore: Send + Sync {
    /// Find a node by label and key property value
    fn find_node(&self, label: &str, key_property: &str, key: &str) -> Result<Option<Node>>;

    /// Insert a node with `count = 1` and both timestamps set to `created_at`
    fn create_node(&self, node: NewNode) -> Result<Node>;

    /// Increment `count` by one and set `last_update`, as a single atomic update
    fn touch_node(&self, id: i64, now: DateTime<Utc>) -> Result<Node>;

    /// Create the edge unless an identical (source, target, type) edge exists.
    /// Returns whether a new edge was created.
    fn merge_edge(&self, source_id: i64, target_id: i64, rel_type: &str) -> Result<bool>;

    /// Record one packet as a single unit of work: upsert the source node,
    /// upsert the destination node, merge the `rel_type` edge between them.
    ///
    /// Each `NewNode` is created with `count = 1` when absent; an existing
    /// node gets `count + 1` and `last_update = created_at`. On error nothing
    /// of the packet is kept.
    fn apply_packet(
        &self,
        source: &NewNode,
        destination: &NewNode,
        rel_type: &str,
    ) -> Result<PacketWrite>;

    /// All edges from `source_id` to `target_id`, any type
    fn find_edges(&self, source_id: i64, target_id: i64) -> Result<Vec<Edge>>;

    /// Insert or update a run ledger entry
    fn record_run(&self, _run: &RunRecord) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats>;

    /// Release the connection. Calls after close fail with `StoreUnavailable`.
    fn close(&self) -> Result<()>;
}
