//! Read operations on the graph.
//!
//! Lookups copy node handles out of the graph-wide lock before touching any
//! node state, keeping the lock order used by writers.

use serde::Serialize;

use topograph_core::{EdgeId, IdentityKey, MetadataValue, NodeId};

use crate::graph::{Graph, GraphError};
use crate::node::{Edge, Node, NodeSnapshot};

/// Serializable dump of the whole graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphDump {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<Edge>,
}

impl Graph {
    // ── Single Node Lookups ──────────────────────────────────────

    /// Look up a node by logical identity. Never creates.
    pub fn node(&self, identity: &IdentityKey) -> Option<Node> {
        let structure = self.structure.read();
        let id = structure.index.get(identity)?;
        structure.nodes.get(id).cloned()
    }

    /// Look up a node by its process-assigned id.
    pub fn get_node(&self, node_id: &NodeId) -> Option<Node> {
        self.structure.read().nodes.get(node_id).cloned()
    }

    // ── List Queries ─────────────────────────────────────────────

    /// All nodes, ordered by identity.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.structure.read().nodes.values().cloned().collect();
        nodes.sort_by_cached_key(Node::identity);
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.structure.read().nodes.len()
    }

    /// Nodes whose metadata holds `value` at the dotted `path`.
    pub fn lookup_by_field(&self, path: &str, value: &MetadataValue) -> Vec<Node> {
        self.nodes()
            .into_iter()
            .filter(|node| {
                let state = node.cell.state.read();
                state.metadata.get_field(path).ok() == Some(value)
            })
            .collect()
    }

    // ── Edge Queries ─────────────────────────────────────────────

    pub fn get_edge(&self, edge_id: &EdgeId) -> Option<Edge> {
        self.structure.read().edges.get(edge_id).cloned()
    }

    /// Edges with `node` as parent or child, ordered by creation time.
    pub fn edges_of(&self, node: &Node) -> Vec<Edge> {
        let id = node.id();
        let mut edges: Vec<Edge> = self
            .structure
            .read()
            .edges
            .values()
            .filter(|e| e.parent == id || e.child == id)
            .cloned()
            .collect();
        edges.sort_by_key(|e| (e.created_at, e.id));
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.structure.read().edges.len()
    }

    // ── Dump ─────────────────────────────────────────────────────

    /// Snapshot every node and edge.
    pub fn dump(&self) -> GraphDump {
        let nodes = self.nodes().iter().map(Node::snapshot).collect();
        let mut edges: Vec<Edge> = self.structure.read().edges.values().cloned().collect();
        edges.sort_by_key(|e| (e.created_at, e.id));
        GraphDump { nodes, edges }
    }

    /// The graph dump as a JSON document.
    pub fn to_json(&self) -> Result<serde_json::Value, GraphError> {
        Ok(serde_json::to_value(self.dump())?)
    }
}
