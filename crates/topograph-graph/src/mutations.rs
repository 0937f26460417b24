//! Structural write operations: node creation/removal and edges.
//!
//! Node metadata is not written here; see [`crate::transaction`].

use chrono::Utc;

use topograph_core::{EdgeId, EventPayload, IdentityKey, Metadata};

use crate::graph::{Graph, GraphError};
use crate::node::{Edge, Node};

impl Graph {
    // ── Nodes ────────────────────────────────────────────────────

    /// Create and register a node for `identity`.
    ///
    /// The existence check and the insert happen under one graph-wide
    /// critical section, so concurrent callers racing on the same identity
    /// see exactly one success; the others get [`GraphError::DuplicateNode`]
    /// and should fall back to [`Graph::node`].
    pub fn new_node(&self, identity: IdentityKey) -> Result<Node, GraphError> {
        let node = Node::new(identity.clone());
        // Held until NodeAdded is published, so no commit on the new node can
        // publish before it.
        let cell = node.cell.clone();
        let _commit = cell.commit.lock();

        {
            let mut structure = self.structure.write();
            if structure.index.contains_key(&identity) {
                return Err(GraphError::DuplicateNode { identity });
            }
            structure.index.insert(identity.clone(), node.id());
            structure.nodes.insert(node.id(), node.clone());
        }

        let snapshot = node.snapshot();
        tracing::info!(node_id = %node.id(), identity = %identity, "Node created");
        self.publish(EventPayload::NodeAdded {
            node_id: snapshot.id,
            identity,
            metadata: snapshot.metadata,
            revision: snapshot.revision,
        });

        Ok(node)
    }

    /// Remove a node and every edge touching it.
    ///
    /// Waits for any in-flight commit on the node. Transactions still open
    /// on the node fail with `NodeRemoved` when they commit.
    pub fn del_node(&self, node: &Node) -> Result<(), GraphError> {
        let _commit = node.cell.commit.lock();
        let mut state = node.cell.state.write();
        if state.removed {
            return Err(GraphError::NodeNotFound { node_id: node.id() });
        }

        let removed_edges = {
            let mut structure = self.structure.write();
            match structure.nodes.get(&node.id()) {
                Some(registered) if registered.same_as(node) => {}
                _ => return Err(GraphError::NodeNotFound { node_id: node.id() }),
            }

            structure.nodes.remove(&node.id());
            if structure.index.get(&state.identity) == Some(&node.id()) {
                structure.index.remove(&state.identity);
            }

            let incident: Vec<EdgeId> = structure
                .edges
                .values()
                .filter(|e| e.parent == node.id() || e.child == node.id())
                .map(|e| e.id)
                .collect();
            incident
                .iter()
                .filter_map(|id| structure.edges.remove(id))
                .collect::<Vec<_>>()
        };

        state.removed = true;
        let identity = state.identity.clone();
        drop(state);

        for edge in removed_edges {
            self.publish(EventPayload::EdgeDeleted {
                edge_id: edge.id,
                parent: edge.parent,
                child: edge.child,
            });
        }

        tracing::info!(node_id = %node.id(), identity = %identity, "Node removed");
        self.publish(EventPayload::NodeDeleted {
            node_id: node.id(),
            identity,
        });

        Ok(())
    }

    // ── Edges ────────────────────────────────────────────────────

    /// Link `parent` to `child`. Both nodes must currently be in the graph.
    pub fn new_edge(&self, parent: &Node, child: &Node, metadata: Metadata) -> Result<Edge, GraphError> {
        let edge = Edge {
            id: EdgeId::new(),
            parent: parent.id(),
            child: child.id(),
            metadata,
            created_at: Utc::now(),
        };

        {
            let mut structure = self.structure.write();
            for endpoint in [parent, child] {
                if !structure.nodes.contains_key(&endpoint.id()) {
                    return Err(GraphError::NodeNotFound {
                        node_id: endpoint.id(),
                    });
                }
            }
            structure.edges.insert(edge.id, edge.clone());
        }

        tracing::debug!(edge_id = %edge.id, parent = %edge.parent, child = %edge.child, "Edge created");
        self.publish(EventPayload::EdgeAdded {
            edge_id: edge.id,
            parent: edge.parent,
            child: edge.child,
            metadata: edge.metadata.clone(),
        });

        Ok(edge)
    }

    /// Remove an edge.
    pub fn del_edge(&self, edge_id: &EdgeId) -> Result<(), GraphError> {
        let edge = self
            .structure
            .write()
            .edges
            .remove(edge_id)
            .ok_or(GraphError::EdgeNotFound { edge_id: *edge_id })?;

        self.publish(EventPayload::EdgeDeleted {
            edge_id: edge.id,
            parent: edge.parent,
            child: edge.child,
        });

        Ok(())
    }
}
