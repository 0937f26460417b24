//! Nodes and edges owned by the graph.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use topograph_core::{EdgeId, IdentityKey, Metadata, NodeId};

/// Shared storage behind a [`Node`] handle.
///
/// `commit` serializes writers on this node (commits and deletion) and is
/// held for the whole write including event publication. `state` is only
/// write-locked while a batch is applied, so readers never observe a
/// partially applied transaction.
pub(crate) struct NodeCell {
    pub(crate) id: NodeId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) commit: Mutex<()>,
    pub(crate) state: RwLock<NodeState>,
}

pub(crate) struct NodeState {
    pub(crate) identity: IdentityKey,
    pub(crate) metadata: Metadata,
    pub(crate) revision: u64,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) removed: bool,
}

/// A handle to a graph vertex. Clone is cheap (inner Arc).
///
/// The handle stays valid after the node is removed from the graph; reads
/// return the last committed state and transactions fail to commit.
#[derive(Clone)]
pub struct Node {
    pub(crate) cell: Arc<NodeCell>,
}

impl Node {
    pub(crate) fn new(identity: IdentityKey) -> Self {
        let now = Utc::now();
        let metadata = identity.to_metadata();
        Self {
            cell: Arc::new(NodeCell {
                id: NodeId::new(),
                created_at: now,
                commit: Mutex::new(()),
                state: RwLock::new(NodeState {
                    identity,
                    metadata,
                    revision: 1,
                    updated_at: now,
                    removed: false,
                }),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    /// The logical identity the node is currently indexed under.
    pub fn identity(&self) -> IdentityKey {
        self.cell.state.read().identity.clone()
    }

    /// A copy of the node's committed metadata.
    pub fn metadata(&self) -> Metadata {
        self.cell.state.read().metadata.clone()
    }

    pub fn revision(&self) -> u64 {
        self.cell.state.read().revision
    }

    pub fn is_removed(&self) -> bool {
        self.cell.state.read().removed
    }

    /// A consistent copy of everything committed on the node.
    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.cell.state.read();
        NodeSnapshot {
            id: self.cell.id,
            identity: state.identity.clone(),
            metadata: state.metadata.clone(),
            revision: state.revision,
            created_at: self.cell.created_at,
            updated_at: state.updated_at,
        }
    }

    pub(crate) fn same_as(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.cell.id).finish()
    }
}

/// Point-in-time copy of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub identity: IdentityKey,
    pub metadata: Metadata,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub parent: NodeId,
    pub child: NodeId,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_seeded_with_identity() {
        let key = IdentityKey::new("Pod", "k8s", "k8s", "pod-1");
        let node = Node::new(key.clone());

        let snap = node.snapshot();
        assert_eq!(snap.identity, key);
        assert_eq!(snap.revision, 1);
        assert_eq!(snap.metadata, key.to_metadata());
        assert_eq!(snap.created_at, snap.updated_at);
        assert!(!node.is_removed());
    }

    #[test]
    fn clones_share_state() {
        let node = Node::new(IdentityKey::new("Host", "docker", "docker", "h1"));
        let other = node.clone();
        assert!(node.same_as(&other));
        assert_eq!(node.id(), other.id());
    }
}
