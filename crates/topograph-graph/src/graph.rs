//! The graph itself: node/edge tables, the identity index, and listeners.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use topograph_core::{EdgeId, EventPayload, GraphEvent, IdentityKey, NodeId};

use crate::node::{Edge, Node};
use crate::transaction::MetadataTransaction;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Node already exists: {identity}")]
    DuplicateNode { identity: IdentityKey },

    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: NodeId },

    #[error("Edge not found: {edge_id}")]
    EdgeNotFound { edge_id: EdgeId },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration for a graph instance.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Buffer size of the broadcast channel handed out by [`Graph::subscribe`].
    /// Subscribers lagging further behind than this miss events.
    pub event_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
        }
    }
}

/// Receives every graph event synchronously.
///
/// Listeners run on the mutating caller's thread, after the change is
/// applied and before the mutating call returns. A listener may read the
/// graph but must not mutate the node whose event it is handling.
pub trait GraphListener: Send + Sync {
    fn on_event(&self, event: &GraphEvent);
}

impl<F> GraphListener for F
where
    F: Fn(&GraphEvent) + Send + Sync,
{
    fn on_event(&self, event: &GraphEvent) {
        self(event)
    }
}

/// Node table, edge table and identity index.
///
/// Guarded by one graph-wide lock. Lock order is always node commit lock,
/// then node state, then this; it is never held while a node lock is taken.
#[derive(Default)]
pub(crate) struct Structure {
    pub(crate) index: HashMap<IdentityKey, NodeId>,
    pub(crate) nodes: HashMap<NodeId, Node>,
    pub(crate) edges: HashMap<EdgeId, Edge>,
}

/// The shared topology graph.
///
/// One instance is shared by all probes (wrap it in an `Arc`). Structural
/// changes (node creation, removal, edges) serialize on a graph-wide lock;
/// metadata commits serialize per node and never block commits on other
/// nodes.
pub struct Graph {
    pub(crate) structure: RwLock<Structure>,
    listeners: RwLock<Vec<Arc<dyn GraphListener>>>,
    events: broadcast::Sender<GraphEvent>,
}

impl Graph {
    pub fn new(config: &GraphConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            structure: RwLock::new(Structure::default()),
            listeners: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Register a listener for all future events.
    pub fn add_listener(&self, listener: Arc<dyn GraphListener>) {
        self.listeners.write().push(listener);
    }

    /// Subscribe to all future events through a broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Begin an open metadata transaction bound to `node`.
    pub fn start_metadata_transaction(&self, node: &Node) -> MetadataTransaction<'_> {
        MetadataTransaction::new(self, node.clone())
    }

    /// Deliver an event to every listener and subscriber.
    pub(crate) fn publish(&self, payload: EventPayload) {
        let event = GraphEvent::new(payload);
        let listeners: Vec<Arc<dyn GraphListener>> = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_event(&event);
        }
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(&GraphConfig::default())
    }
}
