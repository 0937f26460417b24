//! Change notifications published by the graph.
//!
//! Every successful mutation emits exactly one [`GraphEvent`]. Listeners
//! receive events synchronously, before the mutating call returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::Metadata;
use crate::types::{EdgeId, IdentityKey, NodeId};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl GraphEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The node this event concerns, for node events.
    pub fn node_id(&self) -> Option<NodeId> {
        match &self.payload {
            EventPayload::NodeAdded { node_id, .. }
            | EventPayload::NodeUpdated { node_id, .. }
            | EventPayload::NodeDeleted { node_id, .. } => Some(*node_id),
            EventPayload::EdgeAdded { .. } | EventPayload::EdgeDeleted { .. } => None,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    // ── Node events ───────────────────────────────────────────
    /// A node was created.
    NodeAdded {
        node_id: NodeId,
        identity: IdentityKey,
        metadata: Metadata,
        revision: u64,
    },
    /// A metadata transaction was committed on a node.
    NodeUpdated {
        node_id: NodeId,
        identity: IdentityKey,
        changed_keys: Vec<String>,
        metadata: Metadata,
        revision: u64,
    },
    /// A node was removed from the graph.
    NodeDeleted {
        node_id: NodeId,
        identity: IdentityKey,
    },

    // ── Edge events ───────────────────────────────────────────
    /// An edge was created between two nodes.
    EdgeAdded {
        edge_id: EdgeId,
        parent: NodeId,
        child: NodeId,
        metadata: Metadata,
    },
    /// An edge was removed.
    EdgeDeleted {
        edge_id: EdgeId,
        parent: NodeId,
        child: NodeId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataValue;

    #[test]
    fn event_serialization_roundtrip() {
        let identity = IdentityKey::new("Pod", "k8s", "k8s", "pod-1");
        let event = GraphEvent::new(EventPayload::NodeUpdated {
            node_id: NodeId::new(),
            identity: identity.clone(),
            changed_keys: vec!["K8s".to_string()],
            metadata: identity.to_metadata(),
            revision: 2,
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: GraphEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, deserialized.id);
        assert_eq!(event.node_id(), deserialized.node_id());
    }

    #[test]
    fn event_payload_tags() {
        let mut metadata = Metadata::new();
        metadata.insert("RelationType", MetadataValue::from("ownership"));
        let payload = EventPayload::EdgeAdded {
            edge_id: EdgeId::new(),
            parent: NodeId::new(),
            child: NodeId::new(),
            metadata,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"event_type\":\"EdgeAdded\""));
        assert!(json.contains("\"RelationType\":\"ownership\""));
    }
}
