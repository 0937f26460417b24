//! Graph listener that logs what each commit actually changed.

use std::collections::HashMap;

use parking_lot::Mutex;

use topograph_core::{diff, EventPayload, GraphEvent, Metadata, MetadataDiff, NodeId};
use topograph_graph::GraphListener;

/// Keeps the last tree seen per node and logs the dotted paths each update
/// touched. Commits that rewrote a node with identical content (same
/// digest) are logged as unchanged.
#[derive(Default)]
pub struct ChangeLogger {
    last: Mutex<HashMap<NodeId, (String, Metadata)>>,
}

impl ChangeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `event` and return the structural change for node updates.
    ///
    /// Returns `None` for other events, for updates of nodes never seen
    /// being added, and for updates that left the tree unchanged.
    pub fn record(&self, event: &GraphEvent) -> Option<MetadataDiff> {
        match &event.payload {
            EventPayload::NodeAdded {
                node_id, metadata, ..
            } => {
                self.last
                    .lock()
                    .insert(*node_id, (metadata.digest(), metadata.clone()));
                None
            }
            EventPayload::NodeUpdated {
                node_id, metadata, ..
            } => {
                let digest = metadata.digest();
                let previous = self
                    .last
                    .lock()
                    .insert(*node_id, (digest.clone(), metadata.clone()))?;
                if previous.0 == digest {
                    return None;
                }
                Some(diff(&previous.1, metadata))
            }
            EventPayload::NodeDeleted { node_id, .. } => {
                self.last.lock().remove(node_id);
                None
            }
            EventPayload::EdgeAdded { .. } | EventPayload::EdgeDeleted { .. } => None,
        }
    }
}

impl GraphListener for ChangeLogger {
    fn on_event(&self, event: &GraphEvent) {
        let changes = self.record(event);
        match (&event.payload, changes) {
            (
                EventPayload::NodeUpdated {
                    node_id,
                    identity,
                    revision,
                    ..
                },
                Some(changes),
            ) => {
                tracing::debug!(
                    node_id = %node_id,
                    identity = %identity,
                    revision,
                    paths = ?changes.paths(),
                    "Node updated"
                );
            }
            (
                EventPayload::NodeUpdated {
                    node_id, revision, ..
                },
                None,
            ) => {
                tracing::trace!(node_id = %node_id, revision, "Node rewritten without changes");
            }
            (other, _) => {
                tracing::trace!(event_id = ?event.id, payload = ?other, "Graph event");
            }
        }
    }
}
