//! Metadata transactions: scoped, node-bound batches of metadata edits.
//!
//! A transaction stages edits without touching the node. `commit` applies
//! the whole batch under the node's locks and publishes one `NodeUpdated`
//! event; `discard`, a failed commit, or dropping an open transaction leaves
//! the node exactly as it was.
//!
//! ```
//! # use topograph_core::IdentityKey;
//! # use topograph_graph::Graph;
//! let graph = Graph::default();
//! let node = graph.new_node(IdentityKey::new("Pod", "k8s", "k8s", "pod-1")).unwrap();
//!
//! let mut tx = graph.start_metadata_transaction(&node);
//! tx.add("K8s", &serde_json::json!({"status": {"phase": "Running"}})).unwrap();
//! tx.commit().unwrap();
//!
//! assert_eq!(node.metadata().get_string("K8s.status.phase").unwrap(), "Running");
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use topograph_core::{normalize, EventPayload, IdentityKey, MetadataValue, NodeId};

use crate::graph::Graph;
use crate::node::Node;

/// Misuse of a transaction, or a commit that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("Metadata key must not be empty")]
    EmptyKey,

    #[error("Transaction already committed")]
    AlreadyCommitted,

    #[error("Transaction already discarded")]
    AlreadyDiscarded,

    #[error("Node {node_id} was removed from the graph")]
    NodeRemoved { node_id: NodeId },

    #[error("Node {node_id} cannot take identity {identity}: it belongs to another node")]
    IdentityConflict {
        node_id: NodeId,
        identity: IdentityKey,
    },
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Discarded,
}

#[derive(Debug, Clone)]
enum Edit {
    Set(MetadataValue),
    Remove,
}

/// Outcome of a commit that applied at least one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub node_id: NodeId,
    pub revision: u64,
    pub changed_keys: Vec<String>,
}

/// A pending batch of metadata edits bound to one node.
///
/// Holds no lock while open. Obtain one with
/// [`Graph::start_metadata_transaction`].
pub struct MetadataTransaction<'g> {
    graph: &'g Graph,
    node: Node,
    edits: BTreeMap<String, Edit>,
    state: TransactionState,
}

impl<'g> MetadataTransaction<'g> {
    pub(crate) fn new(graph: &'g Graph, node: Node) -> Self {
        Self {
            graph,
            node,
            edits: BTreeMap::new(),
            state: TransactionState::Open,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Keys staged so far, sorted.
    pub fn staged_keys(&self) -> Vec<&str> {
        self.edits.keys().map(String::as_str).collect()
    }

    /// Stage `normalize(value)` under `key`. A later edit to the same key
    /// replaces this one.
    pub fn add<V: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &V,
    ) -> Result<(), TransactionError> {
        self.ensure_open()?;
        let key = non_empty(key.into())?;
        self.edits.insert(key, Edit::Set(normalize(value)));
        Ok(())
    }

    /// Stage removal of `key`.
    pub fn remove(&mut self, key: impl Into<String>) -> Result<(), TransactionError> {
        self.ensure_open()?;
        let key = non_empty(key.into())?;
        self.edits.insert(key, Edit::Remove);
        Ok(())
    }

    /// Apply every staged edit to the node atomically.
    ///
    /// Each edit overwrites (or removes) the whole value at its key; nested
    /// maps are replaced, not merged. Returns `None` without publishing
    /// anything when no edits were staged.
    pub fn commit(&mut self) -> Result<Option<CommitReceipt>, TransactionError> {
        self.ensure_open()?;
        let edits = std::mem::take(&mut self.edits);
        // Resolved from here on, whatever the outcome.
        self.state = TransactionState::Discarded;

        if edits.is_empty() {
            self.state = TransactionState::Committed;
            return Ok(None);
        }

        let node_id = self.node.id();
        let _commit = self.node.cell.commit.lock();
        let mut state = self.node.cell.state.write();
        if state.removed {
            return Err(TransactionError::NodeRemoved { node_id });
        }

        let mut metadata = state.metadata.clone();
        let mut touches_identity = false;
        for (key, edit) in &edits {
            touches_identity |= IdentityKey::is_identity_field(key);
            match edit {
                Edit::Set(value) => {
                    metadata.insert(key.clone(), value.clone());
                }
                Edit::Remove => {
                    metadata.remove(key);
                }
            }
        }

        // The node stays indexed under its old identity unless all four
        // identity fields are present after the batch.
        let mut identity = state.identity.clone();
        if touches_identity {
            if let Some(next) = IdentityKey::from_metadata(&metadata) {
                if next != identity {
                    let mut structure = self.graph.structure.write();
                    if let Some(owner) = structure.index.get(&next) {
                        if *owner != node_id {
                            return Err(TransactionError::IdentityConflict {
                                node_id,
                                identity: next,
                            });
                        }
                    }
                    structure.index.remove(&identity);
                    structure.index.insert(next.clone(), node_id);
                    tracing::info!(node_id = %node_id, from = %identity, to = %next, "Node re-indexed");
                    identity = next;
                }
            }
        }

        state.metadata = metadata;
        state.identity = identity.clone();
        state.revision += 1;
        state.updated_at = Utc::now();
        let revision = state.revision;
        let snapshot = state.metadata.clone();
        drop(state);

        self.state = TransactionState::Committed;
        let changed_keys: Vec<String> = edits.into_keys().collect();
        tracing::debug!(node_id = %node_id, revision, keys = ?changed_keys, "Metadata transaction committed");

        self.graph.publish(EventPayload::NodeUpdated {
            node_id,
            identity,
            changed_keys: changed_keys.clone(),
            metadata: snapshot,
            revision,
        });

        Ok(Some(CommitReceipt {
            node_id,
            revision,
            changed_keys,
        }))
    }

    /// Drop every staged edit. The node is not touched.
    pub fn discard(&mut self) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.edits.clear();
        self.state = TransactionState::Discarded;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Open => Ok(()),
            TransactionState::Committed => Err(TransactionError::AlreadyCommitted),
            TransactionState::Discarded => Err(TransactionError::AlreadyDiscarded),
        }
    }
}

impl Drop for MetadataTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            if !self.edits.is_empty() {
                tracing::debug!(
                    node_id = %self.node.id(),
                    staged = self.edits.len(),
                    "Open metadata transaction dropped, discarding"
                );
            }
            self.state = TransactionState::Discarded;
        }
    }
}

fn non_empty(key: String) -> Result<String, TransactionError> {
    if key.is_empty() {
        Err(TransactionError::EmptyKey)
    } else {
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use topograph_core::{GraphEvent, Metadata};

    use super::*;

    fn pod(graph: &Graph, name: &str) -> Node {
        graph
            .new_node(IdentityKey::new("Pod", "k8s", "k8s", name))
            .unwrap()
    }

    fn updates(graph: &Graph) -> Arc<Mutex<Vec<(Vec<String>, Metadata)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        graph.add_listener(Arc::new(move |event: &GraphEvent| {
            if let EventPayload::NodeUpdated {
                changed_keys,
                metadata,
                ..
            } = &event.payload
            {
                sink.lock()
                    .unwrap()
                    .push((changed_keys.clone(), metadata.clone()));
            }
        }));
        seen
    }

    #[test]
    fn commit_applies_batch_and_publishes_once() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");
        let seen = updates(&graph);

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("Manager", "k8s").unwrap();
        tx.add("K8s", &json!({"labels": {"app": "x"}})).unwrap();
        let receipt = tx.commit().unwrap().unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(receipt.revision, 2);
        assert_eq!(receipt.changed_keys, vec!["K8s", "Manager"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, vec!["K8s", "Manager"]);
        assert_eq!(seen[0].1, node.metadata());
        assert_eq!(node.metadata().get_string("K8s.labels.app").unwrap(), "x");
    }

    #[test]
    fn last_write_wins() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("Status", "Pending").unwrap();
        tx.add("Status", &json!({"phase": 1.0})).unwrap();
        tx.commit().unwrap();

        assert_eq!(node.metadata().get_int("Status.phase").unwrap(), 1);
    }

    #[test]
    fn nested_values_are_replaced_not_merged() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("K8s", &json!({"a": 1, "b": 2})).unwrap();
        tx.commit().unwrap();

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("K8s", &json!({"c": 3})).unwrap();
        tx.commit().unwrap();

        assert_eq!(
            node.metadata().get("K8s"),
            Some(&normalize(&json!({"c": 3})))
        );
    }

    #[test]
    fn empty_commit_is_a_noop() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");
        let seen = updates(&graph);

        let mut tx = graph.start_metadata_transaction(&node);
        assert_eq!(tx.commit().unwrap(), None);
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(node.revision(), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unchanged_values_still_notify() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");
        let seen = updates(&graph);

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("Name", "pod-1").unwrap();
        tx.commit().unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(node.revision(), 2);
    }

    #[test]
    fn discard_leaves_node_untouched() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");
        let before = node.snapshot();
        let seen = updates(&graph);

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("K8s", &json!({"x": 1})).unwrap();
        tx.remove("Name").unwrap();
        tx.discard().unwrap();

        assert_eq!(tx.state(), TransactionState::Discarded);
        assert_eq!(node.snapshot(), before);
        assert_eq!(
            serde_json::to_vec(&node.metadata()).unwrap(),
            serde_json::to_vec(&before.metadata).unwrap()
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropped_transaction_is_discarded() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");
        let before = node.snapshot();

        {
            let mut tx = graph.start_metadata_transaction(&node);
            tx.add("K8s", &json!({"x": 1})).unwrap();
        }

        assert_eq!(node.snapshot(), before);

        // Nothing is left holding the node.
        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("K8s", &json!({"x": 2})).unwrap();
        assert!(tx.commit().unwrap().is_some());
    }

    #[test]
    fn misuse_is_reported() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");

        let mut tx = graph.start_metadata_transaction(&node);
        assert_eq!(tx.add("", "x"), Err(TransactionError::EmptyKey));
        assert_eq!(tx.remove(""), Err(TransactionError::EmptyKey));
        tx.add("a", &1).unwrap();
        tx.commit().unwrap();

        assert_eq!(tx.commit(), Err(TransactionError::AlreadyCommitted));
        assert_eq!(tx.add("b", &2), Err(TransactionError::AlreadyCommitted));
        assert_eq!(tx.discard(), Err(TransactionError::AlreadyCommitted));

        let mut tx = graph.start_metadata_transaction(&node);
        tx.discard().unwrap();
        assert_eq!(tx.discard(), Err(TransactionError::AlreadyDiscarded));
        assert_eq!(tx.commit(), Err(TransactionError::AlreadyDiscarded));
        assert_eq!(tx.remove("a"), Err(TransactionError::AlreadyDiscarded));
    }

    #[test]
    fn remove_deletes_key() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("Tombstone", &true).unwrap();
        tx.commit().unwrap();

        let mut tx = graph.start_metadata_transaction(&node);
        tx.remove("Tombstone").unwrap();
        let receipt = tx.commit().unwrap().unwrap();

        assert_eq!(receipt.changed_keys, vec!["Tombstone"]);
        assert!(!node.metadata().contains_key("Tombstone"));
    }

    #[test]
    fn commit_on_removed_node_fails_without_applying() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");
        let before = node.metadata();

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("K8s", &json!({"x": 1})).unwrap();
        graph.del_node(&node).unwrap();

        assert_eq!(
            tx.commit(),
            Err(TransactionError::NodeRemoved { node_id: node.id() })
        );
        assert_eq!(tx.state(), TransactionState::Discarded);
        assert_eq!(node.metadata(), before);
    }

    #[test]
    fn identity_change_reindexes_node() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("Name", "pod-renamed").unwrap();
        tx.commit().unwrap();

        let renamed = IdentityKey::new("Pod", "k8s", "k8s", "pod-renamed");
        assert!(graph.node(&IdentityKey::new("Pod", "k8s", "k8s", "pod-1")).is_none());
        assert_eq!(graph.node(&renamed).unwrap().id(), node.id());
        assert_eq!(node.identity(), renamed);
    }

    #[test]
    fn incomplete_identity_keeps_old_index() {
        let graph = Graph::default();
        let node = pod(&graph, "pod-1");

        let mut tx = graph.start_metadata_transaction(&node);
        tx.remove("Name").unwrap();
        tx.commit().unwrap();

        let key = IdentityKey::new("Pod", "k8s", "k8s", "pod-1");
        assert_eq!(graph.node(&key).unwrap().id(), node.id());
        assert_eq!(node.identity(), key);
    }

    #[test]
    fn identity_conflict_rejects_whole_batch() {
        let graph = Graph::default();
        let first = pod(&graph, "pod-1");
        let second = pod(&graph, "pod-2");
        let before = second.snapshot();

        let mut tx = graph.start_metadata_transaction(&second);
        tx.add("Name", "pod-1").unwrap();
        tx.add("K8s", &json!({"x": 1})).unwrap();
        assert!(matches!(
            tx.commit(),
            Err(TransactionError::IdentityConflict { node_id, .. }) if node_id == second.id()
        ));

        assert_eq!(second.snapshot(), before);
        assert_eq!(
            graph
                .node(&IdentityKey::new("Pod", "k8s", "k8s", "pod-1"))
                .unwrap()
                .id(),
            first.id()
        );
    }

    #[test]
    fn listener_can_read_the_committed_node() {
        let graph = Arc::new(Graph::default());
        let node = pod(&graph, "pod-1");
        let observed = Arc::new(Mutex::new(None));

        let reader = graph.clone();
        let sink = observed.clone();
        graph.add_listener(Arc::new(move |event: &GraphEvent| {
            if let EventPayload::NodeUpdated { node_id, .. } = &event.payload {
                let current = reader.get_node(node_id).map(|n| n.revision());
                *sink.lock().unwrap() = current;
            }
        }));

        let mut tx = graph.start_metadata_transaction(&node);
        tx.add("K8s", &json!({})).unwrap();
        tx.commit().unwrap();

        assert_eq!(*observed.lock().unwrap(), Some(2));
    }
}
