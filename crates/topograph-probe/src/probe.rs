//! Probe handler: turns observations into graph nodes.
//!
//! Every observation goes through the same path: find or create the node for
//! the entity's identity, then write the identity fields and the raw object
//! in one metadata transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use topograph_core::types::{MANAGER_KEY, NAME_KEY, PROBE_KEY, TYPE_KEY};
use topograph_core::IdentityKey;
use topograph_graph::{Graph, GraphError, Node, TransactionError};

use crate::config::{default_metadata_key, ForgetPolicy, ProbeConfig, SourceConfig};
use crate::error::{ProbeError, Result};

/// Metadata flag set on nodes forgotten under [`ForgetPolicy::Tombstone`].
pub const TOMBSTONE_KEY: &str = "Tombstone";

/// Keys the handler writes itself. A raw object stored under one of them
/// would overwrite the node's identity or tombstone flag.
pub fn is_reserved_key(key: &str) -> bool {
    IdentityKey::is_identity_field(key) || key == TOMBSTONE_KEY
}

/// The node an observation landed on.
#[derive(Debug, Clone)]
pub struct Observed {
    pub node: Node,
    /// True when this observation created the node.
    pub created: bool,
}

/// Writes one probe's observations into the shared graph.
pub struct ProbeHandler {
    graph: Arc<Graph>,
    probe: String,
    manager: String,
    metadata_key: String,
    forget_policy: ForgetPolicy,
    /// (type, name) of every entity observed and not yet forgotten.
    seen: Mutex<BTreeSet<(String, String)>>,
}

impl ProbeHandler {
    /// A handler for `probe`, managed by itself, storing raw objects under
    /// the default metadata key and deleting forgotten entities.
    pub fn new(graph: Arc<Graph>, probe: impl Into<String>) -> Self {
        let probe = probe.into();
        Self {
            graph,
            manager: probe.clone(),
            metadata_key: default_metadata_key(&probe),
            probe,
            forget_policy: ForgetPolicy::default(),
            seen: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn from_config(graph: Arc<Graph>, config: &ProbeConfig, source: &SourceConfig) -> Self {
        Self::new(graph, source.probe.clone())
            .with_manager(config.manager_for(&source.probe))
            .with_metadata_key(source.metadata_key())
            .with_forget_policy(config.forget_policy)
    }

    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = manager.into();
        self
    }

    pub fn with_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.metadata_key = key.into();
        self
    }

    pub fn with_forget_policy(mut self, policy: ForgetPolicy) -> Self {
        self.forget_policy = policy;
        self
    }

    pub fn probe(&self) -> &str {
        &self.probe
    }

    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// The identity this probe gives to an entity.
    pub fn identity(&self, entity_type: &str, name: &str) -> IdentityKey {
        IdentityKey::new(entity_type, &self.probe, &self.manager, name)
    }

    /// Entities observed and not forgotten since, as (type, name).
    pub fn observed(&self) -> BTreeSet<(String, String)> {
        self.seen.lock().clone()
    }

    /// Record the current state of an entity.
    ///
    /// Creates the node on first sight. The raw object replaces whatever
    /// this probe stored before, and a tombstone left by an earlier `forget`
    /// is cleared.
    pub fn observe<V: Serialize + ?Sized>(
        &self,
        entity_type: &str,
        name: &str,
        raw: &V,
    ) -> Result<Observed> {
        if self.metadata_key.is_empty() || is_reserved_key(&self.metadata_key) {
            return Err(ProbeError::Config(format!(
                "probe {} cannot store objects under metadata key {:?}",
                self.probe, self.metadata_key
            )));
        }
        if entity_type.is_empty() || name.is_empty() {
            return Err(ProbeError::InvalidObservation(format!(
                "entity type and name are required (type={entity_type:?}, name={name:?})"
            )));
        }

        let identity = self.identity(entity_type, name);
        let (node, created) = self.lookup_or_create(identity)?;

        let mut tx = self.graph.start_metadata_transaction(&node);
        tx.add(TYPE_KEY, entity_type)?;
        tx.add(PROBE_KEY, &self.probe)?;
        tx.add(MANAGER_KEY, &self.manager)?;
        tx.add(NAME_KEY, name)?;
        tx.add(self.metadata_key.as_str(), raw)?;
        if self.forget_policy == ForgetPolicy::Tombstone {
            tx.remove(TOMBSTONE_KEY)?;
        }
        tx.commit()?;

        self.seen
            .lock()
            .insert((entity_type.to_string(), name.to_string()));

        tracing::debug!(
            probe = %self.probe,
            node_id = %node.id(),
            entity_type,
            name,
            created,
            "Observation recorded"
        );
        Ok(Observed { node, created })
    }

    /// Record that an entity is gone.
    ///
    /// Returns `false` when the graph holds no node for it.
    pub fn forget(&self, entity_type: &str, name: &str) -> Result<bool> {
        self.seen
            .lock()
            .remove(&(entity_type.to_string(), name.to_string()));

        let identity = self.identity(entity_type, name);
        let Some(node) = self.graph.node(&identity) else {
            return Ok(false);
        };

        let forgotten = match self.forget_policy {
            ForgetPolicy::Delete => match self.graph.del_node(&node) {
                Ok(()) => true,
                Err(GraphError::NodeNotFound { .. }) => false,
                Err(e) => return Err(e.into()),
            },
            ForgetPolicy::Tombstone => {
                let mut tx = self.graph.start_metadata_transaction(&node);
                tx.add(TOMBSTONE_KEY, &true)?;
                match tx.commit() {
                    Ok(_) => true,
                    Err(TransactionError::NodeRemoved { .. }) => false,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if forgotten {
            tracing::info!(
                probe = %self.probe,
                identity = %identity,
                policy = ?self.forget_policy,
                "Entity forgotten"
            );
        }
        Ok(forgotten)
    }

    fn lookup_or_create(&self, identity: IdentityKey) -> Result<(Node, bool)> {
        if let Some(node) = self.graph.node(&identity) {
            return Ok((node, false));
        }
        match self.graph.new_node(identity.clone()) {
            Ok(node) => Ok((node, true)),
            // Lost the creation race to another observer.
            Err(GraphError::DuplicateNode { .. }) => match self.graph.node(&identity) {
                Some(node) => Ok((node, false)),
                None => Err(GraphError::DuplicateNode { identity }.into()),
            },
            Err(e) => Err(e.into()),
        }
    }
}
