//! Identity types for nodes and edges in the topology graph.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{Metadata, MetadataValue};

/// Metadata key holding the entity type (`Pod`, `Host`, ...).
pub const TYPE_KEY: &str = "Type";
/// Metadata key holding the name of the probe that owns the node.
pub const PROBE_KEY: &str = "Probe";
/// Metadata key holding the manager that owns the node.
pub const MANAGER_KEY: &str = "Manager";
/// Metadata key holding the entity name.
pub const NAME_KEY: &str = "Name";

/// The metadata keys that make up a node's logical identity.
pub const IDENTITY_KEYS: [&str; 4] = [TYPE_KEY, PROBE_KEY, MANAGER_KEY, NAME_KEY];

// ── Ids ───────────────────────────────────────────────────────────

/// Process-assigned unique identifier for a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Identity ──────────────────────────────────────────────────────

/// The logical identity of an entity across repeated observations.
///
/// Two observations with the same identity key always land on the same node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub entity_type: String,
    pub probe: String,
    pub manager: String,
    pub name: String,
}

impl IdentityKey {
    pub fn new(
        entity_type: impl Into<String>,
        probe: impl Into<String>,
        manager: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            probe: probe.into(),
            manager: manager.into(),
            name: name.into(),
        }
    }

    /// The four identity fields as metadata entries.
    pub fn to_metadata(&self) -> Metadata {
        let mut md = Metadata::new();
        md.insert(TYPE_KEY, MetadataValue::from(self.entity_type.as_str()));
        md.insert(PROBE_KEY, MetadataValue::from(self.probe.as_str()));
        md.insert(MANAGER_KEY, MetadataValue::from(self.manager.as_str()));
        md.insert(NAME_KEY, MetadataValue::from(self.name.as_str()));
        md
    }

    /// Rebuild an identity from metadata. Returns `None` unless all four
    /// identity fields are present as strings.
    pub fn from_metadata(md: &Metadata) -> Option<Self> {
        let field = |key: &str| md.get(key).and_then(MetadataValue::as_str).map(String::from);
        Some(Self {
            entity_type: field(TYPE_KEY)?,
            probe: field(PROBE_KEY)?,
            manager: field(MANAGER_KEY)?,
            name: field(NAME_KEY)?,
        })
    }

    /// Whether `key` is one of the fields this identity is derived from.
    pub fn is_identity_field(key: &str) -> bool {
        IDENTITY_KEYS.contains(&key)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.entity_type, self.probe, self.manager, self.name
        )
    }
}
