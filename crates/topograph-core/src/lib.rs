//! topograph-core: Canonical metadata values and shared types for the topograph graph.
//!
//! This crate provides the foundational types used across all topograph components:
//! - `MetadataValue` / `Metadata`, the canonical per-node attribute tree
//! - The normalizer turning any serializable value into that tree
//! - Structural diff and digests over metadata trees
//! - Node/edge identifiers and the logical identity key
//! - Graph change events

pub mod diff;
pub mod error;
pub mod events;
pub mod metadata;
pub mod normalize;
pub mod types;

pub use diff::{diff, MetadataDiff};
pub use error::MetadataError;
pub use events::{EventPayload, GraphEvent};
pub use metadata::{Metadata, MetadataValue};
pub use normalize::{normalize, normalize_json};
pub use types::{EdgeId, IdentityKey, NodeId};
