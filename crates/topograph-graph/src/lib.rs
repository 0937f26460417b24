//! topograph-graph: the shared in-memory topology graph.
//!
//! This crate is the single mutation point for the graph. Nodes are created
//! and removed through [`Graph`], and node metadata only changes through a
//! committed [`MetadataTransaction`]. Every mutation is published to the
//! registered listeners before the mutating call returns.

pub mod graph;
pub mod mutations;
pub mod node;
pub mod queries;
pub mod transaction;

pub use graph::{Graph, GraphConfig, GraphError, GraphListener};
pub use node::{Edge, Node, NodeSnapshot};
pub use queries::GraphDump;
pub use transaction::{CommitReceipt, MetadataTransaction, TransactionError, TransactionState};
