//! topograph-probe: Probe runtime for the topograph graph.
//!
//! Reads snapshots of what each probe currently sees, writes them into the
//! shared graph through metadata transactions, and forgets entities that
//! disappeared.

pub mod config;
pub mod error;
pub mod listener;
pub mod probe;
pub mod scheduler;
pub mod source;
pub mod sync;

pub use probe::{Observed, ProbeHandler};
pub use source::{FileSource, Observation, ObservationSource, StaticSource};
pub use sync::{reconcile, SyncSummary};
