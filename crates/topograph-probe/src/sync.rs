//! Snapshot reconciliation: bring the graph in line with what a probe sees.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::probe::ProbeHandler;
use crate::source::Observation;

/// Counts from one reconcile pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Observations written to the graph.
    pub observed: u32,
    /// Of those, how many created a node.
    pub created: u32,
    /// Previously observed entities missing from the snapshot.
    pub forgotten: u32,
    /// Observations or forgets that failed.
    pub failed: u32,
    /// The pass was stopped before reaching the end of the snapshot.
    pub abandoned: bool,
}

/// Observe every entity in `snapshot`, then forget every entity the handler
/// observed earlier that the snapshot no longer contains.
///
/// A failing entity is logged and counted; it does not stop the pass.
pub fn reconcile(handler: &ProbeHandler, snapshot: &[Observation]) -> SyncSummary {
    reconcile_until(handler, snapshot, &AtomicBool::new(false))
}

/// [`reconcile`], checking `stop` before each entity.
///
/// Once `stop` is set no further observation is started and nothing is
/// forgotten. Every entity already handled was committed as a whole.
pub fn reconcile_until(
    handler: &ProbeHandler,
    snapshot: &[Observation],
    stop: &AtomicBool,
) -> SyncSummary {
    let mut summary = SyncSummary::default();
    let previously = handler.observed();
    let mut current = BTreeSet::new();

    for obs in snapshot {
        if stop.load(Ordering::Acquire) {
            summary.abandoned = true;
            return summary;
        }
        current.insert((obs.entity_type.clone(), obs.name.clone()));
        match handler.observe(&obs.entity_type, &obs.name, &obs.object) {
            Ok(observed) => {
                summary.observed += 1;
                if observed.created {
                    summary.created += 1;
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(
                    probe = %handler.probe(),
                    entity_type = %obs.entity_type,
                    name = %obs.name,
                    error = %e,
                    "Observation failed"
                );
            }
        }
    }

    for (entity_type, name) in previously.difference(&current) {
        if stop.load(Ordering::Acquire) {
            summary.abandoned = true;
            return summary;
        }
        match handler.forget(entity_type, name) {
            Ok(true) => summary.forgotten += 1,
            Ok(false) => {}
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(
                    probe = %handler.probe(),
                    entity_type = %entity_type,
                    name = %name,
                    error = %e,
                    "Forget failed"
                );
            }
        }
    }

    summary
}
