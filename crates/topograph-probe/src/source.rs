//! Observation sources: where a probe's snapshots come from.
//!
//! A source returns the full current state it sees on every call. The sync
//! step works out what was created, what changed and what went away.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One entity as seen by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    /// The raw object, stored under the probe's metadata key.
    #[serde(default)]
    pub object: serde_json::Value,
}

impl Observation {
    pub fn new(
        entity_type: impl Into<String>,
        name: impl Into<String>,
        object: serde_json::Value,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            object,
        }
    }
}

/// Produces complete snapshots of what a probe currently sees.
///
/// `snapshot` may block; the scheduler calls it off the async workers.
pub trait ObservationSource: Send + Sync {
    fn snapshot(&self) -> Result<Vec<Observation>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Reads a JSON array of observations from a file on every snapshot.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObservationSource for FileSource {
    fn snapshot(&self) -> Result<Vec<Observation>> {
        let raw = std::fs::read(&self.path)?;
        let observations: Vec<Observation> = serde_json::from_slice(&raw)?;
        tracing::debug!(path = %self.path.display(), count = observations.len(), "Snapshot read");
        Ok(observations)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// An in-memory source whose contents can be replaced at any time.
#[derive(Default)]
pub struct StaticSource {
    observations: RwLock<Vec<Observation>>,
}

impl StaticSource {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations: RwLock::new(observations),
        }
    }

    /// Replace what the next snapshot returns.
    pub fn set(&self, observations: Vec<Observation>) {
        *self.observations.write() = observations;
    }
}

impl ObservationSource for StaticSource {
    fn snapshot(&self) -> Result<Vec<Observation>> {
        Ok(self.observations.read().clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
