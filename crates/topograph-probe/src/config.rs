//! Configuration for the topograph-probe runtime.

use std::collections::HashSet;

use serde::Deserialize;
use topograph_graph::GraphConfig;

use crate::error::{ProbeError, Result};
use crate::probe::is_reserved_key;

/// Top-level probe configuration.
///
/// Loaded from the `[probe]` section of `topograph.toml` or
/// `TOPOGRAPH_PROBE__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Manager recorded on every node. Defaults to the probe name.
    #[serde(default)]
    pub manager: Option<String>,

    /// What `forget` does with an entity that disappeared.
    #[serde(default)]
    pub forget_policy: ForgetPolicy,

    /// Maximum number of snapshot syncs running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_syncs: usize,

    /// Per-probe sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// One probe and the snapshot file it reads.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Probe name, e.g. "k8s". Recorded as `Probe` on every node.
    pub probe: String,

    /// Key the raw object is stored under. Defaults to the probe name with
    /// its first letter uppercased.
    pub metadata_key: Option<String>,

    /// Path to a JSON array of observations.
    pub path: String,

    /// Sync interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether this source is synced at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Handling of entities a probe no longer sees.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForgetPolicy {
    /// Remove the node and its edges.
    #[default]
    Delete,
    /// Keep the node and set `Tombstone = true`.
    Tombstone,
}

impl SourceConfig {
    pub fn metadata_key(&self) -> String {
        self.metadata_key
            .clone()
            .unwrap_or_else(|| default_metadata_key(&self.probe))
    }
}

impl ProbeConfig {
    /// Manager for nodes created by `probe`.
    pub fn manager_for(&self, probe: &str) -> String {
        self.manager.clone().unwrap_or_else(|| probe.to_string())
    }

    /// Reject sources that cannot run.
    pub fn validate(&self) -> Result<()> {
        let mut probes = HashSet::new();
        for source in &self.sources {
            if source.probe.is_empty() {
                return Err(ProbeError::Config("source with empty probe name".into()));
            }
            if source.path.is_empty() {
                return Err(ProbeError::Config(format!(
                    "source {} has no snapshot path",
                    source.probe
                )));
            }
            let key = source.metadata_key();
            if key.is_empty() || is_reserved_key(&key) {
                return Err(ProbeError::Config(format!(
                    "source {} cannot use metadata_key {key:?}",
                    source.probe
                )));
            }
            if !probes.insert(source.probe.as_str()) {
                return Err(ProbeError::Config(format!(
                    "probe {} configured more than once",
                    source.probe
                )));
            }
        }
        Ok(())
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Read `<file_prefix>.toml` (optional) overlaid with `TOPOGRAPH_*`
/// environment variables, e.g. `TOPOGRAPH_PROBE__MANAGER`.
pub fn load_settings(file_prefix: &str) -> Result<config::Config> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("TOPOGRAPH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(cfg)
}

/// The `[probe]` section. Missing means defaults; malformed is an error.
pub fn probe_config(settings: &config::Config) -> Result<ProbeConfig> {
    match settings.get::<ProbeConfig>("probe") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(ProbeConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// The `[graph]` section. Missing keys fall back to defaults; malformed
/// values are an error.
pub fn graph_config(settings: &config::Config) -> Result<GraphConfig> {
    let mut graph = GraphConfig::default();
    match settings.get::<usize>("graph.event_capacity") {
        Ok(capacity) => graph.event_capacity = capacity,
        Err(config::ConfigError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(graph)
}

/// `k8s` → `K8s`, `docker` → `Docker`.
pub fn default_metadata_key(probe: &str) -> String {
    let mut chars = probe.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn default_max_concurrent() -> usize {
    4
}

fn default_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            manager: None,
            forget_policy: ForgetPolicy::default(),
            max_concurrent_syncs: default_max_concurrent(),
            sources: Vec::new(),
        }
    }
}
